use irradia_gpu::{Frame, HashGridParams};

use crate::{HashGrid, Kernel};

/// Debug statistics of a single radiance cache.
///
/// Statistics are purely observational; computing them never changes the
/// cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashGridStats {
    /// Frame these statistics have been gathered at.
    pub frame: Frame,

    /// Number of buckets holding given number of tiles (i.e. `[0]` is the
    /// number of empty buckets, `[1]` is the number of buckets with one tile
    /// etc.).
    pub bucket_occupancy: Vec<u32>,

    /// Number of buckets that have dropped given number of allocations during
    /// the frame; the last entry collects everything above it.
    pub bucket_overflow: Vec<u32>,

    pub free_buckets: u32,
    pub used_buckets: u32,
    pub live_tiles: u32,
    pub overflowed: u32,
}

impl HashGridStats {
    const KERNEL: Kernel = Kernel::new("hash_grid_cache_stats", 64);

    pub fn gather(
        grid: &HashGrid,
        params: &HashGridParams,
        max_bucket_overflow: u32,
        frame: Frame,
    ) -> Self {
        let mut this = Self {
            frame,
            bucket_occupancy: vec![0; params.num_tiles_per_bucket as usize + 1],
            bucket_overflow: vec![0; max_bucket_overflow as usize + 1],
            ..Default::default()
        };

        Self::KERNEL.run(params.num_buckets, |bucket| {
            let occupancy = (0..params.num_tiles_per_bucket)
                .filter(|&slot| {
                    grid.tiles()[params.tile_index(bucket, slot) as usize]
                        .is_valid()
                })
                .count();

            let overflow = grid.bucket_overflows()[bucket as usize];

            this.bucket_occupancy[occupancy] += 1;
            this.bucket_overflow[overflow.min(max_bucket_overflow) as usize] +=
                1;

            this.live_tiles += occupancy as u32;
            this.overflowed += overflow;

            if occupancy == 0 {
                this.free_buckets += 1;
            } else {
                this.used_buckets += 1;
            }
        });

        this
    }

    /// Returns the fraction of allocated tiles.
    pub fn load_factor(&self) -> f32 {
        let capacity = (self.bucket_occupancy.len() as u32 - 1)
            * (self.free_buckets + self.used_buckets);

        if capacity == 0 {
            0.0
        } else {
            self.live_tiles as f32 / capacity as f32
        }
    }
}

/// Ring of statistics waiting to be read back by the host.
///
/// Statistics gathered at frame `n` become readable at frame `n + 2`, the
/// same way a device readback would, so reading them never stalls the
/// frame; until then (or if they have never been gathered) reading yields
/// `None`.
#[derive(Clone, Debug, Default)]
pub struct StatsReadback {
    slots: [Option<HashGridStats>; Self::LATENCY as usize + 1],
}

impl StatsReadback {
    pub const LATENCY: u32 = 2;

    pub fn write(&mut self, stats: HashGridStats) {
        let slot = Self::slot(stats.frame);

        self.slots[slot] = Some(stats);
    }

    pub fn read(&self, frame: Frame) -> Option<&HashGridStats> {
        let stats = self.slots[Self::slot(frame.next())].as_ref()?;

        if stats.frame.get().wrapping_add(Self::LATENCY) == frame.get() {
            Some(stats)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    fn slot(frame: Frame) -> usize {
        (frame.get() % (Self::LATENCY + 1)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(frame: u32) -> HashGridStats {
        HashGridStats {
            frame: Frame::new(frame),
            live_tiles: frame,
            ..Default::default()
        }
    }

    #[test]
    fn readback_has_latency() {
        let mut target = StatsReadback::default();

        target.write(stats(0));
        assert!(target.read(Frame::new(0)).is_none());
        assert!(target.read(Frame::new(1)).is_none());

        target.write(stats(1));
        target.write(stats(2));
        assert_eq!(0, target.read(Frame::new(2)).unwrap().live_tiles);

        target.write(stats(3));
        assert_eq!(1, target.read(Frame::new(3)).unwrap().live_tiles);
    }

    #[test]
    fn missing_readbacks_yield_none() {
        let mut target = StatsReadback::default();

        target.write(stats(0));

        // Frame 1 didn't gather anything
        target.write(stats(2));

        assert!(target.read(Frame::new(3)).is_none());
        assert_eq!(2, target.read(Frame::new(4)).unwrap().live_tiles);
    }
}
