use fxhash::FxHashMap;
use glam::{UVec2, Vec3};
use irradia_gpu::{select_lru_victim, CachedTile, SphericalHarmonics};
use log::trace;

use crate::{Buffer, Device, Result};

/// Capacity-bounded cache of traced probe tiles, keyed by tile coordinates.
///
/// Entries are recycled in least-recently-used order, using the same rule
/// as the radiance cache's tiles.
#[derive(Debug)]
pub struct ProbeTileCache {
    entries: Buffer<CachedTile>,
    index: FxHashMap<UVec2, u32>,
    overflows: u32,
}

impl ProbeTileCache {
    /// Entries used during the latest frame are never recycled.
    const MIN_EVICTION_DECAY: u32 = 1;

    pub fn new(device: &Device, capacity: u32) -> Result<Self> {
        Ok(Self {
            entries: device.create_buffer(
                "irradia_probe_cached_tiles",
                capacity as usize,
            )?,
            index: Default::default(),
            overflows: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of insertions dropped because the cache was full of hot
    /// entries.
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    pub fn get(&self, tile: UVec2) -> Option<(u32, &CachedTile)> {
        let slot = *self.index.get(&tile)?;

        Some((slot, &self.entries[slot as usize]))
    }

    /// Marks given entry as reused during current frame.
    pub fn reuse(&mut self, slot: u32) -> Option<&CachedTile> {
        let entry = self.entries.get_mut(slot as usize)?;

        entry.flags |= CachedTile::FLAG_USED;
        entry.age += 1;

        Some(entry)
    }

    /// Stores freshly traced radiance of given tile; returns the entry's slot
    /// or `None` if there was no room for it.
    pub fn insert(
        &mut self,
        tile: UVec2,
        position: Vec3,
        sh: SphericalHarmonics,
    ) -> Option<u32> {
        let slot = match self.index.get(&tile).copied() {
            Some(slot) => slot,

            None => {
                let slot = self.allocate()?;

                self.index.insert(tile, slot);
                slot
            }
        };

        self.entries[slot as usize] = CachedTile {
            sh,
            position,
            decay: 0,
            tile,
            age: 0,
            flags: CachedTile::FLAG_VALID | CachedTile::FLAG_USED,
        };

        Some(slot)
    }

    fn allocate(&mut self) -> Option<u32> {
        let free_slot = self
            .entries
            .iter()
            .position(|entry| !entry.is_valid())
            .map(|slot| slot as u32);

        if free_slot.is_some() {
            return free_slot;
        }

        let candidates = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_used())
            .map(|(slot, entry)| (slot as u32, entry.decay));

        let Some(slot) =
            select_lru_victim(candidates, Self::MIN_EVICTION_DECAY)
        else {
            self.overflows += 1;
            return None;
        };

        let evicted = self.entries[slot as usize].tile;

        trace!("Evicting cached probe tile {evicted}");

        self.index.remove(&evicted);
        self.entries[slot as usize] = Default::default();

        Some(slot)
    }

    /// Advances decay of all entries; called once per frame.
    pub fn decay(&mut self) {
        for entry in self.entries.iter_mut() {
            if !entry.is_valid() {
                continue;
            }

            if entry.is_used() {
                entry.decay = 0;
                entry.flags &= !CachedTile::FLAG_USED;
            } else {
                entry.decay = entry.decay.saturating_add(1);
            }
        }

        self.overflows = 0;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.overflows = 0;
    }
}

#[cfg(test)]
mod tests {
    use glam::uvec2;

    use super::*;

    fn sh(value: f32) -> SphericalHarmonics {
        SphericalHarmonics {
            l0: Vec3::splat(value),
            ..Default::default()
        }
    }

    #[test]
    fn insert_and_get() {
        let device = Device::default();
        let mut target = ProbeTileCache::new(&device, 4).unwrap();

        let slot = target.insert(uvec2(1, 2), Vec3::ONE, sh(1.0)).unwrap();
        let (found, entry) = target.get(uvec2(1, 2)).unwrap();

        assert_eq!(slot, found);
        assert_eq!(sh(1.0), entry.sh);
        assert!(target.get(uvec2(2, 1)).is_none());

        // Re-inserting the same tile reuses its slot
        let slot2 = target.insert(uvec2(1, 2), Vec3::ONE, sh(2.0)).unwrap();

        assert_eq!(slot, slot2);
        assert_eq!(1, target.len());
    }

    #[test]
    fn evicts_least_recently_used() {
        let device = Device::default();
        let mut target = ProbeTileCache::new(&device, 2).unwrap();

        target.insert(uvec2(0, 0), Vec3::ZERO, sh(1.0));
        target.decay();
        target.insert(uvec2(1, 0), Vec3::ZERO, sh(1.0));
        target.decay();

        // (0, 0) has gone unused for a frame, while (1, 0) is still fresh
        let slot = target.insert(uvec2(2, 0), Vec3::ZERO, sh(1.0)).unwrap();

        assert_eq!(0, slot);
        assert!(target.get(uvec2(0, 0)).is_none());
        assert!(target.get(uvec2(1, 0)).is_some());
        assert!(target.get(uvec2(2, 0)).is_some());
    }

    #[test]
    fn hot_entries_overflow() {
        let device = Device::default();
        let mut target = ProbeTileCache::new(&device, 1).unwrap();

        target.insert(uvec2(0, 0), Vec3::ZERO, sh(1.0));

        assert!(target.insert(uvec2(1, 0), Vec3::ZERO, sh(1.0)).is_none());
        assert_eq!(1, target.overflows());
        assert!(target.get(uvec2(0, 0)).is_some());
    }
}
