use glam::Vec3;
use irradia_gpu::{
    select_lru_victim, Frame, HashGridCell, HashGridCellUpdate, HashGridParams,
    HashGridTile, TileKey,
};

use crate::{Buffer, CountBuffer, Device, Kernel, Result};

/// Single radiance cache, i.e. a set of buckets holding tiles of cells.
#[derive(Debug)]
pub struct HashGrid {
    label: &'static str,
    max_sample_count: f32,
    tiles: Buffer<HashGridTile>,
    cells: Buffer<HashGridCell>,

    /// Samples gathered during current frame, blended into `cells` by
    /// [`Self::resolve()`].
    updates: Buffer<HashGridCellUpdate>,

    /// Tiles touched during current frame.
    update_tiles: Buffer<u32>,
    update_tile_count: CountBuffer,

    /// Tiles alive after the latest decay pass.
    packed_tiles: Buffer<u32>,
    packed_tile_count: CountBuffer,

    /// Number of allocations dropped during current frame, per bucket.
    bucket_overflows: Buffer<u32>,
}

/// Point at which a ray has terminated, together with the radiance it has
/// carried.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub radiance: Vec3,
}

/// What has happened during a single [`HashGrid::populate()`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// Number of samples accumulated into cells.
    pub accepted: u32,

    /// Number of tiles allocated (including the ones that took an evicted
    /// tile's slot).
    pub allocated: u32,

    pub evicted: u32,

    /// Number of samples dropped because their bucket was full of hot
    /// tiles.
    pub overflowed: u32,
}

impl PopulateReport {
    pub fn merge(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.allocated += other.allocated;
        self.evicted += other.evicted;
        self.overflowed += other.overflowed;
    }
}

impl HashGrid {
    const POPULATE: Kernel = Kernel::new("hash_grid_cache_populate", 64);
    const RESOLVE: Kernel = Kernel::new("hash_grid_cache_resolve", 64);
    const DECAY: Kernel = Kernel::new("hash_grid_cache_decay", 64);
    const PURGE: Kernel = Kernel::new("hash_grid_cache_purge", 64);

    pub fn new(
        device: &Device,
        label: &'static str,
        params: &HashGridParams,
    ) -> Result<Self> {
        let num_tiles = params.num_tiles() as usize;

        Ok(Self {
            label,
            max_sample_count: params.max_sample_count,
            tiles: device.create_buffer(format!("{label}_tiles"), num_tiles)?,
            cells: device
                .create_buffer(format!("{label}_cells"), params.num_cells())?,
            updates: device.create_buffer(
                format!("{label}_update_cells"),
                params.num_cells(),
            )?,
            update_tiles: device
                .create_buffer(format!("{label}_update_tiles"), num_tiles)?,
            update_tile_count: device
                .create_count_buffer(format!("{label}_update_tile_count"))?,
            packed_tiles: device
                .create_buffer(format!("{label}_packed_tiles"), num_tiles)?,
            packed_tile_count: device
                .create_count_buffer(format!("{label}_packed_tile_count"))?,
            bucket_overflows: device.create_buffer(
                format!("{label}_bucket_overflows"),
                params.num_buckets as usize,
            )?,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn set_max_sample_count(&mut self, max_sample_count: f32) {
        self.max_sample_count = max_sample_count;
    }

    pub fn tiles(&self) -> &[HashGridTile] {
        &self.tiles
    }

    pub fn cells(&self) -> &[HashGridCell] {
        &self.cells
    }

    /// Returns the cells of given tile, all mips included.
    pub fn tile_cells(
        &self,
        params: &HashGridParams,
        tile_index: u32,
    ) -> &[HashGridCell] {
        let first = params.first_cell(tile_index);

        &self.cells[first..first + params.cells_per_tile() as usize]
    }

    pub fn bucket_overflows(&self) -> &[u32] {
        &self.bucket_overflows
    }

    /// Returns the tiles alive after the latest decay pass.
    pub fn packed_tiles(&self) -> &[u32] {
        let count =
            self.packed_tile_count.get_or_zero(self.packed_tiles.len());

        &self.packed_tiles[..count]
    }

    pub fn live_tile_count(&self) -> u32 {
        self.tiles.iter().filter(|tile| tile.is_valid()).count() as u32
    }

    /// Prepares this cache for a new frame, i.e. resets per-frame counters.
    pub fn begin_frame(&mut self) {
        self.update_tile_count.reset();
        self.bucket_overflows.clear();
    }

    /// Finds the tile stored under given key, without allocating anything.
    pub fn find_tile(
        &self,
        params: &HashGridParams,
        key: TileKey,
    ) -> Option<u32> {
        let bucket = params.bucket(key);

        (0..params.num_tiles_per_bucket)
            .map(|slot| params.tile_index(bucket, slot))
            .find(|&tile_index| self.tiles[tile_index as usize].matches(key))
    }

    /// Accumulates given samples into their cells, allocating tiles as
    /// needed.
    ///
    /// When a bucket is full, its least recently used tile with decay of at
    /// least `min_eviction_decay` is evicted; if every tile in there is still
    /// hot, the sample gets dropped and counted as an overflow.
    pub fn populate(
        &mut self,
        params: &HashGridParams,
        frame: Frame,
        min_eviction_decay: u32,
        samples: &[CacheSample],
    ) -> PopulateReport {
        let mut report = PopulateReport::default();

        let Self {
            tiles,
            cells,
            updates,
            update_tiles,
            update_tile_count,
            bucket_overflows,
            ..
        } = self;

        Self::POPULATE.run(samples.len() as u32, |id| {
            let sample = samples[id as usize];

            if !sample.radiance.is_finite() {
                return;
            }

            let key = params.tile_key(sample.position);
            let bucket = params.bucket(key);
            let slot_index = |slot| params.tile_index(bucket, slot) as usize;

            // -----------------------------------------------------------------

            let existing_slot = (0..params.num_tiles_per_bucket)
                .find(|&slot| tiles[slot_index(slot)].matches(key));

            let slot = if let Some(slot) = existing_slot {
                slot
            } else {
                let free_slot = (0..params.num_tiles_per_bucket)
                    .find(|&slot| !tiles[slot_index(slot)].is_valid());

                let slot = if let Some(slot) = free_slot {
                    slot
                } else {
                    // Tiles touched during this frame might have pending
                    // updates, so they're never evicted
                    let candidates = (0..params.num_tiles_per_bucket)
                        .map(|slot| (slot, tiles[slot_index(slot)]))
                        .filter(|(_, tile)| !tile.is_touched())
                        .map(|(slot, tile)| (slot, tile.decay));

                    match select_lru_victim(candidates, min_eviction_decay) {
                        Some(slot) => {
                            report.evicted += 1;
                            slot
                        }

                        None => {
                            bucket_overflows[bucket as usize] += 1;
                            report.overflowed += 1;
                            return;
                        }
                    }
                };

                let tile_index = slot_index(slot);
                let first_cell = params.first_cell(tile_index as u32);
                let tile_cells =
                    first_cell..first_cell + params.cells_per_tile() as usize;

                tiles[tile_index] = HashGridTile::new(key, frame.get());
                cells[tile_cells.clone()].fill(Default::default());
                updates[tile_cells].fill(Default::default());

                report.allocated += 1;
                slot
            };

            // -----------------------------------------------------------------

            let tile_index = params.tile_index(bucket, slot);

            if tiles[tile_index as usize].touch(frame.get()) {
                let idx = update_tile_count.fetch_add(1);

                update_tiles[idx as usize] = tile_index;
            }

            let cell_offset =
                params.cell_offset(params.cell_coords(sample.normal), 0);

            updates[params.cell_index(tile_index, cell_offset)]
                .add(sample.radiance);

            report.accepted += 1;
        });

        report
    }

    /// Blends this frame's samples into the touched tiles and rebuilds their
    /// mips.
    pub fn resolve(&mut self, params: &HashGridParams) {
        let Self {
            cells,
            updates,
            update_tiles,
            update_tile_count,
            max_sample_count,
            ..
        } = self;

        let mip0_cells = params.mip_size(0).pow(2) as usize;
        let cells_per_tile = params.cells_per_tile() as usize;

        Self::RESOLVE.run_indirect(update_tile_count, |id| {
            let tile_index = update_tiles[id as usize];
            let first_cell = params.first_cell(tile_index);

            for cell_idx in first_cell..first_cell + mip0_cells {
                let update = std::mem::take(&mut updates[cell_idx]);

                cells[cell_idx].blend(update, *max_sample_count);
            }

            params.build_mips(
                &mut cells[first_cell..first_cell + cells_per_tile],
            );
        });
    }

    /// Looks up radiance stored for given surface, falling back to coarser
    /// mips when the finer ones don't have enough samples.
    pub fn query(
        &self,
        params: &HashGridParams,
        position: Vec3,
        normal: Vec3,
        min_sample_count: f32,
    ) -> Option<HashGridCell> {
        let tile_index = self.find_tile(params, params.tile_key(position))?;

        params.resolve(
            self.tile_cells(params, tile_index),
            params.cell_coords(normal),
            min_sample_count,
        )
    }

    /// Advances decay of all the tiles and packs the ones that are still
    /// alive.
    pub fn decay(&mut self) {
        let Self {
            tiles,
            packed_tiles,
            packed_tile_count,
            ..
        } = self;

        packed_tile_count.reset();

        Self::DECAY.run(tiles.len() as u32, |id| {
            let tile = &mut tiles[id as usize];

            if !tile.is_valid() {
                return;
            }

            tile.decay();

            let idx = packed_tile_count.fetch_add(1);

            packed_tiles[idx as usize] = id;
        });
    }

    /// Frees tiles that haven't been touched for longer than `max_decay`
    /// frames; returns the number of freed tiles.
    pub fn purge_stale_tiles(&mut self, max_decay: u32) -> u32 {
        let Self {
            tiles,
            packed_tiles,
            packed_tile_count,
            ..
        } = self;

        let mut purged = 0;

        Self::PURGE.run_indirect(packed_tile_count, |id| {
            let tile = &mut tiles[packed_tiles[id as usize] as usize];

            if tile.decay > max_decay {
                *tile = Default::default();
                purged += 1;
            }
        });

        purged
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.cells.clear();
        self.updates.clear();
        self.bucket_overflows.clear();
        self.update_tile_count.poison();
        self.packed_tile_count.poison();
    }

    /// Poisons the per-frame counts, so that they can't leak into the next
    /// frame.
    pub fn end_frame(&mut self) {
        self.update_tile_count.poison();
    }
}
