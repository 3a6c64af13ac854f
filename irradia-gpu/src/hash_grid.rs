//! Layout and per-thread logic of the world-space hash-grid radiance cache.
//!
//! World is split into axis-aligned tiles whose size grows with the distance
//! from camera (each size being a separate level-of-detail); every tile holds
//! a small pyramid of cells, addressed by the octahedral-encoded direction of
//! the surface normal:
//!
//! ```text
//! mip0: ratio   x ratio   cells
//! mip1: ratio/2 x ratio/2 cells
//! mip2: ratio/4 x ratio/4 cells
//! mip3: ratio/8 x ratio/8 cells
//! ```
//!
//! Tiles are stored in buckets of fixed capacity, selected by hashing tile's
//! key.

use bytemuck::{Pod, Zeroable};
use glam::{uvec2, IVec3, UVec2, Vec3, Vec4, Vec4Swizzles};

use crate::{pcg_hash, Normal};

/// Number of cell levels stored inside each tile.
pub const HASH_GRID_MIP_COUNT: u32 = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashGridParams {
    /// x, y, z - camera origin
    /// w - angle covered by a single pixel
    pub camera: Vec4,

    /// Size of a tile, expressed in pixels; the actual world-space size
    /// depends on the distance from camera.
    pub cell_size: f32,

    /// Smallest world-space size of a tile.
    pub min_cell_size: f32,

    pub tile_cell_ratio: u32,
    pub num_buckets: u32,
    pub num_tiles_per_bucket: u32,
    pub max_sample_count: f32,
    pub _padding: [u32; 2],
}

impl HashGridParams {
    pub fn num_tiles(&self) -> u32 {
        self.num_buckets * self.num_tiles_per_bucket
    }

    pub fn num_cells(&self) -> usize {
        self.num_tiles() as usize * self.cells_per_tile() as usize
    }

    /// Returns the width (and height) of given mip, in cells.
    pub fn mip_size(&self, mip: u32) -> u32 {
        (self.tile_cell_ratio >> mip).max(1)
    }

    /// Returns the offset of the first cell of given mip within a tile.
    pub fn mip_offset(&self, mip: u32) -> u32 {
        (0..mip).map(|mip| self.mip_size(mip).pow(2)).sum()
    }

    pub fn cells_per_tile(&self) -> u32 {
        self.mip_offset(HASH_GRID_MIP_COUNT)
    }

    /// Returns level-of-detail used to store given world-space position.
    pub fn lod(&self, position: Vec3) -> u32 {
        let distance = self.camera.xyz().distance(position);
        let footprint = distance * self.camera.w * self.cell_size;
        let size = footprint.max(self.min_cell_size);
        let lod = (size / self.min_cell_size).log2().floor();

        if lod.is_finite() {
            (lod.max(0.0) as u32).min(31)
        } else {
            0
        }
    }

    /// Returns the world-space size of tiles at given level-of-detail.
    pub fn tile_size(&self, lod: u32) -> f32 {
        self.min_cell_size * 2.0f32.powi(lod as i32)
    }

    pub fn tile_key(&self, position: Vec3) -> TileKey {
        self.tile_key_at(position, self.lod(position))
    }

    pub fn tile_key_at(&self, position: Vec3, lod: u32) -> TileKey {
        let coords = (position / self.tile_size(lod)).floor().as_ivec3();

        TileKey::new(coords, lod)
    }

    /// Returns the world-space center of given tile.
    pub fn tile_center(&self, key: TileKey) -> Vec3 {
        (key.coords().as_vec3() + 0.5) * self.tile_size(key.lod)
    }

    pub fn bucket(&self, key: TileKey) -> u32 {
        key.spatial_hash() % self.num_buckets.max(1)
    }

    pub fn tile_index(&self, bucket: u32, slot: u32) -> u32 {
        bucket * self.num_tiles_per_bucket + slot
    }

    /// Returns mip0 coordinates of the cell storing radiance for surfaces
    /// oriented along given normal.
    pub fn cell_coords(&self, normal: Vec3) -> UVec2 {
        let uv = Normal::encode(normal);
        let max = (self.tile_cell_ratio.max(1) - 1) as f32;

        (uv * self.tile_cell_ratio as f32)
            .floor()
            .clamp(glam::Vec2::ZERO, glam::Vec2::splat(max))
            .as_uvec2()
    }

    /// Returns the offset (within a tile) of the cell at given mip0
    /// coordinates, moved into given mip.
    pub fn cell_offset(&self, coords: UVec2, mip: u32) -> u32 {
        let size = self.mip_size(mip);
        let coords = (coords >> mip).min(UVec2::splat(size - 1));

        self.mip_offset(mip) + coords.y * size + coords.x
    }

    /// Returns the global index of the first cell of given tile.
    pub fn first_cell(&self, tile_index: u32) -> usize {
        tile_index as usize * self.cells_per_tile() as usize
    }

    pub fn cell_index(&self, tile_index: u32, cell_offset: u32) -> usize {
        self.first_cell(tile_index) + cell_offset as usize
    }

    /// Rebuilds mips 1..3 of given tile from its mip0 cells.
    pub fn build_mips(&self, tile_cells: &mut [HashGridCell]) {
        for mip in 1..HASH_GRID_MIP_COUNT {
            let size = self.mip_size(mip);
            let child_size = self.mip_size(mip - 1);
            let child_offset = self.mip_offset(mip - 1);
            let offset = self.mip_offset(mip);

            for y in 0..size {
                for x in 0..size {
                    let mut cell = HashGridCell::default();

                    for child in [
                        uvec2(2 * x, 2 * y),
                        uvec2(2 * x + 1, 2 * y),
                        uvec2(2 * x, 2 * y + 1),
                        uvec2(2 * x + 1, 2 * y + 1),
                    ] {
                        if child.x >= child_size || child.y >= child_size {
                            continue;
                        }

                        let child = tile_cells
                            [(child_offset + child.y * child_size + child.x)
                                as usize];

                        cell.merge(child);
                    }

                    tile_cells[(offset + y * size + x) as usize] = cell;
                }
            }
        }
    }

    /// Looks up radiance stored for given direction, falling back to coarser
    /// mips when the finer ones don't have enough samples.
    ///
    /// Returns `None` only if the entire pyramid is empty.
    pub fn resolve(
        &self,
        tile_cells: &[HashGridCell],
        coords: UVec2,
        min_sample_count: f32,
    ) -> Option<HashGridCell> {
        let mut fallback = None;

        for mip in 0..HASH_GRID_MIP_COUNT {
            let cell = tile_cells[self.cell_offset(coords, mip) as usize];

            if cell.is_empty() {
                continue;
            }

            if cell.sample_count >= min_sample_count {
                return Some(cell);
            }

            fallback = Some(cell);
        }

        fallback
    }
}

/// Quantized position of a tile together with its level-of-detail.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct TileKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub lod: u32,
}

impl TileKey {
    pub fn new(coords: IVec3, lod: u32) -> Self {
        Self {
            x: coords.x,
            y: coords.y,
            z: coords.z,
            lod,
        }
    }

    pub fn coords(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Hashes this key; level-of-detail is folded in first, so that tiles of
    /// different sizes covering the same point land in unrelated buckets.
    pub fn spatial_hash(&self) -> u32 {
        let mut hash = pcg_hash(self.lod);

        hash = pcg_hash(hash ^ self.x as u32);
        hash = pcg_hash(hash ^ self.y as u32);
        hash = pcg_hash(hash ^ self.z as u32);
        hash
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashGridTile {
    pub key: TileKey,

    /// Number of consecutive frames this tile hasn't been touched for.
    pub decay: u32,

    pub last_touched: u32,
    pub flags: u32,
    pub _padding: u32,
}

impl HashGridTile {
    pub const FLAG_VALID: u32 = 1;
    pub const FLAG_TOUCHED: u32 = 2;

    pub fn new(key: TileKey, frame: u32) -> Self {
        Self {
            key,
            decay: 0,
            last_touched: frame,
            flags: Self::FLAG_VALID,
            _padding: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & Self::FLAG_VALID != 0
    }

    pub fn is_touched(&self) -> bool {
        self.flags & Self::FLAG_TOUCHED != 0
    }

    pub fn matches(&self, key: TileKey) -> bool {
        self.is_valid() && self.key == key
    }

    /// Marks this tile as touched; returns whether it's the first touch during
    /// current frame.
    pub fn touch(&mut self, frame: u32) -> bool {
        let is_first = !self.is_touched();

        self.flags |= Self::FLAG_TOUCHED;
        self.last_touched = frame;
        is_first
    }

    /// Advances this tile's decay by one frame, resetting it if the tile has
    /// been touched.
    pub fn decay(&mut self) {
        if self.is_touched() {
            self.decay = 0;
            self.flags &= !Self::FLAG_TOUCHED;
        } else {
            self.decay = self.decay.saturating_add(1);
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashGridCell {
    pub radiance: Vec3,
    pub sample_count: f32,
}

impl HashGridCell {
    pub fn is_empty(&self) -> bool {
        self.sample_count <= 0.0
    }

    /// Blends this frame's samples into the running average.
    ///
    /// The history is weighted by its sample count, which is capped so that
    /// the cell stays responsive to lighting changes.
    pub fn blend(&mut self, update: HashGridCellUpdate, max_sample_count: f32) {
        if update.sample_count <= 0.0 {
            return;
        }

        let history = self
            .sample_count
            .min((max_sample_count - update.sample_count).max(0.0));

        let total = history + update.sample_count;

        self.radiance = (self.radiance * history + update.radiance) / total;
        self.sample_count = total;
    }

    /// Combines two cells into one, weighting them by their sample counts.
    pub fn merge(&mut self, other: Self) {
        if other.is_empty() {
            return;
        }

        let total = self.sample_count + other.sample_count;

        self.radiance = (self.radiance * self.sample_count
            + other.radiance * other.sample_count)
            / total;

        self.sample_count = total;
    }
}

/// Samples gathered by a cell during the current frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashGridCellUpdate {
    /// Sum of all of the radiance samples.
    pub radiance: Vec3,
    pub sample_count: f32,
}

impl HashGridCellUpdate {
    pub fn add(&mut self, radiance: Vec3) {
        self.radiance += radiance;
        self.sample_count += 1.0;
    }
}
