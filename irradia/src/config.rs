use glam::Vec3;
use irradia_gpu::{HashGridParams, ProbeSamplingMode, HASH_GRID_MIP_COUNT};

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct GiConfig {
    /// Whether secondary hits should be shaded through the world-space
    /// reservoirs instead of picking a single light uniformly.
    pub use_resampling: bool,

    pub disable_alpha_testing: bool,

    /// Whether direct lighting at primary hits should be added to the
    /// irradiance buffer.
    pub use_direct_lighting: bool,

    /// Whether reprojected probes should blend their history with fresh ray
    /// results (otherwise history is only used as a fallback).
    pub use_temporal_feedback: bool,

    /// Whether multibounce radiance at secondary hits should be read from the
    /// previous frame's cache values.
    pub use_temporal_multibounce_feedback: bool,

    pub use_screen_space_reflections: bool,

    /// Whether primary probe rays should write their radiance straight into
    /// the probes, next to populating the cache.
    pub use_bypass_cache: bool,

    pub use_multibounce: bool,

    /// Whether surfaces hit by rays should be shaded as if they were white.
    pub disable_albedo_textures: bool,

    pub disable_specular_materials: bool,

    /// Radiance returned by rays that don't hit anything.
    pub sky_radiance: Vec3,

    /// Seed for all of the per-thread noise generators; mixed with the frame
    /// index each frame.
    pub seed: u64,

    pub hash_grid_cache: HashGridCacheConfig,
    pub reservoirs: ReservoirConfig,
    pub screen_probes: ScreenProbesConfig,
    pub glossy_reflections: GlossyReflectionsConfig,
    pub gi_denoiser: GiDenoiserConfig,
}

impl GiConfig {
    pub fn validate(&self) -> Result<()> {
        self.hash_grid_cache.validate()?;
        self.reservoirs.validate()?;
        self.screen_probes.validate()?;
        self.glossy_reflections.validate()?;
        self.gi_denoiser.validate()?;

        if !self.sky_radiance.is_finite() {
            return Err(Error::invalid_config("sky radiance must be finite"));
        }

        Ok(())
    }

    /// Returns albedo that shading should use for a surface of given albedo.
    pub fn surface_albedo(&self, albedo: Vec3) -> Vec3 {
        if self.disable_albedo_textures {
            Vec3::ONE
        } else {
            albedo
        }
    }

    /// Returns whether switching from `self` into `other` requires
    /// reallocating buffers (which drops all of the cached state).
    pub fn is_invalidated_by(&self, other: &Self) -> bool {
        self.hash_grid_cache.is_invalidated_by(&other.hash_grid_cache)
            || self.reservoirs != other.reservoirs
            || self.screen_probes.cached_tile_capacity
                != other.screen_probes.cached_tile_capacity
            || self.screen_probes.sampling_mode
                != other.screen_probes.sampling_mode
            || self.glossy_reflections.halfres
                != other.glossy_reflections.halfres
            || self.seed != other.seed
    }
}

impl Default for GiConfig {
    fn default() -> Self {
        Self {
            use_resampling: false,
            disable_alpha_testing: false,
            use_direct_lighting: true,
            use_temporal_feedback: false,
            use_temporal_multibounce_feedback: false,
            use_screen_space_reflections: true,
            use_bypass_cache: true,
            use_multibounce: true,
            disable_albedo_textures: false,
            disable_specular_materials: false,
            sky_radiance: Vec3::ZERO,
            seed: 0,
            hash_grid_cache: Default::default(),
            reservoirs: Default::default(),
            screen_probes: Default::default(),
            glossy_reflections: Default::default(),
            gi_denoiser: Default::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HashGridCacheConfig {
    /// Size of a tile, expressed in pixels covered on screen.
    pub cell_size: f32,

    /// Smallest world-space size of a tile.
    pub min_cell_size: f32,

    /// Width (and height) of the directional cell grid at mip0.
    pub tile_cell_ratio: u32,

    /// Number of buckets, expressed as a power of two.
    pub num_buckets: u32,

    pub num_tiles_per_bucket: u32,
    pub max_sample_count: f32,
    pub discard_multibounce_ray_probability: f32,
    pub max_multibounce_sample_count: f32,

    /// Tiles whose decay is below this value are never evicted to make room
    /// for new ones.
    pub min_eviction_decay: u32,

    /// Tiles whose decay exceeds this value get purged.
    pub max_tile_decay: u32,

    /// Whether a buffer for exporting cells into the debug view should be
    /// allocated; it holds one `debug_mip_level` mip per tile.
    pub debug_cells: bool,

    pub debug_mip_level: u32,
    pub debug_propagate: bool,
    pub debug_max_cell_decay: u32,
    pub debug_stats: bool,
    pub debug_max_bucket_overflow: u32,
}

impl HashGridCacheConfig {
    pub fn num_buckets(&self) -> u32 {
        1 << self.num_buckets
    }

    pub fn num_tiles(&self) -> u32 {
        self.num_buckets() * self.num_tiles_per_bucket
    }

    pub fn params(
        &self,
        camera_origin: Vec3,
        pixel_angle: f32,
    ) -> HashGridParams {
        HashGridParams {
            camera: camera_origin.extend(pixel_angle),
            cell_size: self.cell_size,
            min_cell_size: self.min_cell_size,
            tile_cell_ratio: self.tile_cell_ratio,
            num_buckets: self.num_buckets(),
            num_tiles_per_bucket: self.num_tiles_per_bucket,
            max_sample_count: self.max_sample_count,
            _padding: Default::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.cell_size > 0.0) || !(self.min_cell_size > 0.0) {
            return Err(Error::invalid_config(
                "hash-grid cell sizes must be positive",
            ));
        }

        if !self.tile_cell_ratio.is_power_of_two()
            || self.tile_cell_ratio < (1 << (HASH_GRID_MIP_COUNT - 1))
        {
            return Err(Error::invalid_config(format!(
                "hash-grid tile cell ratio must be a power of two not smaller \
                 than {}; got {}",
                1 << (HASH_GRID_MIP_COUNT - 1),
                self.tile_cell_ratio,
            )));
        }

        if self.num_buckets > 24 {
            return Err(Error::invalid_config(format!(
                "hash-grid bucket exponent must be at most 24; got {}",
                self.num_buckets,
            )));
        }

        if self.num_tiles_per_bucket == 0 {
            return Err(Error::invalid_config(
                "hash-grid must hold at least one tile per bucket",
            ));
        }

        if !(self.max_sample_count >= 1.0)
            || !(self.max_multibounce_sample_count >= 1.0)
        {
            return Err(Error::invalid_config(
                "hash-grid max sample counts must be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&self.discard_multibounce_ray_probability) {
            return Err(Error::invalid_config(
                "multibounce discard probability must be within <0, 1>",
            ));
        }

        if self.debug_mip_level >= HASH_GRID_MIP_COUNT {
            return Err(Error::invalid_config(format!(
                "debug mip level must be below {HASH_GRID_MIP_COUNT}",
            )));
        }

        Ok(())
    }

    fn is_invalidated_by(&self, other: &Self) -> bool {
        self.cell_size != other.cell_size
            || self.min_cell_size != other.min_cell_size
            || self.tile_cell_ratio != other.tile_cell_ratio
            || self.num_buckets != other.num_buckets
            || self.num_tiles_per_bucket != other.num_tiles_per_bucket
            || self.debug_cells != other.debug_cells
            || (self.debug_cells
                && self.debug_mip_level != other.debug_mip_level)
    }
}

impl Default for HashGridCacheConfig {
    fn default() -> Self {
        Self {
            cell_size: 32.0,
            min_cell_size: 0.1,
            tile_cell_ratio: 8,
            num_buckets: 14,
            num_tiles_per_bucket: 4,
            max_sample_count: 16.0,
            discard_multibounce_ray_probability: 0.7,
            max_multibounce_sample_count: 16.0,
            min_eviction_decay: 2,
            max_tile_decay: 256,
            debug_cells: false,
            debug_mip_level: 0,
            debug_propagate: false,
            debug_max_cell_decay: 0,
            debug_stats: false,
            debug_max_bucket_overflow: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReservoirConfig {
    /// Size of a reservoir cell, expressed in pixels covered on screen.
    pub cell_size: f32,

    pub num_cells: u32,
    pub num_entries_per_cell: u32,

    /// Number of lights streamed through each freshly generated reservoir.
    pub initial_candidates: u32,

    /// Number of entries of the same cell merged into each reservoir.
    pub spatial_samples: u32,

    /// Cap on the temporal history, relative to a single candidate.
    pub max_temporal_m: f32,
}

impl ReservoirConfig {
    pub fn num_entries(&self) -> u32 {
        self.num_cells * self.num_entries_per_cell
    }

    fn validate(&self) -> Result<()> {
        if !(self.cell_size > 0.0) {
            return Err(Error::invalid_config(
                "reservoir cell size must be positive",
            ));
        }

        if self.num_cells == 0 || self.num_entries_per_cell == 0 {
            return Err(Error::invalid_config(
                "reservoir store must hold at least one entry",
            ));
        }

        if self.initial_candidates == 0 {
            return Err(Error::invalid_config(
                "reservoirs need at least one initial candidate",
            ));
        }

        Ok(())
    }
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            cell_size: 16.0,
            num_cells: 0x40000,
            num_entries_per_cell: 0x10,
            initial_candidates: 4,
            spatial_samples: 2,
            max_temporal_m: 20.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScreenProbesConfig {
    pub sampling_mode: ProbeSamplingMode,

    /// Maximum relative depth difference between a reprojected probe and the
    /// surface it lands on.
    pub depth_tolerance: f32,

    /// Minimum cosine between normals of a reprojected probe and the surface
    /// it lands on.
    pub normal_tolerance: f32,

    pub cached_tile_capacity: u32,

    /// Number of frames a cached tile can be reused for before its probe
    /// gets traced again.
    pub cached_tile_max_age: u32,
}

impl ScreenProbesConfig {
    fn validate(&self) -> Result<()> {
        if !(self.depth_tolerance >= 0.0) {
            return Err(Error::invalid_config(
                "probe depth tolerance must not be negative",
            ));
        }

        if !(-1.0..=1.0).contains(&self.normal_tolerance) {
            return Err(Error::invalid_config(
                "probe normal tolerance must be a cosine",
            ));
        }

        Ok(())
    }
}

impl Default for ScreenProbesConfig {
    fn default() -> Self {
        Self {
            sampling_mode: ProbeSamplingMode::QuarterSpp,
            depth_tolerance: 0.1,
            normal_tolerance: 0.9,
            cached_tile_capacity: 4096,
            cached_tile_max_age: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GlossyDenoiserMode {
    Disabled,

    #[default]
    Atrous,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlossyReflectionsConfig {
    pub halfres: bool,
    pub denoiser_mode: GlossyDenoiserMode,
    pub cleanup_fireflies: bool,

    /// Surfaces smoother than this use the mirror-like reflection alone.
    pub low_roughness_threshold: f32,

    /// Surfaces rougher than this use the diffuse irradiance alone.
    pub high_roughness_threshold: f32,

    pub atrous_pass_count: u32,
    pub full_radius: u32,
    pub half_radius: u32,
    pub mark_fireflies_half_radius: u32,
    pub mark_fireflies_full_radius: u32,
    pub mark_fireflies_half_low_threshold: f32,
    pub mark_fireflies_full_low_threshold: f32,
    pub mark_fireflies_half_high_threshold: f32,
    pub mark_fireflies_full_high_threshold: f32,
    pub cleanup_fireflies_half_radius: u32,
    pub cleanup_fireflies_full_radius: u32,
}

impl GlossyReflectionsConfig {
    /// Passes beyond this one would all run with the smallest step anyway.
    pub const MAX_ATROUS_PASS_COUNT: u32 = u32::BITS;

    fn validate(&self) -> Result<()> {
        if !(self.low_roughness_threshold <= self.high_roughness_threshold) {
            return Err(Error::invalid_config(format!(
                "low roughness threshold ({}) must not exceed the high one \
                 ({})",
                self.low_roughness_threshold, self.high_roughness_threshold,
            )));
        }

        if self.atrous_pass_count > Self::MAX_ATROUS_PASS_COUNT {
            return Err(Error::invalid_config(format!(
                "à-trous pass count must be at most {}; got {}",
                Self::MAX_ATROUS_PASS_COUNT,
                self.atrous_pass_count,
            )));
        }

        Ok(())
    }
}

impl Default for GlossyReflectionsConfig {
    fn default() -> Self {
        Self {
            halfres: true,
            denoiser_mode: GlossyDenoiserMode::Atrous,
            cleanup_fireflies: true,
            low_roughness_threshold: 0.2,
            high_roughness_threshold: 0.6,
            atrous_pass_count: 4,
            full_radius: 11,
            half_radius: 11,
            mark_fireflies_half_radius: 3,
            mark_fireflies_full_radius: 2,
            mark_fireflies_half_low_threshold: 0.0,
            mark_fireflies_full_low_threshold: 0.0,
            mark_fireflies_half_high_threshold: 1.0,
            mark_fireflies_full_high_threshold: 1.0,
            cleanup_fireflies_half_radius: 2,
            cleanup_fireflies_full_radius: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GiDenoiserConfig {
    pub max_history: f32,

    /// Pixels with history shorter than this get spatially blurred.
    pub blur_history_threshold: f32,

    pub blur_radius: u32,
}

impl GiDenoiserConfig {
    fn validate(&self) -> Result<()> {
        if !(self.max_history >= 1.0) {
            return Err(Error::invalid_config(
                "denoiser history must hold at least one frame",
            ));
        }

        Ok(())
    }
}

impl Default for GiDenoiserConfig {
    fn default() -> Self {
        Self {
            max_history: 16.0,
            blur_history_threshold: 4.0,
            blur_radius: 2,
        }
    }
}
