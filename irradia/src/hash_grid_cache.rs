//! World-space radiance cache.
//!
//! Radiance is cached in two separate hash grids sharing the same layout:
//! the primary one stores light that has bounced once before reaching the
//! cached surface, while the multibounce one stores contributions of bounce
//! two and above; querying the cache blends both.

mod grid;
mod stats;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use irradia_gpu::{
    DrawArgs, Frame, HashGridParams, Normal, HASH_GRID_MIP_COUNT,
};
use log::{debug, warn};

pub use self::grid::*;
pub use self::stats::*;
use crate::{
    dispatch, Buffer, CountBuffer, Device, FrameContext, GiConfig,
    HashGridCacheConfig, Kernel, Result,
};

#[derive(Debug)]
pub struct HashGridCache {
    config: HashGridCacheConfig,
    use_multibounce: bool,
    params: HashGridParams,
    frame: Frame,
    primary: HashGrid,
    multibounce: HashGrid,
    readback: StatsReadback,
    debug_cells: Buffer<HashGridDebugCell>,
    debug_cell_count: CountBuffer,
}

/// Cell exported for the debug view, drawn as a cube.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HashGridDebugCell {
    pub position: Vec3,
    pub size: f32,
    pub radiance: Vec3,
    pub decay: u32,
}

impl HashGridCache {
    /// Number of samples a cell must have collected to be used without
    /// falling back to coarser mips.
    pub const MIN_SAMPLE_COUNT: f32 = 4.0;

    pub const DEBUG_CELL_VERTICES: u32 = 36;

    const DEBUG_CELLS: Kernel = Kernel::new("hash_grid_cache_debug_cells", 64);

    pub fn new(device: &Device, config: &GiConfig) -> Result<Self> {
        let params = config.hash_grid_cache.params(Vec3::ZERO, 0.0);

        debug!(
            "Creating hash-grid cache: buckets={}, tiles={}, cells={}",
            params.num_buckets,
            params.num_tiles(),
            params.num_cells()
        );

        let primary = HashGrid::new(device, "irradia_hash_grid", &params)?;

        let multibounce = {
            let mut params = params;

            params.max_sample_count =
                config.hash_grid_cache.max_multibounce_sample_count;

            HashGrid::new(device, "irradia_hash_grid_multibounce", &params)?
        };

        let debug_cells = {
            let len = if config.hash_grid_cache.debug_cells {
                let mip = config.hash_grid_cache.debug_mip_level;

                params.num_tiles() as usize
                    * params.mip_size(mip).pow(2) as usize
            } else {
                0
            };

            device.create_buffer("irradia_hash_grid_debug_cells", len)?
        };

        let debug_cell_count =
            device.create_count_buffer("irradia_hash_grid_debug_cell_count")?;

        Ok(Self {
            config: config.hash_grid_cache.clone(),
            use_multibounce: config.use_multibounce,
            params,
            frame: Default::default(),
            primary,
            multibounce,
            readback: Default::default(),
            debug_cells,
            debug_cell_count,
        })
    }

    /// Applies a configuration change that doesn't affect allocations.
    pub fn update_config(&mut self, config: &GiConfig) {
        if self.use_multibounce && !config.use_multibounce {
            self.multibounce.clear();
        }

        self.config = config.hash_grid_cache.clone();
        self.use_multibounce = config.use_multibounce;
        self.primary.set_max_sample_count(self.config.max_sample_count);

        self.multibounce
            .set_max_sample_count(self.config.max_multibounce_sample_count);
    }

    pub fn params(&self) -> &HashGridParams {
        &self.params
    }

    pub fn primary(&self) -> &HashGrid {
        &self.primary
    }

    pub fn multibounce(&self) -> &HashGrid {
        &self.multibounce
    }

    pub fn begin_frame(&mut self, ctx: &FrameContext) {
        self.frame = ctx.frame;

        self.params = self
            .config
            .params(ctx.camera.origin(), ctx.camera.pixel_angle());

        self.primary.begin_frame();
        self.multibounce.begin_frame();
        self.debug_cell_count.poison();
    }

    /// Accumulates single-bounce samples into the primary cache.
    pub fn populate(&mut self, samples: &[CacheSample]) -> PopulateReport {
        let report = self.primary.populate(
            &self.params,
            self.frame,
            self.config.min_eviction_decay,
            samples,
        );

        Self::log_report(&self.primary, report);
        report
    }

    /// Accumulates multi-bounce samples into the multibounce cache.
    pub fn populate_multibounce(
        &mut self,
        samples: &[CacheSample],
    ) -> PopulateReport {
        if !self.use_multibounce {
            return Default::default();
        }

        let mut params = self.params;

        params.max_sample_count = self.config.max_multibounce_sample_count;

        let report = self.multibounce.populate(
            &params,
            self.frame,
            self.config.min_eviction_decay,
            samples,
        );

        Self::log_report(&self.multibounce, report);
        report
    }

    fn log_report(grid: &HashGrid, report: PopulateReport) {
        if report.overflowed > 0 {
            warn!(
                "`{}` overflowed; dropped {} samples",
                grid.label(),
                report.overflowed
            );
        }

        debug!("`{}` populated: {:?}", grid.label(), report);
    }

    /// Blends this frame's samples into both caches; afterwards the cache
    /// can be queried for the updated values.
    pub fn resolve(&mut self) {
        self.primary.resolve(&self.params);
        self.multibounce.resolve(&self.params);
    }

    /// Returns radiance leaving given surface, as known by the cache.
    ///
    /// Returns `None` only if the primary cache doesn't hold anything for
    /// this surface's tile.
    pub fn query(&self, position: Vec3, normal: Vec3) -> Option<Vec3> {
        let primary = self.primary.query(
            &self.params,
            position,
            normal,
            Self::MIN_SAMPLE_COUNT,
        )?;

        Some(primary.radiance + self.query_multibounce(position, normal))
    }

    /// Returns radiance leaving given surface after bouncing at least twice,
    /// or zero if it's unknown.
    pub fn query_multibounce(&self, position: Vec3, normal: Vec3) -> Vec3 {
        if !self.use_multibounce {
            return Vec3::ZERO;
        }

        self.multibounce
            .query(&self.params, position, normal, Self::MIN_SAMPLE_COUNT)
            .map_or(Vec3::ZERO, |cell| cell.radiance)
    }

    /// Advances decay of all tiles.
    ///
    /// Tiles aren't evicted here - they're evicted lazily by
    /// [`Self::populate()`], once their bucket runs out of space.
    pub fn decay_and_evict(&mut self) {
        self.primary.decay();
        self.multibounce.decay();
    }

    /// Frees tiles that haven't been touched for `max_tile_decay` frames.
    pub fn purge_stale_tiles(&mut self) -> u32 {
        let max_decay = self.config.max_tile_decay;

        let purged = self.primary.purge_stale_tiles(max_decay)
            + self.multibounce.purge_stale_tiles(max_decay);

        if purged > 0 {
            debug!("Purged {purged} stale tiles");
        }

        purged
    }

    /// Gathers debug statistics of the primary cache, if enabled.
    pub fn update_stats(&mut self) {
        if !self.config.debug_stats {
            return;
        }

        self.readback.write(HashGridStats::gather(
            &self.primary,
            &self.params,
            self.config.debug_max_bucket_overflow,
            self.frame,
        ));
    }

    /// Returns the latest statistics that have reached the host, if any.
    pub fn stats(&self) -> Option<&HashGridStats> {
        self.readback.read(self.frame)
    }

    /// Exports cells for the debug view, returning the arguments for drawing
    /// them; see [`Self::debug_cells()`].
    ///
    /// Only cells of tiles whose decay doesn't exceed `debug_max_cell_decay`
    /// are exported; returns `None` if `debug_cells` is disabled.
    pub fn build_debug_cells(&mut self) -> Option<DrawArgs> {
        if !self.config.debug_cells {
            return None;
        }

        let Self {
            config,
            params,
            primary,
            debug_cells,
            debug_cell_count,
            ..
        } = self;

        let mip = config.debug_mip_level.min(HASH_GRID_MIP_COUNT - 1);
        let mip_size = params.mip_size(mip);

        debug_cell_count.reset();

        Self::DEBUG_CELLS.run(params.num_tiles(), |tile_index| {
            let tile = primary.tiles()[tile_index as usize];

            if !tile.is_valid() || tile.decay > config.debug_max_cell_decay {
                return;
            }

            let tile_size = params.tile_size(tile.key.lod);
            let center = params.tile_center(tile.key);
            let cells = primary.tile_cells(params, tile_index);

            for y in 0..mip_size {
                for x in 0..mip_size {
                    let coords = glam::uvec2(x, y) << mip;

                    let cell = if config.debug_propagate {
                        params.resolve(cells, coords, Self::MIN_SAMPLE_COUNT)
                    } else {
                        Some(cells[params.cell_offset(coords, mip) as usize])
                    };

                    let Some(cell) = cell.filter(|cell| !cell.is_empty())
                    else {
                        continue;
                    };

                    let uv = (glam::uvec2(x, y).as_vec2() + 0.5)
                        / mip_size as f32;

                    let dir = Normal::decode(uv);
                    let idx = debug_cell_count.fetch_add(1) as usize;

                    if let Some(out) = debug_cells.get_mut(idx) {
                        *out = HashGridDebugCell {
                            position: center + dir * (0.25 * tile_size),
                            size: tile_size / (2 * mip_size) as f32,
                            radiance: cell.radiance,
                            decay: tile.decay,
                        };
                    }
                }
            }
        });

        dispatch::generate_draw(debug_cell_count, Self::DEBUG_CELL_VERTICES)
            .ok()
    }

    pub fn debug_cells(&self) -> &[HashGridDebugCell] {
        let count = self.debug_cell_count.get_or_zero(self.debug_cells.len());

        &self.debug_cells[..count]
    }

    pub fn end_frame(&mut self) {
        self.primary.end_frame();
        self.multibounce.end_frame();
    }

    /// Drops everything stored in both caches.
    pub fn clear(&mut self) {
        debug!("Clearing hash-grid cache");

        self.primary.clear();
        self.multibounce.clear();
        self.readback.clear();
        self.debug_cell_count.poison();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{uvec2, vec3};
    use irradia_gpu::{Camera, Light};

    use super::*;
    use crate::GBuffer;

    fn config(num_buckets: u32, num_tiles_per_bucket: u32) -> GiConfig {
        let mut config = GiConfig::default();

        // Keeps every tile at the finest level-of-detail
        config.hash_grid_cache.cell_size = 0.01;
        config.hash_grid_cache.num_buckets = num_buckets;
        config.hash_grid_cache.num_tiles_per_bucket = num_tiles_per_bucket;
        config.hash_grid_cache.debug_stats = true;
        config.hash_grid_cache.debug_cells = true;
        config
    }

    struct Harness {
        camera: Camera,
        gbuffer: GBuffer,
        lights: Vec<Light>,
        frame: Frame,
    }

    impl Harness {
        fn new() -> Self {
            let size = uvec2(16, 16);

            Self {
                camera: Camera::new(
                    vec3(0.0, 1.0, 5.0),
                    Vec3::ZERO,
                    Vec3::Y,
                    1.0,
                    size,
                ),
                gbuffer: GBuffer::new(size),
                lights: Vec::new(),
                frame: Frame::new(0),
            }
        }

        fn ctx(&self) -> FrameContext<'_> {
            FrameContext {
                camera: self.camera,
                prev_camera: self.camera,
                gbuffer: &self.gbuffer,
                lights: &self.lights,
                frame: self.frame,
            }
        }

        /// Runs one frame of the cache, populating it with given samples.
        fn frame(
            &mut self,
            target: &mut HashGridCache,
            samples: &[CacheSample],
        ) -> PopulateReport {
            target.begin_frame(&self.ctx());

            let report = target.populate(samples);

            target.resolve();
            target.decay_and_evict();
            target.purge_stale_tiles();
            target.update_stats();
            target.end_frame();

            self.frame = self.frame.next();
            report
        }
    }

    fn sample(position: Vec3, radiance: f32) -> CacheSample {
        CacheSample {
            position,
            normal: Vec3::Y,
            radiance: Vec3::splat(radiance),
        }
    }

    #[test]
    fn populate_and_query() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut target = HashGridCache::new(&device, &config(4, 4)).unwrap();
        let pos = vec3(0.3, 0.0, 0.2);

        let report =
            harness.frame(&mut target, &[sample(pos, 1.0), sample(pos, 3.0)]);

        assert_eq!(2, report.accepted);
        assert_eq!(1, report.allocated);

        assert_relative_eq!(target.query(pos, Vec3::Y).unwrap().x, 2.0);
        assert!(target.query(vec3(100.0, 0.0, 0.0), Vec3::Y).is_none());

        // Opposite direction lands in an empty cell, but the coarsest mip
        // still covers it
        assert_relative_eq!(target.query(pos, Vec3::NEG_Y).unwrap().x, 2.0);
    }

    #[test]
    fn multibounce_is_blended_into_queries() {
        let device = Device::default();
        let harness = Harness::new();
        let mut target = HashGridCache::new(&device, &config(4, 4)).unwrap();
        let pos = vec3(0.3, 0.0, 0.2);

        target.begin_frame(&harness.ctx());
        target.populate(&[sample(pos, 1.0)]);
        target.populate_multibounce(&[sample(pos, 0.5)]);
        target.resolve();
        target.end_frame();

        assert_relative_eq!(target.query(pos, Vec3::Y).unwrap().x, 1.5);

        let mut config = config(4, 4);

        config.use_multibounce = false;
        target.update_config(&config);

        assert_relative_eq!(target.query(pos, Vec3::Y).unwrap().x, 1.0);
        assert_eq!(0, target.multibounce().live_tile_count());
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut target = HashGridCache::new(&device, &config(0, 2)).unwrap();

        let samples: Vec<_> = (0..10)
            .map(|idx| sample(vec3(idx as f32, 0.0, 0.0), 1.0))
            .collect();

        let report = harness.frame(&mut target, &samples);

        assert_eq!(2, report.allocated);
        assert_eq!(8, report.overflowed);
        assert_eq!(2, report.accepted);
        assert_eq!(2, target.primary().live_tile_count());

        // Previously allocated tiles are untouched by overflows
        assert!(target.query(samples[0].position, Vec3::Y).is_some());
        assert!(target.query(samples[1].position, Vec3::Y).is_some());
    }

    #[test]
    fn hot_tiles_are_not_evicted() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut target = HashGridCache::new(&device, &config(0, 1)).unwrap();

        harness.frame(&mut target, &[sample(vec3(0.0, 0.0, 0.0), 1.0)]);

        // Tile's decay stays below the eviction floor for two frames
        for _ in 0..2 {
            let report = harness
                .frame(&mut target, &[sample(vec3(5.0, 0.0, 0.0), 1.0)]);

            assert_eq!(1, report.overflowed);
            assert_eq!(0, report.evicted);
        }

        let report =
            harness.frame(&mut target, &[sample(vec3(5.0, 0.0, 0.0), 1.0)]);

        assert_eq!(1, report.evicted);
        assert_eq!(0, report.overflowed);
        assert!(target.query(vec3(5.0, 0.0, 0.0), Vec3::Y).is_some());
        assert!(target.query(Vec3::ZERO, Vec3::Y).is_none());
    }

    #[test]
    fn stale_tiles_get_purged() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut config = config(2, 4);

        config.hash_grid_cache.max_tile_decay = 3;

        let mut target = HashGridCache::new(&device, &config).unwrap();

        harness.frame(&mut target, &[sample(Vec3::ZERO, 1.0)]);

        for _ in 0..3 {
            harness.frame(&mut target, &[]);
        }

        assert_eq!(1, target.primary().live_tile_count());

        harness.frame(&mut target, &[]);

        assert_eq!(0, target.primary().live_tile_count());
    }

    #[test]
    fn stats_are_observational() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut target = HashGridCache::new(&device, &config(0, 1)).unwrap();

        let samples = [
            sample(vec3(0.0, 0.0, 0.0), 1.0),
            sample(vec3(5.0, 0.0, 0.0), 1.0),
            sample(vec3(9.0, 0.0, 0.0), 1.0),
        ];

        harness.frame(&mut target, &samples);

        let tiles = target.primary().tiles().to_vec();

        harness.frame(&mut target, &[]);
        harness.frame(&mut target, &[]);

        let stats = target.stats().unwrap().clone();

        assert_eq!(Frame::new(0), stats.frame);
        assert_eq!(vec![0, 1], stats.bucket_occupancy);
        assert_eq!(2, stats.overflowed);
        assert_eq!(1, stats.bucket_overflow[2]);
        assert_eq!(1, stats.used_buckets);
        assert_relative_eq!(stats.load_factor(), 1.0);

        // Only decay has changed in the meantime
        for (a, b) in tiles.iter().zip(target.primary().tiles()) {
            assert_eq!(a.key, b.key);
        }
    }

    #[test]
    fn debug_cells() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut target = HashGridCache::new(&device, &config(2, 4)).unwrap();

        harness.frame(&mut target, &[sample(Vec3::ZERO, 2.0)]);

        let args = target.build_debug_cells().unwrap();

        assert_eq!(1, args.instance_count);
        assert_eq!(36, args.vertex_count);
        assert_relative_eq!(target.debug_cells()[0].radiance.x, 2.0);
    }

    #[test]
    fn debug_cells_are_opt_in() {
        let device = Device::default();
        let mut harness = Harness::new();
        let mut config = config(2, 4);

        config.hash_grid_cache.debug_cells = false;

        let mut target = HashGridCache::new(&device, &config).unwrap();

        harness.frame(&mut target, &[sample(Vec3::ZERO, 2.0)]);

        assert!(target.build_debug_cells().is_none());
        assert!(target.debug_cells().is_empty());
    }

    #[test]
    fn default_config_fits_within_device_limits() {
        let device = Device::default();
        let target = HashGridCache::new(&device, &GiConfig::default());

        assert!(target.is_ok());
        assert!(device.allocated() <= device.budget());
    }
}
