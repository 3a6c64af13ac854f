use std::f32::consts::PI;
use std::mem;

use glam::{UVec2, Vec3, Vec4, Vec4Swizzles};
use irradia_gpu::{
    lerp, routes_to_multibounce, F32Ext, Noise, Ray, Reprojection,
    IRRADIA_EPSILON,
};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{
    Buffer, CacheSample, Device, FrameContext, FrameReprojection, GiConfig,
    GiDenoiser, GlossyReflections, HashGridCache, Kernel, PopulateReport,
    RayHit, ReservoirHit, ReservoirResampler, ReservoirStats, Result,
    ScreenProbes, TraceFlags, Tracer,
};

/// What has happened during the latest [`Gi::render()`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GiStats {
    pub live_probes: u32,
    pub rays: u32,

    /// Rays whose secondary vertex has gathered multi-bounce lighting.
    pub multibounce_rays: u32,

    pub cache: PopulateReport,
    pub multibounce_cache: PopulateReport,
    pub purged_tiles: u32,
    pub reservoirs: ReservoirStats,
    pub blurred_pixels: u32,
    pub glossy_samples: u32,
}

/// Indirect lighting, computed by tracing screen-space probes against a
/// world-space radiance cache.
///
/// Each frame goes through:
///
/// - reprojection of the previous frame,
/// - probe spawning, compaction and tracing,
/// - shading of the probe rays' hits (through the reservoirs, if enabled),
/// - updating the radiance caches with the shaded hits,
/// - interpolating probes into pixels, followed by denoising,
/// - tracing glossy reflections,
/// - combining everything into the irradiance buffer.
#[derive(Debug)]
pub struct Gi {
    config: GiConfig,
    size: UVec2,
    rng: StdRng,
    reprojection: FrameReprojection,
    screen_probes: ScreenProbes,
    hash_grid_cache: HashGridCache,
    reservoirs: ReservoirResampler,
    glossy_reflections: GlossyReflections,
    gi_denoiser: GiDenoiser,

    /// Secondary hits of probe rays routed into the multibounce cache; `None`
    /// for rays that weren't routed or whose secondary ray has missed.
    bounces: Vec<Option<RayHit>>,

    reservoir_hits: Vec<ReservoirHit>,
    cache_samples: Vec<CacheSample>,
    multibounce_samples: Vec<CacheSample>,
    interpolated: Buffer<Vec4>,

    /// x, y, z - irradiance
    /// w - history length
    irradiance: Buffer<Vec4>,

    stats: GiStats,
}

impl Gi {
    const TRACE_BOUNCES: Kernel = Kernel::new("gi_trace_bounces", 64);
    const SHADE_RAYS: Kernel = Kernel::new("gi_shade_rays", 64);
    const COMBINE_DIFFUSE: Kernel = Kernel::new("gi_combine_diffuse", 8);
    const COMBINE_SPECULAR: Kernel = Kernel::new("gi_combine_specular", 8);

    pub fn new(
        device: &Device,
        config: GiConfig,
        size: UVec2,
    ) -> Result<Self> {
        config.validate()?;

        info!("Initializing; size={size}");

        let pixel_count = (size.x * size.y) as usize;
        let screen_probes = ScreenProbes::new(device, &config, size)?;
        let probe_count = screen_probes.probe_count();

        let max_rays = (probe_count.x * probe_count.y) as usize
            * config.screen_probes.sampling_mode.rays_per_probe() as usize;

        let this = Self {
            rng: StdRng::seed_from_u64(config.seed),
            reprojection: FrameReprojection::new(device, pixel_count)?,
            screen_probes,
            hash_grid_cache: HashGridCache::new(device, &config)?,
            reservoirs: ReservoirResampler::new(
                device,
                &config,
                2 * max_rays,
            )?,
            glossy_reflections: GlossyReflections::new(device, &config, size)?,
            gi_denoiser: GiDenoiser::new(
                device,
                &config.gi_denoiser,
                pixel_count,
            )?,
            bounces: Vec::with_capacity(max_rays),
            reservoir_hits: Vec::with_capacity(2 * max_rays),
            cache_samples: Vec::with_capacity(max_rays),
            multibounce_samples: Vec::with_capacity(max_rays),
            interpolated: device
                .create_buffer("irradia_interpolated_probes", pixel_count)?,
            irradiance: device
                .create_buffer("irradia_irradiance", pixel_count)?,
            stats: Default::default(),
            config,
            size,
        };

        info!("Initialized; allocated={} bytes", device.allocated());

        Ok(this)
    }

    /// Applies a new configuration.
    ///
    /// Changes that affect allocations (cache capacity, probe density etc.)
    /// recreate the whole technique, dropping all of the temporal state;
    /// other changes are applied in place.
    pub fn update_config(
        &mut self,
        device: &Device,
        config: GiConfig,
    ) -> Result<()> {
        config.validate()?;

        if config == self.config {
            return Ok(());
        }

        if self.config.is_invalidated_by(&config) {
            info!("Configuration changed; recreating buffers");

            *self = Self::new(device, config, self.size)?;
            return Ok(());
        }

        debug!("Configuration changed; updating in place");

        self.screen_probes.update_config(&config);
        self.hash_grid_cache.update_config(&config);
        self.reservoirs.update_config(&config);
        self.glossy_reflections.update_config(&config);
        self.gi_denoiser.update_config(&config.gi_denoiser);
        self.config = config;

        Ok(())
    }

    /// Recreates the technique for a new screen size.
    pub fn resize(&mut self, device: &Device, size: UVec2) -> Result<()> {
        if size == self.size {
            return Ok(());
        }

        info!("Resizing: {} -> {size}", self.size);

        *self = Self::new(device, self.config.clone(), size)?;

        Ok(())
    }

    /// Drops all of the temporal state (caches, histories, probes), e.g.
    /// after the camera has been teleported.
    pub fn clear(&mut self) {
        info!("Clearing");

        self.reprojection.clear();
        self.screen_probes.clear();
        self.hash_grid_cache.clear();
        self.reservoirs.clear();
        self.glossy_reflections.clear();
        self.gi_denoiser.clear();
        self.irradiance.clear();
    }

    pub fn config(&self) -> &GiConfig {
        &self.config
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn stats(&self) -> GiStats {
        self.stats
    }

    pub fn reprojections(&self) -> &[Reprojection] {
        self.reprojection.reprojections()
    }

    pub fn screen_probes(&self) -> &ScreenProbes {
        &self.screen_probes
    }

    pub fn hash_grid_cache(&self) -> &HashGridCache {
        &self.hash_grid_cache
    }

    /// Gives mutable access to the cache, e.g. to build its debug view.
    pub fn hash_grid_cache_mut(&mut self) -> &mut HashGridCache {
        &mut self.hash_grid_cache
    }

    pub fn reservoirs(&self) -> &ReservoirResampler {
        &self.reservoirs
    }

    pub fn glossy_reflections(&self) -> &GlossyReflections {
        &self.glossy_reflections
    }

    pub fn gi_denoiser(&self) -> &GiDenoiser {
        &self.gi_denoiser
    }

    /// Returns the irradiance computed by the latest [`Self::render()`].
    pub fn irradiance(&self) -> &[Vec4] {
        &self.irradiance
    }

    /// Renders a frame, returning the irradiance buffer (with history length
    /// in alpha).
    pub fn render(
        &mut self,
        ctx: &FrameContext,
        tracer: &impl Tracer,
    ) -> &[Vec4] {
        if ctx.size() != self.size {
            error!(
                "Frame has size {}, but the technique has been created for \
                 {}; skipping",
                ctx.size(),
                self.size
            );

            self.irradiance.clear();
            return &self.irradiance;
        }

        let seed = self.rng.gen::<u32>() ^ ctx.frame.get();

        let flags = TraceFlags {
            disable_alpha_testing: self.config.disable_alpha_testing,
        };

        self.stats = Default::default();
        self.reprojection.run(ctx);
        self.hash_grid_cache.begin_frame(ctx);

        // ---------------------------------------------------------------------

        self.screen_probes.reproject(ctx);
        self.screen_probes.spawn(ctx, seed);
        self.stats.live_probes = self.screen_probes.compact();
        self.screen_probes.generate_rays(seed);
        self.screen_probes.trace(tracer, flags);
        self.stats.rays = self.screen_probes.rays().len() as u32;

        // ---------------------------------------------------------------------

        self.trace_bounces(tracer, flags, seed);
        self.generate_reservoirs(ctx, seed);
        self.shade_rays(ctx, tracer, seed);
        self.update_cache();

        // ---------------------------------------------------------------------

        self.screen_probes.sample_and_interpolate(
            ctx,
            &self.hash_grid_cache,
            &mut self.interpolated,
        );

        self.gi_denoiser.denoise(
            ctx,
            self.reprojection.reprojections(),
            &self.interpolated,
        );

        self.stats.blurred_pixels = self.gi_denoiser.blurred_pixels();
        self.combine_diffuse(ctx, tracer, seed);

        // ---------------------------------------------------------------------

        self.glossy_reflections.trace(
            ctx,
            tracer,
            &self.hash_grid_cache,
            &self.irradiance,
            flags,
            seed,
        );

        self.glossy_reflections
            .denoise(ctx, self.reprojection.reprojections());

        self.stats.glossy_samples = self.glossy_reflections.sample_count();
        self.combine_specular(ctx);

        // ---------------------------------------------------------------------

        self.screen_probes.end_frame();
        self.hash_grid_cache.end_frame();
        self.reservoirs.end_frame();
        self.glossy_reflections.end_frame();
        self.gi_denoiser.end_frame();

        debug!("Frame rendered: {:?}", self.stats);

        &self.irradiance
    }

    /// Picks probe rays that gather multi-bounce lighting and traces their
    /// secondary rays.
    fn trace_bounces(
        &mut self,
        tracer: &impl Tracer,
        flags: TraceFlags,
        seed: u32,
    ) {
        let use_multibounce = self.config.use_multibounce;

        let discard_probability = self
            .config
            .hash_grid_cache
            .discard_multibounce_ray_probability;

        let rays = self.screen_probes.rays_mut();
        let bounces = &mut self.bounces;
        let mut multibounce_rays = 0;

        bounces.clear();
        bounces.resize(rays.len(), None);

        Self::TRACE_BOUNCES.run(rays.len() as u32, |id| {
            let ray = &mut rays[id as usize];

            ray.is_multibounce = 0;

            if !use_multibounce || !ray.is_hit() {
                return;
            }

            let mut noise = Noise::from_id(seed, id);

            if !routes_to_multibounce(&mut noise, discard_probability) {
                return;
            }

            ray.is_multibounce = 1;
            multibounce_rays += 1;

            let origin = ray.hit_position
                + ray.hit_normal
                    * (IRRADIA_EPSILON * ray.hit_distance.max(1.0));

            let direction = noise.sample_hemisphere(ray.hit_normal);

            bounces[id as usize] =
                tracer.trace(&Ray::new(origin, direction), flags);
        });

        self.stats.multibounce_rays = multibounce_rays;
    }

    /// Generates reservoirs for all of the points shaded this frame, i.e.
    /// probe rays' hits and their secondary hits.
    fn generate_reservoirs(&mut self, ctx: &FrameContext, seed: u32) {
        if !self.reservoirs.is_enabled() {
            return;
        }

        let rays = self.screen_probes.rays();

        self.reservoir_hits.clear();

        self.reservoir_hits.extend(
            rays.iter()
                .filter(|ray| ray.is_hit())
                .map(|ray| ReservoirHit {
                    position: ray.hit_position,
                    normal: ray.hit_normal,
                })
                .chain(self.bounces.iter().flatten().map(|hit| {
                    ReservoirHit {
                        position: hit.position,
                        normal: hit.normal,
                    }
                })),
        );

        let spatial = self.config.reservoirs.spatial_samples > 0;

        self.reservoirs.begin_frame(ctx);
        self.reservoirs.generate(ctx, &self.reservoir_hits, seed);
        self.reservoirs.compact();
        self.reservoirs.resample(ctx, seed, spatial, true);
        self.stats.reservoirs = self.reservoirs.stats();
    }

    /// Computes light reflected from the probe rays' hits.
    fn shade_rays(
        &mut self,
        ctx: &FrameContext,
        tracer: &impl Tracer,
        seed: u32,
    ) {
        let config = &self.config;
        let sky_radiance = config.sky_radiance;
        let use_feedback = config.use_temporal_multibounce_feedback;
        let reservoirs = &self.reservoirs;
        let cache = &self.hash_grid_cache;
        let bounces = &self.bounces;
        let rays = self.screen_probes.rays_mut();

        Self::SHADE_RAYS.run(rays.len() as u32, |id| {
            let ray = &mut rays[id as usize];

            if !ray.is_hit() {
                ray.direct = Vec3::ZERO;
                ray.multibounce = Vec3::ZERO;
                return;
            }

            let mut noise = Noise::from_id(!seed, id);

            let irradiance = reservoirs.direct_irradiance(
                ctx,
                tracer,
                ray.hit_position,
                ray.hit_normal,
                &mut noise,
            );

            let albedo = config.surface_albedo(ray.hit_albedo);

            ray.direct = albedo / PI * irradiance;

            ray.multibounce = if ray.is_multibounce == 0 {
                cache.query_multibounce(ray.hit_position, ray.hit_normal)
            } else {
                // Cosine-weighted secondary ray, so the estimator of light
                // reflected from the primary hit boils down to albedo times
                // radiance arriving from the secondary one
                let radiance = match bounces[id as usize] {
                    Some(hit) => {
                        let irradiance = reservoirs.direct_irradiance(
                            ctx,
                            tracer,
                            hit.position,
                            hit.normal,
                            &mut noise,
                        );

                        let feedback = if use_feedback {
                            cache.query_multibounce(hit.position, hit.normal)
                        } else {
                            Vec3::ZERO
                        };

                        config.surface_albedo(hit.albedo) / PI * irradiance
                            + feedback
                    }

                    None => sky_radiance,
                };

                albedo * radiance
            };
        });
    }

    /// Accumulates shaded hits into the caches and performs the cache's
    /// housekeeping.
    fn update_cache(&mut self) {
        let mut cache_samples = mem::take(&mut self.cache_samples);
        let mut multibounce_samples =
            mem::take(&mut self.multibounce_samples);

        cache_samples.clear();
        multibounce_samples.clear();

        for ray in self.screen_probes.rays().iter().filter(|ray| ray.is_hit())
        {
            cache_samples.push(CacheSample {
                position: ray.hit_position,
                normal: ray.hit_normal,
                radiance: ray.direct,
            });

            if ray.is_multibounce != 0 {
                multibounce_samples.push(CacheSample {
                    position: ray.hit_position,
                    normal: ray.hit_normal,
                    radiance: ray.multibounce,
                });
            }
        }

        self.stats.cache = self.hash_grid_cache.populate(&cache_samples);

        self.stats.multibounce_cache = self
            .hash_grid_cache
            .populate_multibounce(&multibounce_samples);

        self.hash_grid_cache.resolve();
        self.hash_grid_cache.decay_and_evict();
        self.stats.purged_tiles = self.hash_grid_cache.purge_stale_tiles();
        self.hash_grid_cache.update_stats();

        self.cache_samples = cache_samples;
        self.multibounce_samples = multibounce_samples;
    }

    /// Writes denoised diffuse irradiance into the output, together with
    /// direct lighting (if enabled).
    fn combine_diffuse(
        &mut self,
        ctx: &FrameContext,
        tracer: &impl Tracer,
        seed: u32,
    ) {
        let use_direct_lighting = self.config.use_direct_lighting;
        let indirect = self.gi_denoiser.output();
        let reservoirs = &self.reservoirs;
        let irradiance = &mut self.irradiance;

        Self::COMBINE_DIFFUSE.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let entry = ctx.gbuffer.get(pixel);
            let indirect = indirect[idx];

            if !entry.is_some() {
                irradiance[idx] = Vec4::ZERO;
                return;
            }

            let direct = if use_direct_lighting {
                let mut noise = Noise::new(seed, pixel);

                reservoirs.direct_irradiance(
                    ctx,
                    tracer,
                    ctx.position(pixel),
                    entry.normal,
                    &mut noise,
                )
            } else {
                Vec3::ZERO
            };

            irradiance[idx] = (indirect.xyz() + direct).extend(indirect.w);
        });
    }

    /// Blends glossy reflections into the output, depending on surfaces'
    /// roughness.
    fn combine_specular(&mut self, ctx: &FrameContext) {
        if !self.glossy_reflections.is_enabled() {
            return;
        }

        let config = &self.config.glossy_reflections;
        let reflections = self.glossy_reflections.reflections();
        let irradiance = &mut self.irradiance;

        Self::COMBINE_SPECULAR.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let reflection = reflections[idx];

            if reflection.w == 0.0 {
                return;
            }

            let specular = 1.0
                - ctx.gbuffer.get(pixel).roughness.smoothstep(
                    config.low_roughness_threshold,
                    config.high_roughness_threshold,
                );

            // Radiance of a reflection, expressed as irradiance that a
            // lambertian surface would need to reflect the same amount
            let diffuse = irradiance[idx];
            let reflected =
                lerp(diffuse.xyz(), reflection.xyz() * PI, specular);

            irradiance[idx] = reflected.extend(diffuse.w);
        });
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::uvec2;
    use irradia_gpu::ProbeSamplingMode;

    use super::*;
    use crate::test_utils::{Plane, TestScene};
    use crate::Error;

    fn config() -> GiConfig {
        let mut config = GiConfig {
            sky_radiance: Vec3::ONE,
            ..Default::default()
        };

        config.hash_grid_cache.num_buckets = 8;
        config.reservoirs.num_cells = 256;
        config.reservoirs.num_entries_per_cell = 4;
        config.screen_probes.sampling_mode = ProbeSamplingMode::QuarterSpp;
        config.screen_probes.cached_tile_capacity = 64;
        config
    }

    fn render_frames(
        gi: &mut Gi,
        scene: &mut TestScene,
        frames: usize,
    ) -> Vec<Vec4> {
        let mut irradiance = Vec::new();

        for _ in 0..frames {
            irradiance = gi.render(&scene.ctx(), &*scene).to_vec();
            scene.next_frame();
        }

        irradiance
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = config();

        config.gi_denoiser.max_history = 0.0;

        let result = Gi::new(&Device::default(), config, uvec2(16, 16));

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn reports_running_out_of_memory() {
        let device = Device::new(Default::default(), 1024);
        let result = Gi::new(&device, config(), uvec2(16, 16));

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    }

    #[test]
    fn open_sky_gives_uniform_irradiance() {
        let mut config = config();

        config.use_direct_lighting = false;
        config.screen_probes.sampling_mode = ProbeSamplingMode::OneSpp;

        let mut scene = TestScene::new(
            vec![Plane {
                point: Vec3::ZERO,
                normal: Vec3::Y,
                albedo: Vec3::splat(0.8),
                roughness: 1.0,
            }],
            Vec::new(),
            uvec2(16, 16),
        );

        let device = Device::default();
        let mut gi = Gi::new(&device, config, scene.size()).unwrap();
        let irradiance = render_frames(&mut gi, &mut scene, 4);

        for (idx, entry) in scene.gbuffer.entries().iter().enumerate() {
            if entry.is_some() {
                assert_relative_eq!(irradiance[idx].x, PI, epsilon = 0.5);
                assert!(irradiance[idx].w >= 1.0);
            } else {
                assert_eq!(Vec4::ZERO, irradiance[idx]);
            }
        }
    }

    #[test]
    fn room_gets_lit() {
        for use_resampling in [false, true] {
            let mut config = config();

            config.use_resampling = use_resampling;
            config.use_bypass_cache = false;
            config.use_direct_lighting = false;
            config.screen_probes.cached_tile_max_age = 0;

            let mut scene = TestScene::room(uvec2(16, 16));
            let device = Device::default();
            let mut gi = Gi::new(&device, config, scene.size()).unwrap();
            let irradiance = render_frames(&mut gi, &mut scene, 6);

            assert!(irradiance.iter().all(|i| i.is_finite()));
            assert!(irradiance.iter().all(|i| i.min_element() >= 0.0));
            assert!(irradiance.iter().any(|i| i.x > 0.0));

            let stats = gi.stats();

            assert_eq!(4, stats.live_probes);
            assert_eq!(4 * 16, stats.rays);
            assert!(stats.cache.accepted > 0);
            assert_eq!(0, stats.cache.overflowed);
            assert!(gi.hash_grid_cache().primary().live_tile_count() > 0);

            if use_resampling {
                assert!(stats.reservoirs.candidates > 0);
            } else {
                assert_eq!(0, stats.reservoirs.candidates);
            }
        }
    }

    #[test]
    fn default_config_initializes() {
        let device = Device::default();
        let gi = Gi::new(&device, GiConfig::default(), uvec2(64, 64));

        assert!(gi.is_ok());
        assert!(device.allocated() <= device.budget());
    }

    #[test]
    fn disabled_albedo_textures_brighten_bounced_light() {
        let mut config = config();

        config.use_direct_lighting = false;
        config.screen_probes.cached_tile_max_age = 0;

        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut gi = Gi::new(&device, config.clone(), scene.size()).unwrap();
        let textured = render_frames(&mut gi, &mut scene, 4);

        config.disable_albedo_textures = true;

        let mut scene = TestScene::room(uvec2(16, 16));
        let mut gi = Gi::new(&device, config, scene.size()).unwrap();
        let white = render_frames(&mut gi, &mut scene, 4);

        let sum = |irradiance: &[Vec4]| {
            irradiance.iter().map(|i| i.xyz().dot(Vec3::ONE)).sum::<f32>()
        };

        assert!(sum(&textured) > 0.0);
        assert!(sum(&white) > sum(&textured));
    }

    #[test]
    fn direct_lighting_adds_up() {
        let mut config = config();

        config.use_direct_lighting = false;

        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut gi = Gi::new(&device, config.clone(), scene.size()).unwrap();
        let indirect = render_frames(&mut gi, &mut scene, 1);

        config.use_direct_lighting = true;

        let mut scene = TestScene::room(uvec2(16, 16));
        let mut gi = Gi::new(&device, config, scene.size()).unwrap();
        let total = render_frames(&mut gi, &mut scene, 1);

        let sum = |irradiance: &[Vec4]| {
            irradiance.iter().map(|i| i.xyz().dot(Vec3::ONE)).sum::<f32>()
        };

        assert!(sum(&total) > sum(&indirect));
    }

    #[test]
    fn update_config() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut gi = Gi::new(&device, config(), scene.size()).unwrap();

        render_frames(&mut gi, &mut scene, 2);

        let live_tiles = gi.hash_grid_cache().primary().live_tile_count();

        assert!(live_tiles > 0);

        // Doesn't affect allocations, so the cache survives
        let mut new_config = config();

        new_config.use_resampling = true;
        new_config.hash_grid_cache.max_sample_count = 8.0;

        gi.update_config(&device, new_config.clone()).unwrap();

        assert!(gi.config().use_resampling);

        assert_eq!(
            live_tiles,
            gi.hash_grid_cache().primary().live_tile_count()
        );

        // Affects allocations, so everything gets recreated
        new_config.hash_grid_cache.num_buckets = 6;

        gi.update_config(&device, new_config.clone()).unwrap();

        assert_eq!(0, gi.hash_grid_cache().primary().live_tile_count());

        // Invalid configs are rejected, leaving the technique intact
        new_config.glossy_reflections.low_roughness_threshold = 1.0;

        assert!(gi.update_config(&device, new_config).is_err());
        assert_eq!(6, gi.config().hash_grid_cache.num_buckets);
    }

    #[test]
    fn frames_of_unexpected_size_are_skipped() {
        let device = Device::default();
        let scene = TestScene::room(uvec2(16, 16));
        let mut gi = Gi::new(&device, config(), uvec2(32, 32)).unwrap();
        let irradiance = gi.render(&scene.ctx(), &scene);

        assert_eq!(32 * 32, irradiance.len());
        assert!(irradiance.iter().all(|i| *i == Vec4::ZERO));
    }

    #[test]
    fn rendering_is_deterministic() {
        let device = Device::default();

        let render = || {
            let mut scene = TestScene::room(uvec2(16, 16));
            let mut gi = Gi::new(&device, config(), scene.size()).unwrap();

            render_frames(&mut gi, &mut scene, 3)
        };

        assert_eq!(render(), render());
    }

    #[test]
    fn mirror_reflects_sky() {
        let mut config = config();

        config.use_direct_lighting = false;
        config.glossy_reflections.halfres = false;

        let mut scene = TestScene::new(
            vec![Plane {
                point: Vec3::ZERO,
                normal: Vec3::Y,
                albedo: Vec3::splat(0.8),
                roughness: 0.0,
            }],
            Vec::new(),
            uvec2(16, 16),
        );

        let device = Device::default();
        let mut gi = Gi::new(&device, config, scene.size()).unwrap();
        let irradiance = render_frames(&mut gi, &mut scene, 2);

        // Mirror sees the sky (radiance of 1.0), which corresponds to the
        // irradiance of pi
        for (idx, entry) in scene.gbuffer.entries().iter().enumerate() {
            if entry.is_some() {
                assert_relative_eq!(irradiance[idx].x, PI, epsilon = 0.001);
            }
        }

        assert!(gi.stats().glossy_samples > 0);
    }
}
