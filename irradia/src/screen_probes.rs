//! Sparse screen-space probes gathering indirect lighting.
//!
//! Each 8x8 screen tile holds (at most) one probe; a probe survives across
//! frames through reprojection and gets (re)spawned on a random pixel of its
//! tile when reprojection fails.

mod tile_cache;

use glam::{ivec2, uvec2, IVec2, UVec2, Vec2, Vec3, Vec4};
use irradia_gpu::{
    Noise, Probe, ProbeRay, Ray, SphericalHarmonics, Surface, INVALID_ID,
    IRRADIA_EPSILON, PROBE_SIZE,
};
use log::{debug, error};

pub use self::tile_cache::*;
use crate::{
    dispatch, Buffer, CountBuffer, Device, DoubleBuffered, FrameContext,
    GiConfig, HashGridCache, Kernel, Result, ScreenProbesConfig, TraceFlags,
    Tracer,
};

#[derive(Debug)]
pub struct ScreenProbes {
    config: ScreenProbesConfig,
    use_temporal_feedback: bool,
    use_bypass_cache: bool,
    sky_radiance: Vec3,
    probe_count: UVec2,
    probes: DoubleBuffered<Buffer<Probe>>,

    /// Non-zero for tiles holding a valid probe.
    masks: DoubleBuffered<Buffer<u32>>,

    /// Relative depth error of the probe reprojected onto given tile; when
    /// many probes land on the same tile, the most accurate one wins.
    reprojection_errors: Buffer<f32>,

    /// Probes that need tracing during current frame.
    live_probes: Buffer<u32>,
    live_probe_count: CountBuffer,

    /// x - index of probe's first ray
    /// y - number of probe's rays
    probe_rays: Buffer<UVec2>,

    rays: Buffer<ProbeRay>,
    ray_count: CountBuffer,
    tile_cache: ProbeTileCache,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeState {
    Empty,
    Spawned,
    Reprojected,
    Cached,
}

impl ScreenProbes {
    pub const MAX_HISTORY: f32 = 16.0;

    const REPROJECT: Kernel = Kernel::new("screen_probes_reproject", 64);
    const SPAWN: Kernel = Kernel::new("screen_probes_spawn", 64);
    const COMPACT: Kernel = Kernel::new("screen_probes_compact", 64);
    const GENERATE_RAYS: Kernel =
        Kernel::new("screen_probes_generate_rays", 64);
    const TRACE: Kernel = Kernel::new("screen_probes_trace", 64);
    const SAMPLE: Kernel = Kernel::new("screen_probes_sample", 64);
    const INTERPOLATE: Kernel = Kernel::new("screen_probes_interpolate", 8);

    /// Number of random pixels tried before scanning the entire tile.
    const SPAWN_ATTEMPTS: u32 = 4;

    pub fn new(
        device: &Device,
        config: &GiConfig,
        size: UVec2,
    ) -> Result<Self> {
        let probe_count = (size + PROBE_SIZE - 1) / PROBE_SIZE;
        let num_probes = (probe_count.x * probe_count.y) as usize;

        let max_rays = num_probes
            * config.screen_probes.sampling_mode.rays_per_probe() as usize;

        debug!(
            "Creating screen probes: count={probe_count}, max_rays={max_rays}"
        );

        Ok(Self {
            config: config.screen_probes.clone(),
            use_temporal_feedback: config.use_temporal_feedback,
            use_bypass_cache: config.use_bypass_cache,
            sky_radiance: config.sky_radiance,
            probe_count,
            probes: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_probes_{suffix}"),
                    num_probes,
                )
            })?,
            masks: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_probe_masks_{suffix}"),
                    num_probes,
                )
            })?,
            reprojection_errors: device.create_buffer(
                "irradia_probe_reprojection_errors",
                num_probes,
            )?,
            live_probes: device
                .create_buffer("irradia_live_probes", num_probes)?,
            live_probe_count: device
                .create_count_buffer("irradia_live_probe_count")?,
            probe_rays: device
                .create_buffer("irradia_probe_rays", num_probes)?,
            rays: device.create_buffer("irradia_probe_ray_buffer", max_rays)?,
            ray_count: device.create_count_buffer("irradia_probe_ray_count")?,
            tile_cache: ProbeTileCache::new(
                device,
                config.screen_probes.cached_tile_capacity,
            )?,
        })
    }

    /// Applies a configuration change that doesn't affect allocations.
    pub fn update_config(&mut self, config: &GiConfig) {
        self.config = config.screen_probes.clone();
        self.use_temporal_feedback = config.use_temporal_feedback;
        self.use_bypass_cache = config.use_bypass_cache;
        self.sky_radiance = config.sky_radiance;
    }

    pub fn probe_count(&self) -> UVec2 {
        self.probe_count
    }

    pub fn probes(&self) -> &[Probe] {
        self.probes.curr()
    }

    pub fn mask(&self) -> &[u32] {
        self.masks.curr()
    }

    pub fn tile_cache(&self) -> &ProbeTileCache {
        &self.tile_cache
    }

    /// Returns the rays traced during current frame.
    pub fn rays(&self) -> &[ProbeRay] {
        &self.rays[..self.ray_count.get_or_zero(self.rays.len())]
    }

    pub fn rays_mut(&mut self) -> &mut [ProbeRay] {
        let count = self.ray_count.get_or_zero(self.rays.len());

        &mut self.rays[..count]
    }

    pub fn probe_states(&self) -> Vec<ProbeState> {
        self.probes()
            .iter()
            .map(|probe| {
                if !probe.is_valid() {
                    ProbeState::Empty
                } else if probe.is_cached() {
                    ProbeState::Cached
                } else if probe.is_reprojected() {
                    ProbeState::Reprojected
                } else {
                    ProbeState::Spawned
                }
            })
            .collect()
    }

    /// Carries probes of the previous frame over into the current one.
    ///
    /// A probe survives only if it lands on a surface similar to the one it
    /// was spawned on; probes that go off-screen, land on the sky or get
    /// disoccluded are dropped and must be respawned.
    pub fn reproject(&mut self, ctx: &FrameContext) {
        self.probes.flip();
        self.masks.flip();

        let probe_count = self.probe_count;
        let (probes, prev_probes) = self.probes.split_mut();
        let (mask, prev_mask) = self.masks.split_mut();
        let errors = &mut self.reprojection_errors;
        let config = &self.config;

        probes.fill(Probe {
            cached_tile: INVALID_ID,
            ..Default::default()
        });

        mask.fill(0);
        errors.fill(f32::INFINITY);

        Self::REPROJECT.run(prev_probes.len() as u32, |id| {
            let prev_probe = prev_probes[id as usize];

            if prev_mask[id as usize] == 0 || !prev_probe.is_valid() {
                return;
            }

            let Some(screen_pos) =
                ctx.camera.world_to_screen(prev_probe.position)
            else {
                return;
            };

            let pixel = screen_pos.floor().as_ivec2();

            let Some(entry) = ctx.gbuffer.get_checked(pixel) else {
                return;
            };

            if !entry.is_some() {
                return;
            }

            // -----------------------------------------------------------------

            let expected_surface = Surface {
                normal: prev_probe.normal,
                depth: ctx.camera.depth_of(prev_probe.position),
            };

            if !entry.surface().matches(
                &expected_surface,
                config.depth_tolerance,
                config.normal_tolerance,
            ) {
                return;
            }

            let error = (entry.depth - expected_surface.depth).abs()
                / entry.depth.max(IRRADIA_EPSILON);

            let pixel = pixel.as_uvec2();
            let tile = pixel / PROBE_SIZE;

            if tile.x >= probe_count.x || tile.y >= probe_count.y {
                return;
            }

            let tile_idx = (tile.y * probe_count.x + tile.x) as usize;

            if error >= errors[tile_idx] {
                return;
            }

            // -----------------------------------------------------------------

            errors[tile_idx] = error;

            probes[tile_idx] = Probe {
                position: ctx.camera.world_position(pixel, entry.depth),
                depth: entry.depth,
                normal: entry.normal,
                history: prev_probe.history,
                pixel,
                cached_tile: INVALID_ID,
                flags: Probe::FLAG_VALID | Probe::FLAG_REPROJECTED,
                sh: prev_probe.sh,
            }
            .with_sampling_mode(config.sampling_mode);

            mask[tile_idx] = 1;
        });
    }

    /// Spawns probes on tiles that didn't receive any through reprojection.
    ///
    /// Reprojected probes whose tile has been traced recently enough are
    /// served from the tile cache instead of being traced again.
    pub fn spawn(&mut self, ctx: &FrameContext, seed: u32) {
        let probe_count = self.probe_count;
        let screen_size = ctx.size();
        let probes = self.probes.curr_mut();
        let mask = self.masks.curr_mut();
        let tile_cache = &mut self.tile_cache;
        let config = &self.config;

        Self::SPAWN.run(probes.len() as u32, |id| {
            let tile = uvec2(id % probe_count.x, id / probe_count.x);
            let probe = &mut probes[id as usize];

            if probe.is_valid() {
                if !probe.is_reprojected() {
                    return;
                }

                let Some((slot, cached)) = tile_cache.get(tile) else {
                    return;
                };

                let is_fresh = cached.age < config.cached_tile_max_age;

                let is_same_surface = cached.position.distance(probe.position)
                    <= config.depth_tolerance * probe.depth;

                if is_fresh && is_same_surface {
                    if let Some(cached) = tile_cache.reuse(slot) {
                        probe.sh = cached.sh;
                        probe.cached_tile = slot;
                        probe.flags |= Probe::FLAG_CACHED;
                    }
                }

                return;
            }

            // -----------------------------------------------------------------

            let origin = tile * PROBE_SIZE;
            let extent = (screen_size - origin).min(UVec2::splat(PROBE_SIZE));
            let mut noise = Noise::new(seed, tile);

            let random_pixels = (0..Self::SPAWN_ATTEMPTS).map(|_| {
                uvec2(
                    noise.sample_below(extent.x),
                    noise.sample_below(extent.y),
                )
            });

            let all_pixels = (0..extent.y)
                .flat_map(|y| (0..extent.x).map(move |x| uvec2(x, y)));

            let pixel = random_pixels
                .collect::<Vec<_>>()
                .into_iter()
                .chain(all_pixels)
                .map(|offset| origin + offset)
                .find(|&pixel| ctx.gbuffer.get(pixel).is_some());

            let Some(pixel) = pixel else {
                mask[id as usize] = 0;
                return;
            };

            let entry = ctx.gbuffer.get(pixel);

            *probe = Probe {
                position: ctx.position(pixel),
                depth: entry.depth,
                normal: entry.normal,
                history: 0.0,
                pixel,
                cached_tile: INVALID_ID,
                flags: Probe::FLAG_VALID,
                sh: Default::default(),
            }
            .with_sampling_mode(config.sampling_mode);

            mask[id as usize] = 1;
        });
    }

    /// Packs probes that need tracing; returns their number.
    pub fn compact(&mut self) -> u32 {
        let probes = self.probes.curr();
        let live_probes = &mut self.live_probes;
        let live_probe_count = &mut self.live_probe_count;

        live_probe_count.reset();

        Self::COMPACT.run(probes.len() as u32, |id| {
            let probe = probes[id as usize];

            if probe.is_valid() && !probe.is_cached() {
                live_probes[live_probe_count.fetch_add(1) as usize] = id;
            }
        });

        live_probe_count.get().unwrap_or(0)
    }

    /// Generates rays for all of the live probes.
    pub fn generate_rays(&mut self, seed: u32) {
        let probes = self.probes.curr();
        let live_probes = &self.live_probes;
        let probe_rays = &mut self.probe_rays;
        let rays = &mut self.rays;
        let ray_count = &mut self.ray_count;

        ray_count.reset();

        Self::GENERATE_RAYS.run_indirect(&self.live_probe_count, |id| {
            let probe_idx = live_probes[id as usize];
            let probe = probes[probe_idx as usize];
            let count = probe.sampling_mode().rays_per_probe();

            if ray_count.get_or_zero(rays.len()) + count as usize > rays.len()
            {
                probe_rays[probe_idx as usize] = UVec2::ZERO;
                return;
            }

            let first = ray_count.fetch_add(count);
            let mut noise = Noise::from_id(seed, probe_idx);

            for ray_idx in first..first + count {
                rays[ray_idx as usize] = ProbeRay {
                    direction: noise.sample_uniform_hemisphere(probe.normal),
                    probe: probe_idx,
                    hit_distance: -1.0,
                    ..Default::default()
                };
            }

            probe_rays[probe_idx as usize] = uvec2(first, count);
        });
    }

    /// Traces rays generated by [`Self::generate_rays()`].
    pub fn trace(&mut self, tracer: &impl Tracer, flags: TraceFlags) {
        let args = match dispatch::generate_dispatch_rays(&self.ray_count) {
            Ok(args) => args,

            Err(err) => {
                error!("Skipping `{}`: {}", Self::TRACE.label(), err);
                return;
            }
        };

        let probes = self.probes.curr();
        let rays = &mut self.rays;

        Self::TRACE.run(args.ray_count(), |id| {
            let ray = &mut rays[id as usize];
            let probe = probes[ray.probe as usize];

            let origin = probe.position
                + probe.normal * (IRRADIA_EPSILON * probe.depth.max(1.0));

            match tracer.trace(&Ray::new(origin, ray.direction), flags) {
                Some(hit) => {
                    ray.hit_position = hit.position;
                    ray.hit_distance = hit.distance.max(0.0);
                    ray.hit_normal = hit.normal;
                    ray.hit_roughness = hit.roughness;
                    ray.hit_albedo = hit.albedo;
                }

                None => {
                    ray.hit_distance = -1.0;
                }
            }
        });
    }

    /// Gathers radiance arriving at each traced probe (from the radiance
    /// cache or, when bypassing it, straight from the rays) and interpolates
    /// probes into per-pixel irradiance.
    ///
    /// Pixels without any valid probe nearby fall back to the nearest valid
    /// probe; if there are no valid probes at all, they get zero.
    pub fn sample_and_interpolate(
        &mut self,
        ctx: &FrameContext,
        cache: &HashGridCache,
        out: &mut [Vec4],
    ) {
        self.sample(cache);
        self.interpolate(ctx, out);
    }

    fn sample(&mut self, cache: &HashGridCache) {
        let probes = self.probes.curr_mut();
        let live_probes = &self.live_probes;
        let probe_rays = &self.probe_rays;
        let rays = &self.rays;
        let tile_cache = &mut self.tile_cache;
        let probe_count = self.probe_count;
        let use_bypass_cache = self.use_bypass_cache;
        let use_temporal_feedback = self.use_temporal_feedback;
        let sky_radiance = self.sky_radiance;

        Self::SAMPLE.run_indirect(&self.live_probe_count, |id| {
            let probe_idx = live_probes[id as usize];
            let probe = &mut probes[probe_idx as usize];
            let [first, count] = probe_rays[probe_idx as usize].to_array();

            if count == 0 {
                return;
            }

            let mut sh = SphericalHarmonics::default();

            for ray in &rays[first as usize..(first + count) as usize] {
                let radiance = if !ray.is_hit() {
                    sky_radiance
                } else {
                    let traced = ray.direct + ray.multibounce;

                    if use_bypass_cache {
                        traced
                    } else {
                        cache
                            .query(ray.hit_position, ray.hit_normal)
                            .unwrap_or(traced)
                    }
                };

                sh.add(ray.direction, radiance);
            }

            // Rays are distributed uniformly over the hemisphere
            let sh = sh.scale(2.0 * std::f32::consts::PI / count as f32);

            if use_temporal_feedback && probe.is_reprojected() {
                probe.history = (probe.history + 1.0).min(Self::MAX_HISTORY);
                probe.sh = probe.sh.lerp(sh, 1.0 / probe.history);
            } else {
                probe.history = 1.0;
                probe.sh = sh;
            }

            let tile =
                uvec2(probe_idx % probe_count.x, probe_idx / probe_count.x);

            probe.cached_tile = tile_cache
                .insert(tile, probe.position, probe.sh)
                .unwrap_or(INVALID_ID);
        });
    }

    fn interpolate(&self, ctx: &FrameContext, out: &mut [Vec4]) {
        let probes: &[Probe] = self.probes.curr();
        let mask: &[u32] = self.masks.curr();
        let probe_count = self.probe_count.as_ivec2();

        let probe_at = move |tile: IVec2| {
            if tile.x < 0
                || tile.y < 0
                || tile.x >= probe_count.x
                || tile.y >= probe_count.y
            {
                return None;
            }

            let idx = (tile.y * probe_count.x + tile.x) as usize;

            Some(&probes[idx]).filter(|_| mask[idx] != 0)
        };

        Self::INTERPOLATE.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let entry = ctx.gbuffer.get(pixel);

            if !entry.is_some() {
                out[idx] = Vec4::ZERO;
                return;
            }

            let position = ctx.position(pixel);
            let uv = (pixel.as_vec2() + 0.5) / PROBE_SIZE as f32 - 0.5;
            let base = uv.floor();
            let frac = uv - base;

            let mut irradiance = Vec3::ZERO;
            let mut weights = 0.0;

            for offset in [ivec2(0, 0), ivec2(1, 0), ivec2(0, 1), ivec2(1, 1)] {
                let Some(probe) = probe_at(base.as_ivec2() + offset) else {
                    continue;
                };

                let bilinear = {
                    let w = Vec2::select(
                        offset.as_vec2().cmpeq(Vec2::ZERO),
                        1.0 - frac,
                        frac,
                    );

                    (w.x * w.y).max(0.001)
                };

                let normal_weight =
                    entry.normal.dot(probe.normal).max(0.0).powi(8);

                let plane_weight = {
                    let distance =
                        entry.normal.dot(probe.position - position).abs();

                    (1.0 - distance / (0.1 * entry.depth)).max(0.0)
                };

                let weight = bilinear * normal_weight * plane_weight;

                irradiance += probe.sh.irradiance(entry.normal) * weight;
                weights += weight;
            }

            out[idx] = if weights > IRRADIA_EPSILON {
                (irradiance / weights).extend(1.0)
            } else if let Some(probe) =
                Self::find_nearest_probe(pixel, probe_count, &probe_at)
            {
                probe.sh.irradiance(entry.normal).extend(1.0)
            } else {
                Vec4::ZERO
            };
        });
    }

    /// Searches for the valid probe closest to given pixel, looking at
    /// rings of tiles of increasing radius.
    fn find_nearest_probe<'a>(
        pixel: UVec2,
        probe_count: IVec2,
        probe_at: &impl Fn(IVec2) -> Option<&'a Probe>,
    ) -> Option<&'a Probe> {
        let center = (pixel / PROBE_SIZE).as_ivec2();
        let max_radius = probe_count.max_element();

        for radius in 0..=max_radius {
            let mut nearest: Option<(&Probe, i32)> = None;

            for y in -radius..=radius {
                for x in -radius..=radius {
                    if x.abs() != radius && y.abs() != radius {
                        continue;
                    }

                    let Some(probe) = probe_at(center + ivec2(x, y)) else {
                        continue;
                    };

                    let dist = (probe.pixel.as_ivec2() - pixel.as_ivec2())
                        .length_squared();

                    if nearest.map_or(true, |(_, best)| dist < best) {
                        nearest = Some((probe, dist));
                    }
                }
            }

            if let Some((probe, _)) = nearest {
                return Some(probe);
            }
        }

        None
    }

    /// Finishes the frame, i.e. ages the tile cache and poisons the
    /// per-frame counts.
    pub fn end_frame(&mut self) {
        self.tile_cache.decay();
        self.live_probe_count.poison();
        self.ray_count.poison();
    }

    pub fn clear(&mut self) {
        debug!("Clearing screen probes");

        for probes in self.probes.iter_mut() {
            probes.clear();
        }

        for mask in self.masks.iter_mut() {
            mask.clear();
        }

        self.tile_cache.clear();
        self.live_probe_count.poison();
        self.ray_count.poison();
    }
}
