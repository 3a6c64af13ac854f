//! Glossy reflections, traced separately from the diffuse probes and
//! denoised with a temporal accumulation followed by an à-trous filter.

use std::f32::consts::PI;
use std::mem;

use glam::{ivec2, uvec2, IVec2, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use irradia_gpu::{
    lerp, F32Ext, Noise, Ray, Reprojection, Vec3Ext, IRRADIA_EPSILON,
};
use log::debug;

use crate::{
    Buffer, CountBuffer, Device, DoubleBuffered, FrameContext, GiConfig,
    GlossyDenoiserMode, GlossyReflectionsConfig, HashGridCache, Kernel,
    Result, TraceFlags, Tracer,
};

#[derive(Debug)]
pub struct GlossyReflections {
    config: GlossyReflectionsConfig,
    enabled: bool,
    use_screen_space_reflections: bool,
    disable_albedo_textures: bool,
    sky_radiance: Vec3,
    layout: TraceLayout,
    samples: Buffer<u32>,
    sample_count: CountBuffer,

    /// Raw reflections, at the tracing resolution.
    ///
    /// x, y, z - radiance
    /// w - 1.0 if traced
    traced: Buffer<Vec4>,

    /// Raw reflections, at the full resolution.
    specular: Buffer<Vec4>,

    fireflies: Buffer<f32>,
    standard_dev: Buffer<f32>,
    cleaned: Buffer<Vec4>,

    /// Filtered reflections.
    ///
    /// x, y, z - radiance
    /// w - history length
    reflections: DoubleBuffered<Buffer<Vec4>>,

    /// x - mean luma
    /// y - mean of squared luma
    average_squared: DoubleBuffered<Buffer<Vec2>>,

    scratch: Buffer<Vec4>,
    output: Buffer<Vec4>,
}

impl GlossyReflections {
    pub const MAX_HISTORY: f32 = 16.0;

    const GENERATE_SAMPLES: Kernel =
        Kernel::new("glossy_reflections_generate_samples", 8);
    const TRACE: Kernel = Kernel::new("glossy_reflections_trace", 64);
    const UPSAMPLE: Kernel = Kernel::new("glossy_reflections_upsample", 8);
    const REPROJECT: Kernel = Kernel::new("glossy_reflections_reproject", 8);
    const MARK_FIREFLIES: Kernel =
        Kernel::new("glossy_reflections_mark_fireflies", 8);
    const CLEANUP_FIREFLIES: Kernel =
        Kernel::new("glossy_reflections_cleanup_fireflies", 8);
    const BLEND: Kernel = Kernel::new("glossy_reflections_blend", 8);
    const ATROUS: Kernel = Kernel::new("glossy_reflections_atrous", 8);

    pub fn new(
        device: &Device,
        config: &GiConfig,
        size: UVec2,
    ) -> Result<Self> {
        let layout = TraceLayout::new(config.glossy_reflections.halfres, size);
        let pixels = (size.x * size.y) as usize;
        let trace_pixels = (layout.trace_size.x * layout.trace_size.y) as usize;

        debug!(
            "Creating glossy reflections: size={size}, trace_size={}",
            layout.trace_size
        );

        Ok(Self {
            config: config.glossy_reflections.clone(),
            enabled: !config.disable_specular_materials,
            use_screen_space_reflections: config.use_screen_space_reflections,
            disable_albedo_textures: config.disable_albedo_textures,
            sky_radiance: config.sky_radiance,
            layout,
            samples: device
                .create_buffer("irradia_glossy_rt_samples", trace_pixels)?,
            sample_count: device
                .create_count_buffer("irradia_glossy_rt_sample_count")?,
            traced: device
                .create_buffer("irradia_glossy_traced", trace_pixels)?,
            specular: device.create_buffer("irradia_glossy_specular", pixels)?,
            fireflies: device
                .create_buffer("irradia_glossy_fireflies", pixels)?,
            standard_dev: device
                .create_buffer("irradia_glossy_standard_dev", pixels)?,
            cleaned: device.create_buffer("irradia_glossy_cleaned", pixels)?,
            reflections: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_glossy_reflections_{suffix}"),
                    pixels,
                )
            })?,
            average_squared: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_glossy_average_squared_{suffix}"),
                    pixels,
                )
            })?,
            scratch: device.create_buffer("irradia_glossy_scratch", pixels)?,
            output: device.create_buffer("irradia_glossy_output", pixels)?,
        })
    }

    pub fn update_config(&mut self, config: &GiConfig) {
        self.config = config.glossy_reflections.clone();
        self.enabled = !config.disable_specular_materials;
        self.use_screen_space_reflections =
            config.use_screen_space_reflections;
        self.disable_albedo_textures = config.disable_albedo_textures;
        self.sky_radiance = config.sky_radiance;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns denoised reflections.
    pub fn reflections(&self) -> &[Vec4] {
        &self.output
    }

    /// Returns raw reflections, upsampled into the full resolution.
    pub fn specular(&self) -> &[Vec4] {
        &self.specular
    }

    pub fn fireflies(&self) -> &[f32] {
        &self.fireflies
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count.get().unwrap_or(0)
    }

    /// Traces reflections of surfaces glossier than the high roughness
    /// threshold.
    ///
    /// `irradiance` is this frame's diffuse irradiance, reused for hits that
    /// are visible on screen when screen-space reflections are enabled.
    pub fn trace(
        &mut self,
        ctx: &FrameContext,
        tracer: &impl Tracer,
        cache: &HashGridCache,
        irradiance: &[Vec4],
        flags: TraceFlags,
        seed: u32,
    ) {
        self.traced.clear();
        self.specular.clear();
        self.sample_count.reset();

        if !self.enabled {
            return;
        }

        self.layout.offset = if self.layout.halfres {
            [uvec2(0, 0), uvec2(1, 1), uvec2(1, 0), uvec2(0, 1)]
                [(ctx.frame.get() % 4) as usize]
        } else {
            UVec2::ZERO
        };

        let layout = self.layout;
        let high_threshold = self.config.high_roughness_threshold;
        let samples = &mut self.samples;
        let sample_count = &mut self.sample_count;

        Self::GENERATE_SAMPLES.run_2d(layout.trace_size, |trace_pixel| {
            let entry = ctx.gbuffer.get(layout.full_pixel(trace_pixel));

            if entry.is_some() && entry.roughness < high_threshold {
                samples[sample_count.fetch_add(1) as usize] =
                    layout.trace_idx(trace_pixel) as u32;
            }
        });

        // -----------------------------------------------------------------

        let reflection_tracer = ReflectionTracer {
            ctx,
            tracer,
            cache,
            irradiance,
            flags,
            seed,
            layout,
            sky_radiance: self.sky_radiance,
            use_screen_space_reflections: self.use_screen_space_reflections,
            disable_albedo_textures: self.disable_albedo_textures,
        };

        let samples = &self.samples;
        let traced = &mut self.traced;

        Self::TRACE.run_indirect(&self.sample_count, |id| {
            let trace_idx = samples[id as usize];

            let trace_pixel = uvec2(
                trace_idx % layout.trace_size.x,
                trace_idx / layout.trace_size.x,
            );

            traced[trace_idx as usize] =
                reflection_tracer.trace(trace_pixel).extend(1.0);
        });

        self.upsample(ctx);
    }

    fn upsample(&mut self, ctx: &FrameContext) {
        if !self.layout.halfres {
            self.specular.copy_from_slice(&self.traced);
            return;
        }

        let layout = self.layout;
        let traced = &self.traced;
        let specular = &mut self.specular;

        Self::UPSAMPLE.run_2d(layout.size, |pixel| {
            let entry = ctx.gbuffer.get(pixel);
            let base = (pixel / 2).as_ivec2();
            let mut sum = Vec3::ZERO;
            let mut weights = 0.0;

            for y in -1..=1 {
                for x in -1..=1 {
                    let trace_pixel = base + ivec2(x, y);

                    if !contains(layout.trace_size.as_ivec2(), trace_pixel) {
                        continue;
                    }

                    let trace_pixel = trace_pixel.as_uvec2();
                    let sample = traced[layout.trace_idx(trace_pixel)];

                    if sample.w == 0.0 {
                        continue;
                    }

                    let sample_entry =
                        ctx.gbuffer.get(layout.full_pixel(trace_pixel));

                    let weight = entry
                        .surface()
                        .evaluate_similarity_to(&sample_entry.surface());

                    sum += sample.xyz() * weight;
                    weights += weight;
                }
            }

            specular[ctx.idx(pixel)] = if weights > IRRADIA_EPSILON {
                (sum / weights).extend(1.0)
            } else {
                Vec4::ZERO
            };
        });
    }

    /// Denoises reflections traced by [`Self::trace()`]; with the denoiser
    /// disabled, raw reflections are passed through.
    pub fn denoise(
        &mut self,
        ctx: &FrameContext,
        reprojections: &[Reprojection],
    ) {
        self.reflections.flip();
        self.average_squared.flip();

        if !self.enabled {
            self.output.clear();
            self.reflections.curr_mut().clear();
            self.average_squared.curr_mut().clear();
            return;
        }

        match self.config.denoiser_mode {
            GlossyDenoiserMode::Disabled => {
                self.output.copy_from_slice(&self.specular);
                self.reflections.curr_mut().clear();
                self.average_squared.curr_mut().clear();
            }

            GlossyDenoiserMode::Atrous => {
                self.reproject(ctx, reprojections);
                self.mark_fireflies(ctx);
                self.cleanup_fireflies();
                self.blend();
                self.atrous(ctx);
            }
        }
    }

    fn reproject(
        &mut self,
        ctx: &FrameContext,
        reprojections: &[Reprojection],
    ) {
        let (reflections, prev_reflections) = self.reflections.split_mut();
        let (moments, prev_moments) = self.average_squared.split_mut();
        let standard_dev = &mut self.standard_dev;

        Self::REPROJECT.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let reprojection = reprojections[idx];

            if reprojection.is_none() {
                reflections[idx] = Vec4::ZERO;
                moments[idx] = Vec2::ZERO;
                standard_dev[idx] = 0.0;
                return;
            }

            let prev_idx = ctx
                .prev_camera
                .screen_to_idx(reprojection.prev_pos_round());

            let prev = prev_reflections.get(prev_idx).copied();
            let prev_moment = prev_moments.get(prev_idx).copied();

            let (Some(prev), Some(prev_moment)) = (prev, prev_moment) else {
                reflections[idx] = Vec4::ZERO;
                moments[idx] = Vec2::ZERO;
                standard_dev[idx] = 0.0;
                return;
            };

            reflections[idx] = prev;
            moments[idx] = prev_moment;

            standard_dev[idx] = if prev.w > 0.0 {
                (prev_moment.y - prev_moment.x.sqr()).max(0.0).sqrt()
            } else {
                0.0
            };
        });
    }

    fn mark_fireflies(&mut self, ctx: &FrameContext) {
        let config = &self.config;

        let (radius, low_threshold, high_threshold) = if config.halfres {
            (
                config.mark_fireflies_half_radius as i32,
                config.mark_fireflies_half_low_threshold,
                config.mark_fireflies_half_high_threshold,
            )
        } else {
            (
                config.mark_fireflies_full_radius as i32,
                config.mark_fireflies_full_low_threshold,
                config.mark_fireflies_full_high_threshold,
            )
        };

        let size = self.layout.size.as_ivec2();
        let specular = &self.specular;
        let standard_dev = &self.standard_dev;
        let fireflies = &mut self.fireflies;

        Self::MARK_FIREFLIES.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let center = specular[idx];

            if center.w == 0.0 {
                fireflies[idx] = 0.0;
                return;
            }

            let mut sum = 0.0;
            let mut sum_sqr = 0.0;
            let mut count = 0.0;

            for y in -radius..=radius {
                for x in -radius..=radius {
                    let neighbour = pixel.as_ivec2() + ivec2(x, y);

                    if (x == 0 && y == 0) || !contains(size, neighbour) {
                        continue;
                    }

                    let sample = specular[ctx.idx(neighbour.as_uvec2())];

                    if sample.w == 0.0 {
                        continue;
                    }

                    let luma = sample.xyz().luma();

                    sum += luma;
                    sum_sqr += luma * luma;
                    count += 1.0;
                }
            }

            if count == 0.0 {
                fireflies[idx] = 0.0;
                return;
            }

            let mean = sum / count;
            let sigma = (sum_sqr / count - mean * mean)
                .max(0.0)
                .sqrt()
                .max(standard_dev[idx]);

            let threshold = lerp(
                low_threshold,
                high_threshold,
                ctx.gbuffer.get(pixel).roughness.smoothstep(
                    config.low_roughness_threshold,
                    config.high_roughness_threshold,
                ),
            );

            let limit = mean + sigma * (1.0 + threshold) + IRRADIA_EPSILON;

            fireflies[idx] = (center.xyz().luma() > limit) as u32 as f32;
        });
    }

    fn cleanup_fireflies(&mut self) {
        if !self.config.cleanup_fireflies {
            self.cleaned.copy_from_slice(&self.specular);
            return;
        }

        let radius = if self.config.halfres {
            self.config.cleanup_fireflies_half_radius
        } else {
            self.config.cleanup_fireflies_full_radius
        } as i32;

        let size = self.layout.size;
        let specular = &self.specular;
        let fireflies = &self.fireflies;
        let cleaned = &mut self.cleaned;

        Self::CLEANUP_FIREFLIES.run_2d(size, |pixel| {
            let idx = (pixel.y * size.x + pixel.x) as usize;

            if fireflies[idx] == 0.0 {
                cleaned[idx] = specular[idx];
                return;
            }

            let mut sum = Vec3::ZERO;
            let mut count = 0.0;

            for y in -radius..=radius {
                for x in -radius..=radius {
                    let neighbour = pixel.as_ivec2() + ivec2(x, y);

                    if !contains(size.as_ivec2(), neighbour) {
                        continue;
                    }

                    let neighbour_idx =
                        (neighbour.y * size.x as i32 + neighbour.x) as usize;

                    let sample = specular[neighbour_idx];

                    if sample.w == 0.0 || fireflies[neighbour_idx] != 0.0 {
                        continue;
                    }

                    sum += sample.xyz();
                    count += 1.0;
                }
            }

            cleaned[idx] = if count > 0.0 {
                (sum / count).extend(1.0)
            } else {
                specular[idx]
            };
        });
    }

    fn blend(&mut self) {
        let size = self.layout.size;
        let cleaned = &self.cleaned;
        let reflections = self.reflections.curr_mut();
        let moments = self.average_squared.curr_mut();

        Self::BLEND.run_2d(size, |pixel| {
            let idx = (pixel.y * size.x + pixel.x) as usize;
            let curr = cleaned[idx];

            if curr.w == 0.0 {
                reflections[idx] = Vec4::ZERO;
                moments[idx] = Vec2::ZERO;
                return;
            }

            let prev = reflections[idx];
            let history = (prev.w + 1.0).min(Self::MAX_HISTORY);
            let alpha = 1.0 / history;
            let luma = curr.xyz().luma();

            reflections[idx] =
                lerp(prev.xyz(), curr.xyz(), alpha).extend(history);

            moments[idx] =
                lerp(moments[idx], Vec2::new(luma, luma * luma), alpha);
        });
    }

    fn atrous(&mut self, ctx: &FrameContext) {
        const KERNEL: [f32; 3] = [0.25, 0.5, 0.25];

        let radius = if self.layout.halfres {
            self.config.half_radius
        } else {
            self.config.full_radius
        };

        let pass_count = self.config.atrous_pass_count;
        let low_roughness_threshold = self.config.low_roughness_threshold;
        let size = self.layout.size.as_ivec2();

        self.output.copy_from_slice(self.reflections.curr());

        for pass in 0..pass_count {
            let step = radius
                .checked_shr(pass_count - 1 - pass)
                .unwrap_or(0)
                .max(1) as i32;
            let input = &self.output;
            let output = &mut self.scratch;
            let standard_dev = &self.standard_dev;

            Self::ATROUS.run_2d(ctx.size(), |pixel| {
                let idx = ctx.idx(pixel);
                let center = input[idx];
                let entry = ctx.gbuffer.get(pixel);

                if center.w == 0.0 || entry.roughness < low_roughness_threshold
                {
                    output[idx] = center;
                    return;
                }

                let center_luma = center.xyz().luma();
                let sigma = standard_dev[idx].max(0.01) * 4.0;
                let mut sum = Vec3::ZERO;
                let mut weights = 0.0;

                for y in -1..=1 {
                    for x in -1..=1 {
                        let neighbour = pixel.as_ivec2() + ivec2(x, y) * step;

                        if !contains(size, neighbour) {
                            continue;
                        }

                        let neighbour = neighbour.as_uvec2();
                        let sample = input[ctx.idx(neighbour)];

                        if sample.w == 0.0 {
                            continue;
                        }

                        let sample_entry = ctx.gbuffer.get(neighbour);

                        let normal_weight = entry
                            .normal
                            .dot(sample_entry.normal)
                            .max(0.0)
                            .powi(16);

                        let depth_weight = (-(entry.depth - sample_entry.depth)
                            .abs()
                            / (0.1 * entry.depth))
                            .exp();

                        let luma_weight = (-(sample.xyz().luma() - center_luma)
                            .abs()
                            / sigma)
                            .exp();

                        let weight = KERNEL[(x + 1) as usize]
                            * KERNEL[(y + 1) as usize]
                            * normal_weight
                            * depth_weight
                            * luma_weight;

                        sum += sample.xyz() * weight;
                        weights += weight;
                    }
                }

                output[idx] = if weights > IRRADIA_EPSILON {
                    (sum / weights).extend(center.w)
                } else {
                    center
                };
            });

            mem::swap(&mut self.output, &mut self.scratch);
        }

        // Next frame reprojects the filtered result
        self.reflections.curr_mut().copy_from_slice(&self.output);
    }

    pub fn end_frame(&mut self) {
        self.sample_count.poison();
    }

    pub fn clear(&mut self) {
        for reflections in self.reflections.iter_mut() {
            reflections.clear();
        }

        for moments in self.average_squared.iter_mut() {
            moments.clear();
        }

        self.output.clear();
        self.sample_count.poison();
    }
}

/// Describes how the traced pixels map onto the screen.
#[derive(Clone, Copy, Debug)]
struct TraceLayout {
    halfres: bool,
    size: UVec2,
    trace_size: UVec2,

    /// Offset of the traced pixel within its 2x2 block (half-res only).
    offset: UVec2,
}

impl TraceLayout {
    fn new(halfres: bool, size: UVec2) -> Self {
        Self {
            halfres,
            size,
            trace_size: if halfres { (size + 1) / 2 } else { size },
            offset: UVec2::ZERO,
        }
    }

    fn full_pixel(&self, trace_pixel: UVec2) -> UVec2 {
        if self.halfres {
            (trace_pixel * 2 + self.offset).min(self.size - 1)
        } else {
            trace_pixel
        }
    }

    fn trace_idx(&self, trace_pixel: UVec2) -> usize {
        (trace_pixel.y * self.trace_size.x + trace_pixel.x) as usize
    }
}

struct ReflectionTracer<'a, T> {
    ctx: &'a FrameContext<'a>,
    tracer: &'a T,
    cache: &'a HashGridCache,
    irradiance: &'a [Vec4],
    flags: TraceFlags,
    seed: u32,
    layout: TraceLayout,
    sky_radiance: Vec3,
    use_screen_space_reflections: bool,
    disable_albedo_textures: bool,
}

impl<T> ReflectionTracer<'_, T>
where
    T: Tracer,
{
    fn trace(&self, trace_pixel: UVec2) -> Vec3 {
        let ctx = self.ctx;
        let pixel = self.layout.full_pixel(trace_pixel);
        let entry = ctx.gbuffer.get(pixel);
        let position = ctx.position(pixel);
        let view = (position - ctx.camera.origin()).normalize_or_zero();
        let mirror = view.reflect(entry.normal);
        let mut noise = Noise::new(self.seed, trace_pixel);

        let direction = lerp(
            mirror,
            noise.sample_hemisphere(entry.normal),
            entry.roughness.sqr(),
        )
        .normalize_or_zero();

        let direction = if direction.dot(entry.normal) <= 0.0 {
            mirror
        } else {
            direction
        };

        let origin = position + entry.normal * (0.001 * entry.depth.max(1.0));

        let Some(hit) =
            self.tracer.trace(&Ray::new(origin, direction), self.flags)
        else {
            return self.sky_radiance;
        };

        // ---------------------------------------------------------------------

        if self.use_screen_space_reflections {
            let irradiance = self
                .find_on_screen(hit.position, hit.normal)
                .and_then(|idx| self.irradiance.get(idx));

            if let Some(irradiance) = irradiance {
                let albedo = if self.disable_albedo_textures {
                    Vec3::ONE
                } else {
                    hit.albedo
                };

                return albedo / PI * irradiance.xyz();
            }
        }

        self.cache
            .query(hit.position, hit.normal)
            .unwrap_or(Vec3::ZERO)
    }

    /// Returns index of the pixel that sees given surface, if any.
    fn find_on_screen(&self, position: Vec3, normal: Vec3) -> Option<usize> {
        let ctx = self.ctx;
        let pixel = ctx.camera.world_to_screen(position)?.floor().as_ivec2();
        let entry = ctx.gbuffer.get_checked(pixel)?;
        let depth = ctx.camera.depth_of(position);

        let is_same_surface = entry.is_some()
            && (entry.depth - depth).abs() <= 0.05 * entry.depth
            && entry.normal.dot(normal) >= 0.9;

        is_same_surface.then(|| ctx.idx(pixel.as_uvec2()))
    }
}

fn contains(size: IVec2, pos: IVec2) -> bool {
    pos.x >= 0 && pos.y >= 0 && pos.x < size.x && pos.y < size.y
}
