use glam::{ivec2, uvec2, Vec4, Vec4Swizzles};
use irradia_gpu::{lerp, F32Ext, Reprojection, Vec3Ext, IRRADIA_EPSILON};
use log::debug;

use crate::{
    Buffer, CountBuffer, Device, DoubleBuffered, FrameContext,
    GiDenoiserConfig, Kernel, Result,
};

/// Spatiotemporal filter applied to the probes' interpolation results.
///
/// Each pixel accumulates its own history; pixels whose history is still
/// short (disocclusions, camera cuts) get additionally blurred with their
/// neighbours until enough frames have been gathered.
#[derive(Debug)]
pub struct GiDenoiser {
    config: GiDenoiserConfig,

    /// x, y, z - radiance
    /// w - history length
    colors: DoubleBuffered<Buffer<Vec4>>,

    /// x, y, z - running average of the frame-to-frame change
    /// w - (unused)
    color_deltas: DoubleBuffered<Buffer<Vec4>>,

    blur_mask: Buffer<f32>,
    filtered_blur_mask: Buffer<f32>,
    blur_samples: Buffer<u32>,
    blur_sample_count: CountBuffer,
    blurred_pixels: u32,
    output: Buffer<Vec4>,
}

impl GiDenoiser {
    const REPROJECT: Kernel = Kernel::new("gi_denoiser_reproject", 8);
    const FILTER_BLUR_MASK: Kernel =
        Kernel::new("gi_denoiser_filter_blur_mask", 8);
    const FILTER: Kernel = Kernel::new("gi_denoiser_filter", 64);

    pub fn new(
        device: &Device,
        config: &GiDenoiserConfig,
        pixel_count: usize,
    ) -> Result<Self> {
        debug!("Creating GI denoiser: pixel_count={pixel_count}");

        Ok(Self {
            config: config.clone(),
            colors: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_gi_denoiser_colors_{suffix}"),
                    pixel_count,
                )
            })?,
            color_deltas: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_gi_denoiser_color_deltas_{suffix}"),
                    pixel_count,
                )
            })?,
            blur_mask: device
                .create_buffer("irradia_gi_denoiser_blur_mask", pixel_count)?,
            filtered_blur_mask: device.create_buffer(
                "irradia_gi_denoiser_filtered_blur_mask",
                pixel_count,
            )?,
            blur_samples: device.create_buffer(
                "irradia_gi_denoiser_blur_samples",
                pixel_count,
            )?,
            blur_sample_count: device
                .create_count_buffer("irradia_gi_denoiser_blur_sample_count")?,
            blurred_pixels: 0,
            output: device
                .create_buffer("irradia_gi_denoiser_output", pixel_count)?,
        })
    }

    pub fn update_config(&mut self, config: &GiDenoiserConfig) {
        self.config = config.clone();
    }

    /// Returns the denoised irradiance (with history length in alpha).
    pub fn output(&self) -> &[Vec4] {
        &self.output
    }

    /// Returns the dilated blur mask, i.e. pixels that went through the
    /// spatial filter.
    pub fn blur_mask(&self) -> &[f32] {
        &self.filtered_blur_mask
    }

    /// Returns the number of pixels blurred during the last frame.
    pub fn blurred_pixels(&self) -> u32 {
        self.blurred_pixels
    }

    pub fn denoise(
        &mut self,
        ctx: &FrameContext,
        reprojections: &[Reprojection],
        input: &[Vec4],
    ) {
        self.colors.flip();
        self.color_deltas.flip();

        self.reproject(ctx, reprojections, input);
        self.filter_blur_mask(ctx);
        self.filter(ctx);

        self.blurred_pixels = self.blur_sample_count.get().unwrap_or(0);
    }

    fn reproject(
        &mut self,
        ctx: &FrameContext,
        reprojections: &[Reprojection],
        input: &[Vec4],
    ) {
        let max_history = self.config.max_history;
        let blur_history_threshold = self.config.blur_history_threshold;
        let (colors, prev_colors) = self.colors.split_mut();
        let (deltas, prev_deltas) = self.color_deltas.split_mut();
        let blur_mask = &mut self.blur_mask;

        Self::REPROJECT.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let curr = input[idx];

            if !ctx.gbuffer.get(pixel).is_some() || curr.w == 0.0 {
                colors[idx] = Vec4::ZERO;
                deltas[idx] = Vec4::ZERO;
                blur_mask[idx] = 0.0;
                return;
            }

            let reprojection = reprojections[idx];

            let prev = if reprojection.is_some() {
                let prev_idx = ctx
                    .prev_camera
                    .screen_to_idx(reprojection.prev_pos_round());

                prev_colors
                    .get(prev_idx)
                    .zip(prev_deltas.get(prev_idx))
                    .filter(|(color, _)| color.w > 0.0)
            } else {
                None
            };

            // No valid source, start a fresh history
            let Some((prev, prev_delta)) = prev else {
                colors[idx] = curr.xyz().extend(1.0);
                deltas[idx] = Vec4::ZERO;
                blur_mask[idx] = (1.0 < blur_history_threshold) as u32 as f32;
                return;
            };

            let history = (prev.w + 1.0).min(max_history);

            let delta = lerp(
                prev_delta.xyz(),
                curr.xyz() - prev.xyz(),
                1.0 / history,
            );

            // Consistent change of lighting (as opposed to noise, which
            // averages out) shortens the history
            let change =
                (delta.luma().abs() / (prev.xyz().luma() + IRRADIA_EPSILON))
                    .saturate();

            let history =
                history.min(1.0 + (max_history - 1.0) * (1.0 - change));

            colors[idx] =
                lerp(prev.xyz(), curr.xyz(), 1.0 / history).extend(history);

            deltas[idx] = delta.extend(0.0);
            blur_mask[idx] = (history < blur_history_threshold) as u32 as f32;
        });
    }

    fn filter_blur_mask(&mut self, ctx: &FrameContext) {
        let blur_mask = &self.blur_mask;
        let filtered_blur_mask = &mut self.filtered_blur_mask;
        let blur_samples = &mut self.blur_samples;
        let blur_sample_count = &mut self.blur_sample_count;
        let size = ctx.size().as_ivec2();

        blur_sample_count.reset();

        Self::FILTER_BLUR_MASK.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);

            if !ctx.gbuffer.get(pixel).is_some() {
                filtered_blur_mask[idx] = 0.0;
                return;
            }

            let mut mask = 0.0f32;

            for y in -1..=1 {
                for x in -1..=1 {
                    let neighbour = pixel.as_ivec2() + ivec2(x, y);

                    if neighbour.cmplt(ivec2(0, 0)).any()
                        || neighbour.cmpge(size).any()
                    {
                        continue;
                    }

                    mask =
                        mask.max(blur_mask[ctx.idx(neighbour.as_uvec2())]);
                }
            }

            filtered_blur_mask[idx] = mask;

            if mask > 0.0 {
                blur_samples[blur_sample_count.fetch_add(1) as usize] =
                    idx as u32;
            }
        });
    }

    fn filter(&mut self, ctx: &FrameContext) {
        let radius = self.config.blur_radius as i32;
        let colors = self.colors.curr();
        let blur_samples = &self.blur_samples;
        let output = &mut self.output;
        let size = ctx.size();

        output.copy_from_slice(colors);

        Self::FILTER.run_indirect(&self.blur_sample_count, |id| {
            let idx = blur_samples[id as usize];
            let pixel = uvec2(idx % size.x, idx / size.x);
            let surface = ctx.gbuffer.get(pixel).surface();
            let center = colors[idx as usize];
            let mut sum = center.xyz();
            let mut weights = 1.0;

            for y in -radius..=radius {
                for x in -radius..=radius {
                    if x == 0 && y == 0 {
                        continue;
                    }

                    let sample_pixel = pixel.as_ivec2() + ivec2(x, y);

                    let Some(sample_entry) =
                        ctx.gbuffer.get_checked(sample_pixel)
                    else {
                        continue;
                    };

                    let sample = colors[ctx.idx(sample_pixel.as_uvec2())];

                    if sample.w == 0.0 {
                        continue;
                    }

                    let weight = surface
                        .evaluate_similarity_to(&sample_entry.surface())
                        .sqr();

                    sum += sample.xyz() * weight;
                    weights += weight;
                }
            }

            output[idx as usize] = (sum / weights).extend(center.w);
        });
    }

    pub fn end_frame(&mut self) {
        self.blur_sample_count.poison();
    }

    pub fn clear(&mut self) {
        for colors in self.colors.iter_mut() {
            colors.clear();
        }

        for deltas in self.color_deltas.iter_mut() {
            deltas.clear();
        }

        self.blur_mask.clear();
        self.filtered_blur_mask.clear();
        self.output.clear();
        self.blur_sample_count.poison();
    }
}
