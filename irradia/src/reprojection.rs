use glam::{Vec4, Vec4Swizzles};
use irradia_gpu::{Reprojection, Surface};

use crate::{Buffer, Device, DoubleBuffered, FrameContext, Kernel, Result};

/// Finds out where each pixel was located during the previous frame.
#[derive(Debug)]
pub struct FrameReprojection {
    /// x, y, z - normal
    /// w - depth
    surfaces: DoubleBuffered<Buffer<Vec4>>,

    reprojections: Buffer<Reprojection>,
}

impl FrameReprojection {
    const KERNEL: Kernel = Kernel::new("frame_reprojection", 8);

    /// Surfaces whose similarity falls below this value are considered
    /// disoccluded.
    const MIN_CONFIDENCE: f32 = 0.5;

    pub fn new(device: &Device, pixel_count: usize) -> Result<Self> {
        Ok(Self {
            surfaces: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_surfaces_{suffix}"),
                    pixel_count,
                )
            })?,
            reprojections: device
                .create_buffer("irradia_reprojections", pixel_count)?,
        })
    }

    pub fn reprojections(&self) -> &[Reprojection] {
        &self.reprojections
    }

    pub fn clear(&mut self) {
        for surfaces in self.surfaces.iter_mut() {
            surfaces.clear();
        }

        self.reprojections.clear();
    }

    pub fn run(&mut self, ctx: &FrameContext) {
        self.surfaces.flip();

        let (surfaces, prev_surfaces) = self.surfaces.split_mut();
        let reprojections = &mut self.reprojections;

        Self::KERNEL.run_2d(ctx.size(), |pixel| {
            let idx = ctx.idx(pixel);
            let entry = ctx.gbuffer.get(pixel);

            surfaces[idx] = entry.normal.extend(entry.depth);

            // We don't need reprojection for the sky
            if !entry.is_some() {
                reprojections[idx] = Default::default();
                return;
            }

            // -----------------------------------------------------------------

            let position = ctx.position(pixel);

            let Some(prev_pos) = ctx.prev_camera.world_to_screen(position)
            else {
                reprojections[idx] = Default::default();
                return;
            };

            let prev_surface = if ctx
                .prev_camera
                .contains(prev_pos.floor().as_ivec2())
            {
                prev_surfaces
                    .get(
                        ctx.prev_camera
                            .screen_to_idx(prev_pos.floor().as_uvec2()),
                    )
                    .copied()
            } else {
                None
            };

            let Some(prev_surface) = prev_surface else {
                reprojections[idx] = Default::default();
                return;
            };

            // -----------------------------------------------------------------

            let prev_surface = Surface {
                normal: prev_surface.xyz(),
                depth: prev_surface.w,
            };

            // Depth the surface would have had, seen from the previous camera
            let expected_surface = Surface {
                normal: entry.normal,
                depth: ctx.prev_camera.depth_of(position),
            };

            let confidence =
                prev_surface.evaluate_similarity_to(&expected_surface);

            reprojections[idx] = if confidence >= Self::MIN_CONFIDENCE {
                Reprojection::new(prev_pos, confidence)
            } else {
                Default::default()
            };
        });
    }
}
