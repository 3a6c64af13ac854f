use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::Surface;

/// Single pixel of the geometry buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GBufferEntry {
    pub albedo: Vec3,

    /// Distance between camera's origin and the surface; zero for pixels that
    /// don't contain any geometry (sky).
    pub depth: f32,

    pub normal: Vec3,
    pub roughness: f32,
    pub material_id: u32,
}

impl GBufferEntry {
    pub fn is_some(&self) -> bool {
        self.depth > 0.0
    }

    pub fn surface(&self) -> Surface {
        Surface {
            normal: self.normal,
            depth: self.depth,
        }
    }
}
