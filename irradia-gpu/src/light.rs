use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4, Vec4Swizzles};

use crate::Vec3Ext;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Light {
    /// x - position x
    /// y - position y
    /// z - position z
    /// w - radius
    pub d0: Vec4,

    /// x - color r
    /// y - color g
    /// z - color b
    /// w - (unused)
    pub d1: Vec4,
}

impl Light {
    pub fn point(position: Vec3, radius: f32, color: Vec3) -> Self {
        Self {
            d0: position.extend(radius),
            d1: color.extend(0.0),
        }
    }

    pub fn center(&self) -> Vec3 {
        self.d0.xyz()
    }

    pub fn radius(&self) -> f32 {
        self.d0.w
    }

    pub fn color(&self) -> Vec3 {
        self.d1.xyz()
    }

    /// Returns unshadowed radiance arriving from this light at given point,
    /// already multiplied by the cosine term.
    pub fn radiance(&self, point: Vec3, normal: Vec3) -> Vec3 {
        let to_light = self.center() - point;
        let dist2 = to_light.length_squared().max(self.radius().powi(2));

        if dist2 == 0.0 {
            return Vec3::ZERO;
        }

        let cosine = normal.dot(to_light.normalize_or_zero()).max(0.0);

        self.color() * cosine / dist2
    }

    /// Returns the target function used while resampling this light.
    pub fn target_pdf(&self, point: Vec3, normal: Vec3) -> f32 {
        self.radiance(point, normal).luma()
    }
}
