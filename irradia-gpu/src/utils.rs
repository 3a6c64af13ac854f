use core::ops;

use glam::{vec3, Vec3};

pub fn lerp<T>(a: T, b: T, t: f32) -> T
where
    T: ops::Add<Output = T>,
    T: ops::Sub<Output = T>,
    T: ops::Mul<f32, Output = T>,
    T: Copy,
{
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Hashes given value using the PCG permutation; the same hash is used by
/// the radiance cache and the reservoir store, so that both structures agree
/// on cell placement.
pub fn pcg_hash(value: u32) -> u32 {
    let state = value.wrapping_mul(747796405).wrapping_add(2891336453);

    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);

    (word >> 22) ^ word
}

pub trait Vec3Ext
where
    Self: Sized,
{
    /// Reflects this direction-vector around `other`.
    fn reflect(self, other: Self) -> Self;

    /// Returns luminance of this color-vector.
    fn luma(self) -> f32;
}

impl Vec3Ext for Vec3 {
    fn reflect(self, other: Self) -> Self {
        self - 2.0 * other.dot(self) * other
    }

    fn luma(self) -> f32 {
        self.dot(vec3(0.2126, 0.7152, 0.0722))
    }
}

pub trait F32Ext
where
    Self: Sized,
{
    fn sqr(self) -> Self;
    fn saturate(self) -> Self;
    fn smoothstep(self, edge0: Self, edge1: Self) -> Self;
}

impl F32Ext for f32 {
    fn sqr(self) -> Self {
        self * self
    }

    fn saturate(self) -> Self {
        self.clamp(0.0, 1.0)
    }

    fn smoothstep(self, edge0: Self, edge1: Self) -> Self {
        if edge1 <= edge0 {
            return (self >= edge1) as u32 as f32;
        }

        let t = ((self - edge0) / (edge1 - edge0)).saturate();

        t * t * (3.0 - 2.0 * t)
    }
}
