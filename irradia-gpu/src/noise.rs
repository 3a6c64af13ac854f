use core::f32::consts::PI;

use glam::{vec2, vec3, UVec2, Vec3};

use crate::pcg_hash;

/// Per-thread white noise generator.
#[derive(Clone, Copy, Debug)]
pub struct Noise {
    state: u32,
}

impl Noise {
    pub fn new(seed: u32, id: UVec2) -> Self {
        Self {
            state: seed
                ^ 48619u32.wrapping_mul(id.x)
                ^ 95461u32.wrapping_mul(id.y),
        }
    }

    /// Creates a noise generator for a one-dimensional thread id.
    pub fn from_id(seed: u32, id: u32) -> Self {
        Self::new(pcg_hash(seed), UVec2::new(id, 0))
    }

    /// Generates a uniform sample in range `<0.0, 1.0>`.
    pub fn sample(&mut self) -> f32 {
        (self.sample_int() as f32) / (u32::MAX as f32)
    }

    /// Generates a uniform sample in range `<0, u32::MAX>`.
    pub fn sample_int(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(747796405)
            .wrapping_add(2891336453);

        let word = ((self.state >> ((self.state >> 28) + 4)) ^ self.state)
            .wrapping_mul(277803737);

        (word >> 22) ^ word
    }

    /// Generates a uniform sample in range `<0, max)`.
    pub fn sample_below(&mut self, max: u32) -> u32 {
        if max == 0 {
            0
        } else {
            self.sample_int() % max
        }
    }

    /// Generates a cosine-weighted sample on a hemisphere around given normal.
    pub fn sample_hemisphere(&mut self, normal: Vec3) -> Vec3 {
        let u = vec2(self.sample(), self.sample());

        let radius = u.x.sqrt();
        let angle = 2.0 * PI * u.y;

        let (b, t) = orthonormal_basis(normal);
        let z = (1.0 - u.x).max(0.0).sqrt();

        (radius * angle.cos() * b + radius * angle.sin() * t + z * normal)
            .normalize()
    }

    /// Generates a uniform sample on a hemisphere around given normal.
    pub fn sample_uniform_hemisphere(&mut self, normal: Vec3) -> Vec3 {
        let z = self.sample();
        let radius = (1.0 - z * z).max(0.0).sqrt();
        let angle = 2.0 * PI * self.sample();

        let (b, t) = orthonormal_basis(normal);

        (radius * angle.cos() * b + radius * angle.sin() * t + z * normal)
            .normalize()
    }
}

/// Returns two vectors that, together with `normal`, form an orthonormal
/// basis.
pub fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(normal.z);
    let a = -1.0 / (sign + normal.z);
    let b = normal.x * normal.y * a;

    (
        vec3(1.0 + sign * normal.x * normal.x * a, sign * b, -sign * normal.x),
        vec3(b, sign + normal.y * normal.y * a, -normal.y),
    )
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn samples_are_within_range() {
        let mut target = Noise::new(1234, UVec2::new(5, 6));

        for _ in 0..1000 {
            let sample = target.sample();

            assert!(sample >= 0.0 && sample <= 1.0);
            assert!(target.sample_below(7) < 7);
        }
    }

    #[test]
    fn hemisphere_samples_face_the_normal() {
        let mut target = Noise::from_id(42, 0);

        for normal in [Vec3::Y, Vec3::NEG_Z, vec3(0.3, -0.4, 0.5).normalize()]
        {
            for _ in 0..100 {
                for dir in [
                    target.sample_hemisphere(normal),
                    target.sample_uniform_hemisphere(normal),
                ] {
                    assert_relative_eq!(dir.length(), 1.0, epsilon = 0.001);
                    assert!(dir.dot(normal) >= -0.001);
                }
            }
        }
    }
}
