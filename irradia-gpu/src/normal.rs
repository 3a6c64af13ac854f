use glam::{vec3, Vec2, Vec3, Vec3Swizzles};

pub struct Normal;

impl Normal {
    /// Compresses normal from Vec3 into Vec2 using octahedron-normal mapping;
    /// the result lays within `<0.0, 1.0>`.
    pub fn encode(n: Vec3) -> Vec2 {
        let len = n.x.abs() + n.y.abs() + n.z.abs();

        if len == 0.0 {
            return Vec2::splat(0.5);
        }

        let n = n / len;

        let n = if n.z >= 0.0 {
            n.xy()
        } else {
            let mut t = 1.0 - n.yx().abs();

            t.x = t.x.copysign(n.x);
            t.y = t.y.copysign(n.y);
            t
        };

        n * 0.5 + 0.5
    }

    /// See: [`Self::encode()`].
    pub fn decode(n: Vec2) -> Vec3 {
        let n = n * 2.0 - 1.0;
        let mut n = vec3(n.x, n.y, 1.0 - n.x.abs() - n.y.abs());
        let t = (-n.z).max(0.0);

        n.x -= t.copysign(n.x);
        n.y -= t.copysign(n.y);
        n.normalize()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn encode_decode() {
        for n in [
            vec3(0.26, 0.53, 0.80),
            vec3(-0.3, 0.1, -0.9),
            Vec3::X,
            Vec3::NEG_Z,
        ] {
            let n = n.normalize();
            let actual = Normal::decode(Normal::encode(n));

            assert_relative_eq!(actual.x, n.x, epsilon = 0.001);
            assert_relative_eq!(actual.y, n.y, epsilon = 0.001);
            assert_relative_eq!(actual.z, n.z, epsilon = 0.001);
        }
    }

    #[test]
    fn encode_zero() {
        assert_eq!(Vec2::splat(0.5), Normal::encode(Vec3::ZERO));
    }
}
