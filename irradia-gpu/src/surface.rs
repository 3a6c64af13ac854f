use glam::Vec3;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Surface {
    pub normal: Vec3,
    pub depth: f32,
}

impl Surface {
    /// Returns a score `<0.0, 1.0>` that determines the similarity of two given
    /// surfaces.
    pub fn evaluate_similarity_to(&self, other: &Self) -> f32 {
        if self.depth <= 0.0 || other.depth <= 0.0 {
            return 0.0;
        }

        let normal_score = self.normal.dot(other.normal).max(0.0);

        let depth_score = 1.0
            - ((self.depth - other.depth).abs() / self.depth.max(other.depth))
                .min(1.0);

        normal_score * depth_score
    }

    /// Returns whether `other` can be considered the same surface as `self`,
    /// given the relative depth tolerance and the minimum normal cosine.
    pub fn matches(
        &self,
        other: &Self,
        depth_tolerance: f32,
        normal_tolerance: f32,
    ) -> bool {
        if self.depth <= 0.0 || other.depth <= 0.0 {
            return false;
        }

        let depth_error =
            (self.depth - other.depth).abs() / self.depth.max(other.depth);

        depth_error <= depth_tolerance
            && self.normal.dot(other.normal) >= normal_tolerance
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn similarity() {
        let a = Surface {
            normal: Vec3::Y,
            depth: 10.0,
        };

        let b = Surface {
            normal: Vec3::Y,
            depth: 9.0,
        };

        let c = Surface {
            normal: Vec3::X,
            depth: 10.0,
        };

        assert_relative_eq!(a.evaluate_similarity_to(&a), 1.0);
        assert_relative_eq!(a.evaluate_similarity_to(&b), 0.9, epsilon = 0.001);
        assert_relative_eq!(a.evaluate_similarity_to(&c), 0.0);

        assert!(a.matches(&b, 0.15, 0.9));
        assert!(!a.matches(&b, 0.05, 0.9));
        assert!(!a.matches(&c, 0.15, 0.9));
        assert!(!a.matches(&Surface::default(), 1.0, -1.0));
    }
}
