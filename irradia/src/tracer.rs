use glam::Vec3;
use irradia_gpu::Ray;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceFlags {
    /// Whether alpha-tested geometry should be treated as opaque.
    pub disable_alpha_testing: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RayHit {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub roughness: f32,
    pub distance: f32,
}

/// Intersects rays with the scene; provided by whoever owns the geometry.
pub trait Tracer {
    fn trace(&self, ray: &Ray, flags: TraceFlags) -> Option<RayHit>;

    /// Returns whether anything lays between `from` and `to`; used for
    /// shadow rays.
    fn is_occluded(&self, from: Vec3, to: Vec3) -> bool {
        let _ = (from, to);

        false
    }
}

impl<T> Tracer for &T
where
    T: Tracer + ?Sized,
{
    fn trace(&self, ray: &Ray, flags: TraceFlags) -> Option<RayHit> {
        (**self).trace(ray, flags)
    }

    fn is_occluded(&self, from: Vec3, to: Vec3) -> bool {
        (**self).is_occluded(from, to)
    }
}
