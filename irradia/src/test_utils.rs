use glam::{uvec2, vec3, UVec2, Vec3};
use irradia_gpu::{Camera, Frame, GBufferEntry, Light, Ray, IRRADIA_EPSILON};

use crate::{FrameContext, GBuffer, RayHit, TraceFlags, Tracer};

#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub point: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub roughness: f32,
}

impl Plane {
    fn intersect(&self, ray: &Ray) -> Option<f32> {
        let denom = self.normal.dot(ray.direction());

        if denom > -IRRADIA_EPSILON {
            return None;
        }

        let t = self.normal.dot(self.point - ray.origin()) / denom;

        (t > IRRADIA_EPSILON && t < ray.len()).then_some(t)
    }
}

/// Scene built out of one-sided planes, together with the frame that looks
/// at it.
#[derive(Clone, Debug)]
pub struct TestScene {
    pub planes: Vec<Plane>,
    pub lights: Vec<Light>,
    pub camera: Camera,
    pub prev_camera: Camera,
    pub gbuffer: GBuffer,
    pub frame: Frame,
}

impl TestScene {
    pub const EYE: Vec3 = vec3(0.0, 2.0, 3.5);
    pub const TARGET: Vec3 = vec3(0.0, 1.0, -4.0);

    /// Closed room (floor at y=0, ceiling at y=4) lit by a single light, as
    /// seen from its inside.
    pub fn room(size: UVec2) -> Self {
        let plane = |point: Vec3, normal: Vec3, albedo: f32| Plane {
            point,
            normal,
            albedo: Vec3::splat(albedo),
            roughness: 1.0,
        };

        let planes = vec![
            plane(Vec3::ZERO, Vec3::Y, 0.8),
            plane(vec3(0.0, 4.0, 0.0), Vec3::NEG_Y, 0.8),
            plane(vec3(-4.0, 0.0, 0.0), Vec3::X, 0.5),
            plane(vec3(4.0, 0.0, 0.0), Vec3::NEG_X, 0.5),
            plane(vec3(0.0, 0.0, -4.0), Vec3::Z, 0.5),
            plane(vec3(0.0, 0.0, 4.0), Vec3::NEG_Z, 0.5),
        ];

        let lights = vec![Light::point(
            vec3(0.0, 3.5, -1.0),
            0.1,
            Vec3::splat(10.0),
        )];

        Self::new(planes, lights, size)
    }

    /// Just the floor, with the sky above it.
    pub fn floor(size: UVec2) -> Self {
        let planes = vec![Plane {
            point: Vec3::ZERO,
            normal: Vec3::Y,
            albedo: Vec3::splat(0.8),
            roughness: 1.0,
        }];

        let lights = vec![Light::point(
            vec3(0.0, 3.0, 0.0),
            0.1,
            Vec3::splat(10.0),
        )];

        Self::new(planes, lights, size)
    }

    pub fn new(planes: Vec<Plane>, lights: Vec<Light>, size: UVec2) -> Self {
        let camera = Camera::new(Self::EYE, Self::TARGET, Vec3::Y, 1.0, size);

        let mut this = Self {
            planes,
            lights,
            camera,
            prev_camera: camera,
            gbuffer: GBuffer::new(size),
            frame: Frame::new(0),
        };

        this.rasterize();
        this
    }

    pub fn ctx(&self) -> FrameContext<'_> {
        FrameContext {
            camera: self.camera,
            prev_camera: self.prev_camera,
            gbuffer: &self.gbuffer,
            lights: &self.lights,
            frame: self.frame,
        }
    }

    pub fn size(&self) -> UVec2 {
        self.gbuffer.size()
    }

    /// Moves to the next frame, keeping the camera where it is.
    pub fn next_frame(&mut self) {
        self.prev_camera = self.camera;
        self.frame = self.frame.next();
    }

    /// Moves to the next frame, looking from somewhere else.
    pub fn move_camera(&mut self, eye: Vec3, target: Vec3) {
        let size = self.size();

        self.next_frame();
        self.camera = Camera::new(eye, target, Vec3::Y, 1.0, size);
        self.rasterize();
    }

    fn rasterize(&mut self) {
        let camera = self.camera;
        let size = self.size();

        self.gbuffer = GBuffer::from_fn(size, |pixel| {
            match self.trace(&camera.ray(pixel), TraceFlags::default()) {
                Some(hit) => GBufferEntry {
                    albedo: hit.albedo,
                    depth: hit.distance,
                    normal: hit.normal,
                    roughness: hit.roughness,
                    material_id: 0,
                },
                None => GBufferEntry::default(),
            }
        });
    }

    /// Returns a pixel that sees the floor.
    pub fn floor_pixel(&self) -> UVec2 {
        uvec2(self.size().x / 2, self.size().y - 1)
    }
}

impl Tracer for TestScene {
    fn trace(&self, ray: &Ray, _: TraceFlags) -> Option<RayHit> {
        self.planes
            .iter()
            .filter_map(|plane| Some((plane, plane.intersect(ray)?)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(plane, distance)| RayHit {
                position: ray.at(distance),
                normal: plane.normal,
                albedo: plane.albedo,
                roughness: plane.roughness,
                distance,
            })
    }

    fn is_occluded(&self, from: Vec3, to: Vec3) -> bool {
        let dir = to - from;
        let len = dir.length();

        if len <= IRRADIA_EPSILON {
            return false;
        }

        let ray = Ray::new(from, dir / len).with_len(len - IRRADIA_EPSILON);

        self.planes
            .iter()
            .any(|plane| plane.intersect(&ray).is_some())
    }
}
