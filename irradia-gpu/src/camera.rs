use bytemuck::{Pod, Zeroable};
use glam::{vec2, vec4, IVec2, Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::Ray;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Camera {
    pub projection_view: Mat4,
    pub ndc_to_world: Mat4,

    /// x, y, z - origin
    /// w - (unused)
    pub origin: Vec4,

    /// x, y - screen size (in pixels)
    /// z - angle covered by a single pixel (in radians)
    /// w - (unused)
    pub screen: Vec4,
}

impl Camera {
    pub fn new(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        size: UVec2,
    ) -> Self {
        let size_f = size.as_vec2().max(Vec2::ONE);
        let view = Mat4::look_at_rh(eye, target, up);

        let projection =
            Mat4::perspective_rh(fov_y, size_f.x / size_f.y, 0.01, 10000.0);

        let projection_view = projection * view;
        let pixel_angle = fov_y / size_f.y;

        Self {
            projection_view,
            ndc_to_world: projection_view.inverse(),
            origin: eye.extend(0.0),
            screen: vec4(size_f.x, size_f.y, pixel_angle, 0.0),
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin.xyz()
    }

    pub fn pixel_angle(&self) -> f32 {
        self.screen.z
    }

    /// Given a point in world-coordinates, returns it in clip-coordinates.
    pub fn world_to_clip(&self, pos: Vec3) -> Vec4 {
        self.projection_view * pos.extend(1.0)
    }

    /// Given a point in world-coordinates, returns it in screen-coordinates;
    /// returns `None` for points behind the camera.
    pub fn world_to_screen(&self, pos: Vec3) -> Option<Vec2> {
        let clip = self.world_to_clip(pos);

        if clip.w <= 0.0 {
            return None;
        }

        Some(self.clip_to_screen(clip))
    }

    /// Given a point in clip-coordinates, returns it in screen-coordinates.
    pub fn clip_to_screen(&self, pos: Vec4) -> Vec2 {
        let ndc = pos.xy() / pos.w;
        let ndc = vec2(ndc.x, -ndc.y);

        (0.5 * ndc + 0.5) * self.screen.xy()
    }

    /// Given a point in screen-coordinates, returns a unique index for it; used
    /// to index screen-space structures.
    pub fn screen_to_idx(&self, pos: UVec2) -> usize {
        (pos.y * (self.screen.x as u32) + pos.x) as usize
    }

    pub fn screen_size(&self) -> UVec2 {
        self.screen.xy().as_uvec2()
    }

    /// Returns whether given point lays inside the screen.
    pub fn contains(&self, pos: IVec2) -> bool {
        let screen_size = self.screen.xy().as_ivec2();

        pos.x >= 0
            && pos.y >= 0
            && pos.x < screen_size.x
            && pos.y < screen_size.y
    }

    /// Casts a ray from camera's origin through the center of given pixel.
    pub fn ray(&self, screen_pos: UVec2) -> Ray {
        let screen_size = self.screen.xy();
        let pos = screen_pos.as_vec2() + 0.5;
        let ndc = pos * 2.0 / screen_size - Vec2::ONE;
        let ndc = vec2(ndc.x, -ndc.y);

        let near_plane = self.ndc_to_world.project_point3(ndc.extend(0.0));
        let far_plane = self.ndc_to_world.project_point3(ndc.extend(0.9));

        Ray::new(self.origin(), (far_plane - near_plane).normalize())
    }

    /// Reconstructs world-space position of given pixel, knowing its depth
    /// (i.e. the distance from camera's origin).
    pub fn world_position(&self, screen_pos: UVec2, depth: f32) -> Vec3 {
        self.ray(screen_pos).at(depth)
    }

    /// Returns the distance between camera's origin and given point, i.e. the
    /// depth that point would have when stored in a g-buffer.
    pub fn depth_of(&self, pos: Vec3) -> f32 {
        self.origin().distance(pos)
    }

    /// Returns the world-space size of a pixel's footprint at given distance.
    pub fn footprint(&self, distance: f32) -> f32 {
        distance * self.pixel_angle()
    }
}
