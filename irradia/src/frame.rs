use glam::{IVec2, UVec2, Vec3};
use irradia_gpu::{Camera, Frame, GBufferEntry, Light};

/// Per-pixel geometry of the current frame, rasterized by the caller.
#[derive(Clone, Debug, Default)]
pub struct GBuffer {
    size: UVec2,
    entries: Vec<GBufferEntry>,
}

impl GBuffer {
    /// Creates an empty (all-sky) geometry buffer.
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            entries: vec![Default::default(); (size.x * size.y) as usize],
        }
    }

    pub fn from_fn(
        size: UVec2,
        mut f: impl FnMut(UVec2) -> GBufferEntry,
    ) -> Self {
        let mut this = Self::new(size);

        for y in 0..size.y {
            for x in 0..size.x {
                let pos = UVec2::new(x, y);

                this.set(pos, f(pos));
            }
        }

        this
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn get(&self, pos: UVec2) -> GBufferEntry {
        self.entries[self.idx(pos)]
    }

    /// Returns the entry at given position, or `None` if the position lays
    /// outside the buffer.
    pub fn get_checked(&self, pos: IVec2) -> Option<GBufferEntry> {
        if pos.x < 0
            || pos.y < 0
            || pos.x >= self.size.x as i32
            || pos.y >= self.size.y as i32
        {
            return None;
        }

        Some(self.get(pos.as_uvec2()))
    }

    pub fn set(&mut self, pos: UVec2, entry: GBufferEntry) {
        let idx = self.idx(pos);

        self.entries[idx] = entry;
    }

    pub fn entries(&self) -> &[GBufferEntry] {
        &self.entries
    }

    fn idx(&self, pos: UVec2) -> usize {
        (pos.y * self.size.x + pos.x) as usize
    }
}

/// Everything a component needs to know about the frame being rendered.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext<'a> {
    pub camera: Camera,
    pub prev_camera: Camera,
    pub gbuffer: &'a GBuffer,
    pub lights: &'a [Light],
    pub frame: Frame,
}

impl<'a> FrameContext<'a> {
    pub fn size(&self) -> UVec2 {
        self.gbuffer.size()
    }

    pub fn pixel_count(&self) -> usize {
        self.gbuffer.entries().len()
    }

    /// Returns the world-space position of the surface seen through given
    /// pixel.
    pub fn position(&self, pixel: UVec2) -> Vec3 {
        self.camera
            .world_position(pixel, self.gbuffer.get(pixel).depth)
    }

    pub fn idx(&self, pixel: UVec2) -> usize {
        (pixel.y * self.size().x + pixel.x) as usize
    }
}
