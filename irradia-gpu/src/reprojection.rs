use bytemuck::{Pod, Zeroable};
use glam::{vec2, UVec2, Vec2};

/// Describes where given pixel was located during the previous frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Reprojection {
    pub prev_x: f32,
    pub prev_y: f32,
    pub confidence: f32,
    pub validity: u32,
}

impl Reprojection {
    pub fn new(prev_pos: Vec2, confidence: f32) -> Self {
        Self {
            prev_x: prev_pos.x,
            prev_y: prev_pos.y,
            confidence,
            validity: (confidence > 0.0) as u32,
        }
    }

    pub fn is_some(&self) -> bool {
        self.validity != 0 && self.confidence > 0.0
    }

    pub fn is_none(&self) -> bool {
        !self.is_some()
    }

    pub fn prev_pos(&self) -> Vec2 {
        vec2(self.prev_x, self.prev_y)
    }

    pub fn prev_pos_round(&self) -> UVec2 {
        self.prev_pos().floor().max(Vec2::ZERO).as_uvec2()
    }
}
