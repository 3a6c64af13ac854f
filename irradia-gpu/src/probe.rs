use core::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec3};

use crate::lerp;

/// Width (and height) of the screen tile covered by a single probe.
pub const PROBE_SIZE: u32 = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeSamplingMode {
    /// One ray per pixel of probe's tile.
    OneSpp,

    /// One ray per 2x2 pixels of probe's tile.
    #[default]
    QuarterSpp,

    /// One ray per 4x4 pixels of probe's tile.
    SixteenthSpp,
}

impl ProbeSamplingMode {
    pub fn rays_per_probe(self) -> u32 {
        (PROBE_SIZE * PROBE_SIZE) >> (2 * self as u32)
    }

    pub fn from_u32(val: u32) -> Self {
        match val {
            0 => Self::OneSpp,
            1 => Self::QuarterSpp,
            _ => Self::SixteenthSpp,
        }
    }
}

/// L1 spherical harmonics, storing radiance arriving from all directions.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SphericalHarmonics {
    pub l0: Vec3,
    pub l1x: Vec3,
    pub l1y: Vec3,
    pub l1z: Vec3,
}

impl SphericalHarmonics {
    const Y0: f32 = 0.282095;
    const Y1: f32 = 0.488603;

    /// Projects a single radiance sample; the result must be later scaled by
    /// `4π / sample_count` (see [`Self::scale()`]).
    pub fn add(&mut self, direction: Vec3, radiance: Vec3) {
        self.l0 += radiance * Self::Y0;
        self.l1x += radiance * (Self::Y1 * direction.x);
        self.l1y += radiance * (Self::Y1 * direction.y);
        self.l1z += radiance * (Self::Y1 * direction.z);
    }

    pub fn scale(self, factor: f32) -> Self {
        Self {
            l0: self.l0 * factor,
            l1x: self.l1x * factor,
            l1y: self.l1y * factor,
            l1z: self.l1z * factor,
        }
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            l0: lerp(self.l0, other.l0, t),
            l1x: lerp(self.l1x, other.l1x, t),
            l1y: lerp(self.l1y, other.l1y, t),
            l1z: lerp(self.l1z, other.l1z, t),
        }
    }

    /// Evaluates irradiance for a surface oriented along given normal, i.e.
    /// convolves the stored radiance with a clamped cosine lobe.
    pub fn irradiance(&self, normal: Vec3) -> Vec3 {
        let a0 = PI * Self::Y0;
        let a1 = (2.0 * PI / 3.0) * Self::Y1;

        let irradiance = self.l0 * a0
            + (self.l1x * normal.x + self.l1y * normal.y + self.l1z * normal.z)
                * a1;

        irradiance.max(Vec3::ZERO)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Probe {
    pub position: Vec3,
    pub depth: f32,
    pub normal: Vec3,

    /// Number of frames accumulated in `sh`.
    pub history: f32,

    /// Pixel this probe has been spawned at (or reprojected onto).
    pub pixel: UVec2,

    /// Index of the tile-cache entry this probe has been served from, or
    /// [`crate::INVALID_ID`].
    pub cached_tile: u32,

    /// Bits 0..8 - `FLAG_*`
    /// Bits 8..16 - sampling mode
    pub flags: u32,

    pub sh: SphericalHarmonics,
}

impl Probe {
    pub const FLAG_VALID: u32 = 1;
    pub const FLAG_REPROJECTED: u32 = 2;
    pub const FLAG_CACHED: u32 = 4;

    pub fn is_valid(&self) -> bool {
        self.flags & Self::FLAG_VALID != 0
    }

    pub fn is_reprojected(&self) -> bool {
        self.flags & Self::FLAG_REPROJECTED != 0
    }

    pub fn is_cached(&self) -> bool {
        self.flags & Self::FLAG_CACHED != 0
    }

    pub fn sampling_mode(&self) -> ProbeSamplingMode {
        ProbeSamplingMode::from_u32((self.flags >> 8) & 0xff)
    }

    pub fn with_sampling_mode(mut self, mode: ProbeSamplingMode) -> Self {
        self.flags = (self.flags & 0xff) | ((mode as u32) << 8);
        self
    }

    pub fn tile(&self) -> UVec2 {
        self.pixel / PROBE_SIZE
    }
}

/// Ray shot from a probe, together with what it has hit.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ProbeRay {
    pub direction: Vec3,
    pub probe: u32,

    pub hit_position: Vec3,

    /// Distance to the hit; negative if the ray has missed.
    pub hit_distance: f32,

    pub hit_normal: Vec3,
    pub hit_roughness: f32,
    pub hit_albedo: Vec3,

    /// Non-zero if this ray's secondary vertex has been selected to gather
    /// multi-bounce lighting.
    pub is_multibounce: u32,

    /// Direct lighting reflected from the hit point.
    pub direct: Vec3,
    pub _padding0: u32,

    /// Light reflected from the hit point that has bounced at least twice.
    pub multibounce: Vec3,
    pub _padding1: u32,
}

impl ProbeRay {
    pub fn is_hit(&self) -> bool {
        self.hit_distance >= 0.0
    }
}

/// Entry of the screen-probe tile cache.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CachedTile {
    pub sh: SphericalHarmonics,
    pub position: Vec3,
    pub decay: u32,
    pub tile: UVec2,

    /// Number of frames this entry has been reused for since it was traced.
    pub age: u32,

    pub flags: u32,
}

impl CachedTile {
    pub const FLAG_VALID: u32 = 1;
    pub const FLAG_USED: u32 = 2;

    pub fn is_valid(&self) -> bool {
        self.flags & Self::FLAG_VALID != 0
    }

    pub fn is_used(&self) -> bool {
        self.flags & Self::FLAG_USED != 0
    }
}
