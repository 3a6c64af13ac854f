//! Common structs, algorithms etc. used by Irradia's kernels and host.
//!
//! Everything here is plain data or a per-thread function over slices, so
//! that it could be executed by a single compute-shader invocation.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::manual_range_contains)]

mod camera;
mod dispatch;
mod frame;
mod gbuffer;
mod hash_grid;
mod light;
mod lru;
mod noise;
mod normal;
mod probe;
mod ray;
mod reprojection;
mod reservoir;
mod surface;
mod utils;

pub use self::camera::*;
pub use self::dispatch::*;
pub use self::frame::*;
pub use self::gbuffer::*;
pub use self::hash_grid::*;
pub use self::light::*;
pub use self::lru::*;
pub use self::noise::*;
pub use self::normal::*;
pub use self::probe::*;
pub use self::ray::*;
pub use self::reprojection::*;
pub use self::reservoir::*;
pub use self::surface::*;
pub use self::utils::*;

/// Marks an empty slot in index buffers.
pub const INVALID_ID: u32 = u32::MAX;

/// Small value used to avoid divisions by zero.
pub const IRRADIA_EPSILON: f32 = 0.0001;
