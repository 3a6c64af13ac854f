//! Irradia: real-time indirect lighting built out of a world-space radiance
//! cache, screen-space probes and a world-space reservoir resampler.
//!
//! Passes are written as compute kernels executed over plain buffers (see
//! [`Kernel`]), driven once per frame by [`Gi::render()`].

mod buffers;
mod config;
mod device;
mod dispatch;
mod error;
mod frame;
mod gi;
mod gi_denoiser;
mod glossy_reflections;
mod hash_grid_cache;
mod reprojection;
mod reservoirs;
mod screen_probes;
mod tracer;
mod utils;

#[cfg(test)]
mod test_utils;

pub use irradia_gpu::{
    CachedTile, Camera, DispatchArgs, DispatchRaysArgs, DrawArgs, Frame,
    GBufferEntry, HashGridCell, HashGridParams, HashGridTile, Light, Probe,
    ProbeRay, ProbeSamplingMode, Ray, Reprojection, TileKey,
    HASH_GRID_MIP_COUNT, PROBE_SIZE,
};

pub use self::buffers::*;
pub use self::config::*;
pub use self::device::*;
pub use self::dispatch::*;
pub use self::error::*;
pub use self::frame::*;
pub use self::gi::*;
pub use self::gi_denoiser::*;
pub use self::glossy_reflections::*;
pub use self::hash_grid_cache::*;
pub use self::reprojection::*;
pub use self::reservoirs::*;
pub use self::screen_probes::*;
pub use self::tracer::*;
