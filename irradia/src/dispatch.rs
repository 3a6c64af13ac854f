//! Indirect dispatch sizing and the kernel runner.
//!
//! Many passes process a number of elements that's only known after a
//! previous pass has run (live probes, touched tiles, rays to trace...); such
//! passes are sized from a [`CountBuffer`] in two phases:
//!
//! 1. the producing pass resets the count and appends its elements,
//! 2. the dependent pass converts the count into group counts and runs.
//!
//! Passes are executed in program order, so phase 1 is always complete by
//! the time phase 2 reads the count; reading a count that's still poisoned
//! means the passes have been ordered incorrectly.

use glam::UVec2;
use irradia_gpu::{DispatchArgs, DispatchRaysArgs, DrawArgs};
use log::error;

use crate::{utils, CountBuffer, Result};

/// Converts a count into compute-dispatch arguments, i.e. `ceil(count /
/// group_size)` groups.
pub fn generate_dispatch(
    count: &CountBuffer,
    group_size: u32,
) -> Result<DispatchArgs> {
    Ok(DispatchArgs::new(count.get()?, group_size))
}

/// Converts a count into ray-dispatch arguments, i.e. one ray per element.
pub fn generate_dispatch_rays(count: &CountBuffer) -> Result<DispatchRaysArgs> {
    Ok(DispatchRaysArgs::new(count.get()?))
}

/// Converts a count into instanced-draw arguments, drawing each element with
/// `vertices_per_element` vertices.
pub fn generate_draw(
    count: &CountBuffer,
    vertices_per_element: u32,
) -> Result<DrawArgs> {
    Ok(DrawArgs::new(count.get()?, vertices_per_element))
}

/// Host-side emulation of a compute kernel.
///
/// Threads are launched in whole groups; threads whose id lands past the
/// element count return early, exactly like they would on the device.
#[derive(Clone, Copy, Debug)]
pub struct Kernel {
    label: &'static str,
    group_size: u32,
}

impl Kernel {
    pub const fn new(label: &'static str, group_size: u32) -> Self {
        Self { label, group_size }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Runs this kernel over `count` threads, sized on the host.
    pub fn run(&self, count: u32, f: impl FnMut(u32)) {
        self.launch(DispatchArgs::new(count, self.group_size), count, f);
    }

    /// Runs this kernel over the number of threads produced by a previous
    /// pass.
    ///
    /// If that pass hasn't run yet, the error is logged and the kernel gets
    /// an empty dispatch; the frame continues with this stage's output left
    /// untouched.
    pub fn run_indirect(&self, count: &CountBuffer, f: impl FnMut(u32)) {
        let dispatch = generate_dispatch(count, self.group_size)
            .and_then(|args| Ok((args, count.get()?)));

        match dispatch {
            Ok((args, count)) => {
                self.launch(args, count, f);
            }

            Err(err) => {
                error!("Skipping `{}`: {}", self.label, err);
            }
        }
    }

    /// Runs this kernel over a 2D grid, in square groups.
    pub fn run_2d(&self, size: UVec2, mut f: impl FnMut(UVec2)) {
        let group_size = self.group_size.max(1);
        let groups = (size + group_size - 1) / group_size;

        utils::measure(self.label, || {
            for gy in 0..groups.y {
                for gx in 0..groups.x {
                    for ly in 0..group_size {
                        for lx in 0..group_size {
                            let id = UVec2::new(
                                gx * group_size + lx,
                                gy * group_size + ly,
                            );

                            if id.x >= size.x || id.y >= size.y {
                                continue;
                            }

                            f(id);
                        }
                    }
                }
            }
        });
    }

    fn launch(&self, args: DispatchArgs, count: u32, mut f: impl FnMut(u32)) {
        utils::measure(self.label, || {
            let threads = args.group_count() as u64 * self.group_size as u64;

            for id in 0..threads {
                if id >= count as u64 {
                    return;
                }

                f(id as u32);
            }
        });
    }
}
