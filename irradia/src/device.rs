use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use log::info;

use crate::{Buffer, CountBuffer, Error, Result};

/// Device on which the technique allocates its buffers.
///
/// Each buffer is validated against device's limits and a memory budget;
/// running out of either is reported as an error, so that the caller can
/// disable the technique instead of rendering with missing resources.
#[derive(Debug)]
pub struct Device {
    limits: wgpu::Limits,
    budget: u64,
    allocated: Arc<AtomicU64>,
}

impl Device {
    pub const DEFAULT_BUDGET: u64 = 2 * 1024 * 1024 * 1024;

    pub fn new(limits: wgpu::Limits, budget: u64) -> Self {
        Self {
            limits,
            budget,
            allocated: Default::default(),
        }
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Returns the number of bytes currently held by buffers created through
    /// this device.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Largest buffer that can be bound as a storage buffer.
    pub fn max_buffer_size(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(self.limits.max_storage_buffer_binding_size as u64)
    }

    /// Creates a zero-initialized buffer holding `len` elements.
    pub fn create_buffer<T>(
        &self,
        label: impl AsRef<str>,
        len: usize,
    ) -> Result<Buffer<T>>
    where
        T: Pod,
    {
        let label = label.as_ref();
        let limit = self.max_buffer_size();

        let size = (len as u64)
            .checked_mul(std::mem::size_of::<T>() as u64)
            .unwrap_or(u64::MAX);

        if size > limit {
            return Err(Error::BufferTooLarge {
                label: label.into(),
                size,
                limit,
            });
        }

        self.allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |allocated| {
                allocated
                    .checked_add(size)
                    .filter(|allocated| *allocated <= self.budget)
            })
            .map_err(|allocated| Error::OutOfMemory {
                label: label.into(),
                requested: size,
                available: self.budget.saturating_sub(allocated),
            })?;

        info!("Allocating buffer `{label}`; size={size}");

        Ok(Buffer::new(label, len, size, self.allocated.clone()))
    }

    pub fn create_count_buffer(
        &self,
        label: impl AsRef<str>,
    ) -> Result<CountBuffer> {
        self.create_buffer(label, 1).map(CountBuffer::new)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new(Default::default(), Self::DEFAULT_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_allocations() {
        let target = Device::default();

        let a = target.create_buffer::<u32>("a", 16).unwrap();
        let b = target.create_buffer::<[f32; 4]>("b", 4).unwrap();

        assert_eq!(64 + 64, target.allocated());

        drop(a);
        assert_eq!(64, target.allocated());

        drop(b);
        assert_eq!(0, target.allocated());
    }

    #[test]
    fn rejects_buffers_over_limits() {
        let target = Device::default();
        let len = (target.max_buffer_size() / 4 + 1) as usize;

        assert!(matches!(
            target.create_buffer::<u32>("huge", len),
            Err(Error::BufferTooLarge { .. })
        ));

        assert_eq!(0, target.allocated());
    }

    #[test]
    fn rejects_buffers_over_budget() {
        let target = Device::new(Default::default(), 100);
        let _a = target.create_buffer::<u32>("a", 20).unwrap();

        let err = target.create_buffer::<u32>("b", 10).unwrap_err();

        assert!(matches!(
            err,
            Error::OutOfMemory {
                requested: 40,
                available: 20,
                ..
            }
        ));

        assert_eq!(80, target.allocated());
    }
}
