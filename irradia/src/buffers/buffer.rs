use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use derivative::Derivative;

/// Typed storage buffer, created through [`crate::Device::create_buffer()`].
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Buffer<T> {
    label: String,
    size: u64,

    #[derivative(Debug = "ignore")]
    data: Vec<T>,

    #[derivative(Debug = "ignore")]
    allocated: Arc<AtomicU64>,
}

impl<T> Buffer<T>
where
    T: Pod,
{
    pub(crate) fn new(
        label: &str,
        len: usize,
        size: u64,
        allocated: Arc<AtomicU64>,
    ) -> Self {
        Self {
            label: label.into(),
            size,
            data: bytemuck::allocation::zeroed_vec(len),
            allocated,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the size of this buffer, in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn clear(&mut self) {
        self.fill(T::zeroed());
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.size, Ordering::Relaxed);
    }
}
