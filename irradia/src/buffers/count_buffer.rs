use irradia_gpu::POISONED_COUNT;

use crate::{Buffer, Error, Result};

/// Single-element buffer holding the number of elements produced by a pass.
///
/// Count buffers start poisoned and get poisoned again once the frame is
/// over, so that sizing a dispatch from a count whose producing pass hasn't
/// run yet is detectable instead of silently reusing a stale value.
#[derive(Debug)]
pub struct CountBuffer {
    buffer: Buffer<u32>,
}

impl CountBuffer {
    pub(crate) fn new(mut buffer: Buffer<u32>) -> Self {
        buffer[0] = POISONED_COUNT;

        Self { buffer }
    }

    pub fn label(&self) -> &str {
        self.buffer.label()
    }

    /// Starts producing the count; must be called by the producing pass
    /// before it adds any elements.
    pub fn reset(&mut self) {
        self.buffer[0] = 0;
    }

    /// Reserves `n` elements, returning the index of the first one.
    pub fn fetch_add(&mut self, n: u32) -> u32 {
        let prev = self.buffer[0];

        debug_assert_ne!(
            prev,
            POISONED_COUNT,
            "`{}` is written before being reset",
            self.label()
        );

        self.buffer[0] = prev.saturating_add(n);
        prev
    }

    pub fn set(&mut self, count: u32) {
        self.buffer[0] = count;
    }

    pub fn poison(&mut self) {
        self.buffer[0] = POISONED_COUNT;
    }

    pub fn is_poisoned(&self) -> bool {
        self.buffer[0] == POISONED_COUNT
    }

    /// Returns the count, failing if its producing pass hasn't run yet.
    pub fn get(&self) -> Result<u32> {
        if self.is_poisoned() {
            Err(Error::CountNotProduced {
                label: self.label().into(),
            })
        } else {
            Ok(self.buffer[0])
        }
    }

    /// Returns the count, clamped to given capacity; yields zero if the
    /// producing pass hasn't run yet.
    pub fn get_or_zero(&self, capacity: usize) -> usize {
        self.get().map_or(0, |count| (count as usize).min(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;

    #[test]
    fn lifecycle() {
        let device = Device::default();
        let mut target = device.create_count_buffer("count").unwrap();

        assert!(target.is_poisoned());
        assert!(matches!(target.get(), Err(Error::CountNotProduced { .. })));

        target.reset();

        assert_eq!(0, target.fetch_add(3));
        assert_eq!(3, target.fetch_add(1));
        assert_eq!(4, target.get().unwrap());
        assert_eq!(2, target.get_or_zero(2));

        target.poison();

        assert_eq!(0, target.get_or_zero(100));
    }
}
