/// Pair of resources whose roles swap once per frame.
///
/// During a frame, [`Self::curr()`] is the only slot that gets written to,
/// while [`Self::past()`] holds what has been written during the previous
/// frame and is read-only; [`Self::flip()`] swaps the roles at the frame
/// boundary.
#[derive(Debug)]
pub struct DoubleBuffered<T> {
    slots: [T; 2],
    alternate: bool,
}

impl<T> DoubleBuffered<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            alternate: false,
        }
    }

    /// Creates both slots through given constructor, passing it the slot's
    /// suffix (`a` or `b`).
    pub fn try_new<E>(
        mut f: impl FnMut(&str) -> Result<T, E>,
    ) -> Result<Self, E> {
        Ok(Self::new(f("a")?, f("b")?))
    }

    pub fn get(&self, alternate: bool) -> &T {
        &self.slots[alternate as usize]
    }

    pub fn curr(&self) -> &T {
        self.get(self.alternate)
    }

    pub fn curr_mut(&mut self) -> &mut T {
        &mut self.slots[self.alternate as usize]
    }

    pub fn past(&self) -> &T {
        self.get(!self.alternate)
    }

    /// Returns the current slot for writing, together with the past one for
    /// reading.
    pub fn split_mut(&mut self) -> (&mut T, &T) {
        let [a, b] = &mut self.slots;

        if self.alternate {
            (b, a)
        } else {
            (a, b)
        }
    }

    /// Swaps the roles of both slots; called exactly once per frame.
    pub fn flip(&mut self) {
        self.alternate = !self.alternate;
    }

    /// Returns both slots, regardless of their roles; used to reset the
    /// state between frames.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_swap_on_flip() {
        let mut target = DoubleBuffered::new(vec![0], vec![0]);

        for frame in 1..=4 {
            let (curr, past) = target.split_mut();

            curr[0] = past[0] + 1;

            assert_eq!(frame, target.curr()[0]);
            assert_eq!(frame - 1, target.past()[0]);

            target.flip();

            assert_eq!(frame, target.past()[0]);
        }
    }

    #[test]
    fn slots_never_coincide() {
        let mut target = DoubleBuffered::new('a', 'b');

        for _ in 0..4 {
            let curr = *target.curr();
            let past = *target.past();

            assert_ne!(curr, past);

            target.flip();

            assert_eq!(curr, *target.past());
        }
    }
}
