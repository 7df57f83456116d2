//! Buffer ownership helpers: ping-pong pairs and fallible allocation.

use crate::error::FlockError;

/// Two buffers of the same kind, one of them "current".
///
/// A stage reads the current buffer and writes the next one, then the pair is
/// swapped. Swapping only flips the active index; nothing is copied.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    active: usize,
}

impl<T> PingPong<T> {
    pub fn new(current: T, next: T) -> Self {
        Self {
            slots: [current, next],
            active: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[self.active]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.active]
    }

    /// Borrow current for reading and next for writing at the same time.
    pub fn split_mut(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.slots;
        if self.active == 0 { (a, b) } else { (b, a) }
    }

    /// Make next the current buffer.
    #[inline]
    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }

    /// Buffer in slot `index` (0 or 1), regardless of which is current.
    #[inline]
    pub fn slot(&self, index: usize) -> &T {
        &self.slots[index]
    }

    /// Index of the current slot, 0 or 1.
    pub fn active(&self) -> usize {
        self.active
    }
}

/// Allocate `len` elements produced by `fill`, reporting failure instead of
/// aborting.
pub fn try_alloc_with<T>(
    buffer: &'static str,
    len: usize,
    fill: impl FnMut() -> T,
) -> Result<Vec<T>, FlockError> {
    let bytes = len.saturating_mul(std::mem::size_of::<T>());
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| FlockError::Allocation { buffer, bytes })?;
    data.resize_with(len, fill);
    Ok(data)
}

/// Allocate `len` copies of `value`.
pub fn try_alloc<T: Clone>(
    buffer: &'static str,
    len: usize,
    value: T,
) -> Result<Vec<T>, FlockError> {
    try_alloc_with(buffer, len, || value.clone())
}
