//! Modular sequence arithmetic and per-slot state.
//!
//! Both engines tag segments with a small sequence number that wraps around a
//! fixed modulus. Everything that compares sequence numbers goes through
//! [`SeqSpace`], and everything that keeps per-sequence state lives in a
//! [`SlotRing`] indexed by `seq mod N`.

use std::array;
use std::ops::{Index, IndexMut};

/// A cyclic sequence space with a fixed window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    modulus: u8,
    window: u8,
}

impl SeqSpace {
    pub const fn new(modulus: u8, window: u8) -> Self {
        Self { modulus, window }
    }

    pub const fn modulus(self) -> u8 {
        self.modulus
    }

    pub const fn window(self) -> u8 {
        self.window
    }

    /// Forward distance from `from` to `to`, in `0..modulus`.
    ///
    /// Values at or above the modulus are reduced first, so a one-based
    /// space (`1..=modulus`) works the same as a zero-based one.
    pub fn distance(self, from: u8, to: u8) -> u8 {
        let m = u16::from(self.modulus);
        let from = u16::from(from) % m;
        let to = u16::from(to) % m;
        ((to + m - from) % m) as u8
    }

    pub fn add(self, seq: u8, n: u8) -> u8 {
        ((u16::from(seq) + u16::from(n)) % u16::from(self.modulus)) as u8
    }

    /// Whether `seq` falls in the window starting at `base`.
    pub fn in_window(self, base: u8, seq: u8) -> bool {
        self.distance(base, seq) < self.window
    }
}

/// Fixed-capacity per-sequence state, indexed by `seq mod N`.
#[derive(Debug, Clone)]
pub struct SlotRing<T, const N: usize> {
    slots: [T; N],
}

impl<T: Default, const N: usize> Default for SlotRing<T, N> {
    fn default() -> Self {
        Self {
            slots: array::from_fn(|_| T::default()),
        }
    }
}

impl<T: Default, const N: usize> SlotRing<T, N> {
    /// Move the value out of a slot, leaving the default behind.
    pub fn take(&mut self, seq: u8) -> T {
        std::mem::take(&mut self[seq])
    }
}

impl<T, const N: usize> SlotRing<T, N> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

impl<T, const N: usize> Index<u8> for SlotRing<T, N> {
    type Output = T;

    fn index(&self, seq: u8) -> &T {
        &self.slots[usize::from(seq) % N]
    }
}

impl<T, const N: usize> IndexMut<u8> for SlotRing<T, N> {
    fn index_mut(&mut self, seq: u8) -> &mut T {
        &mut self.slots[usize::from(seq) % N]
    }
}
