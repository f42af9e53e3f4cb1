//! Per-process communication arena.
//!
//! One allocation of `2 * Σ shared` scalars backs every neighbor's receive and
//! send slice: the first half holds receive slices, the second half send
//! slices, both in neighbor order. Slices are handed out as [`BufferView`]
//! offsets and only borrowed from the pool, which keeps sole ownership of the
//! memory for the lifetime of the subdomain.

use std::ops::{Deref, DerefMut};

use crate::data::scalar::Scalar;
use crate::ddm_error::DdmError;
use crate::debug_invariants::DebugInvariants;

/// Offset/length of one neighbor's slice inside a half of the arena.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferView {
    pub offset: usize,
    pub len: usize,
}

impl BufferView {
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Contiguous receive/send arena sliced per neighbor.
#[derive(Clone, Debug)]
pub struct BufferPool<K> {
    arena: Vec<K>,
    views: Vec<BufferView>,
    half: usize,
}

impl<K: Scalar> BufferPool<K> {
    /// Lay out one view per count; zero total allocates nothing.
    pub fn new<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut views = Vec::new();
        let mut half = 0usize;
        for len in counts {
            views.push(BufferView { offset: half, len });
            half += len;
        }
        let arena = if half == 0 {
            Vec::new()
        } else {
            vec![K::zero(); 2 * half]
        };
        Self { arena, views, half }
    }

    /// Number of neighbor slices.
    #[inline]
    pub fn neighbors(&self) -> usize {
        self.views.len()
    }

    /// Σ shared-index counts (length of one half).
    #[inline]
    pub fn total_shared(&self) -> usize {
        self.half
    }

    /// True when no memory was allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    #[inline]
    pub fn view(&self, i: usize) -> BufferView {
        self.views[i]
    }

    /// Receive slice of neighbor `i`.
    pub fn recv(&self, i: usize) -> &[K] {
        &self.arena[self.views[i].range()]
    }

    pub fn recv_mut(&mut self, i: usize) -> &mut [K] {
        let r = self.views[i].range();
        &mut self.arena[r]
    }

    /// Send slice of neighbor `i`.
    pub fn send(&self, i: usize) -> &[K] {
        let r = self.views[i].range();
        &self.arena[self.half + r.start..self.half + r.end]
    }

    pub fn send_mut(&mut self, i: usize) -> &mut [K] {
        let r = self.views[i].range();
        let half = self.half;
        &mut self.arena[half + r.start..half + r.end]
    }

    /// Whole arena capacity in bytes.
    #[inline]
    pub fn byte_capacity(&self) -> usize {
        self.arena.len() * std::mem::size_of::<K>()
    }

    /// Borrow `bytes` bytes of staging memory for a variable-size round.
    ///
    /// Reuses the arena when the request fits, otherwise allocates a scratch
    /// block that is freed when the returned guard drops.
    pub fn staging(&mut self, bytes: usize) -> Result<Staging<'_>, DdmError> {
        if bytes <= self.byte_capacity() {
            log::debug!(
                "staging {bytes} bytes inside the {} byte halo arena",
                self.byte_capacity()
            );
            let all: &mut [u8] = bytemuck::cast_slice_mut(&mut self.arena[..]);
            return Ok(Staging::Arena(&mut all[..bytes]));
        }
        log::debug!(
            "staging {bytes} bytes in a scratch block (arena holds {})",
            self.byte_capacity()
        );
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(bytes)
            .map_err(|_| DdmError::AllocationFailed { bytes })?;
        scratch.resize(bytes, 0u8);
        Ok(Staging::Scratch(scratch))
    }
}

impl<K: Scalar> DebugInvariants for BufferPool<K> {
    fn validate_invariants(&self) -> Result<(), DdmError> {
        let mut expected = 0usize;
        for v in &self.views {
            if v.offset != expected {
                return Err(DdmError::LengthMismatch {
                    what: "buffer view offset",
                    expected,
                    got: v.offset,
                });
            }
            expected += v.len;
        }
        if self.arena.len() != 2 * self.half {
            return Err(DdmError::LengthMismatch {
                what: "buffer arena",
                expected: 2 * self.half,
                got: self.arena.len(),
            });
        }
        Ok(())
    }
}

/// Byte staging area: either a borrowed piece of the arena or a scratch block.
#[derive(Debug)]
pub enum Staging<'a> {
    Arena(&'a mut [u8]),
    Scratch(Vec<u8>),
}

impl Staging<'_> {
    /// True if the request was served from the halo arena.
    pub fn is_arena(&self) -> bool {
        matches!(self, Staging::Arena(_))
    }
}

impl Deref for Staging<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            Staging::Arena(s) => s,
            Staging::Scratch(v) => v,
        }
    }
}

impl DerefMut for Staging<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Staging::Arena(s) => s,
            Staging::Scratch(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_are_disjoint_and_in_neighbor_order() {
        let mut pool = BufferPool::<f64>::new([2, 0, 3]);
        assert_eq!(pool.total_shared(), 5);
        assert_eq!(pool.view(2), BufferView { offset: 2, len: 3 });
        pool.send_mut(0).copy_from_slice(&[1.0, 2.0]);
        pool.recv_mut(2).copy_from_slice(&[7.0, 8.0, 9.0]);
        assert_eq!(pool.send(0), &[1.0, 2.0]);
        assert_eq!(pool.recv(0), &[0.0, 0.0]);
        assert_eq!(pool.recv(2), &[7.0, 8.0, 9.0]);
        assert!(pool.recv(1).is_empty());
        assert!(pool.validate_invariants().is_ok());
    }

    #[test]
    fn zero_total_allocates_nothing() {
        let mut pool = BufferPool::<f32>::new(Vec::<usize>::new());
        assert!(pool.is_empty());
        assert_eq!(pool.byte_capacity(), 0);
        let s = pool.staging(0).unwrap();
        assert!(s.is_arena());
    }

    #[test]
    fn staging_falls_back_to_scratch() {
        let mut pool = BufferPool::<f64>::new([1, 1]);
        assert_eq!(pool.byte_capacity(), 32);
        assert!(pool.staging(32).unwrap().is_arena());
        let mut big = pool.staging(33).unwrap();
        assert!(!big.is_arena());
        big[32] = 7;
        assert_eq!(big.len(), 33);
    }
}
