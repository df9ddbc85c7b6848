//! Frame and frame pool: move-only ownership in place of raw-pointer
//! protocol headers and aliased queue metadata.
//!
//! `FramePool` here is the narrow collaborator the rest of the engine talks
//! to — a bounded free list of fixed-capacity buffers — not a general
//! allocator.

use alloc::boxed::Box;
use alloc::vec::Vec;

/// Maximum bytes a `Frame` can hold: a full Ethernet II frame (14 + 1500)
/// plus VLAN tag headroom.
pub const MAX_FRAME_LEN: usize = 1522;

/// Tag recording which single owner currently holds a frame. This does not
/// enforce anything by itself — it documents and lets tests assert the
/// invariant that a frame is referenced by at most one owner at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Pool,
    RxRing,
    ArpPending,
    NdpPending,
    TcpUnacked,
    InFlightToDriver,
}

/// An owned, fixed-capacity byte buffer with a length and a parse cursor.
/// Passed by move between layers; released back to its `FramePool` on drop
/// via `FramePool::release`, never implicitly.
pub struct Frame {
    data: Box<[u8; MAX_FRAME_LEN]>,
    len: usize,
    parse_idx: usize,
    pub owner: Owner,
}

impl Frame {
    fn new() -> Self {
        Frame { data: Box::new([0u8; MAX_FRAME_LEN]), len: 0, parse_idx: 0, owner: Owner::Pool }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= MAX_FRAME_LEN);
        self.len = len.min(MAX_FRAME_LEN);
    }

    pub fn capacity(&self) -> usize {
        MAX_FRAME_LEN
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.data[..len]
    }

    pub fn full_buf_mut(&mut self) -> &mut [u8; MAX_FRAME_LEN] {
        &mut self.data
    }

    /// Copy `bytes` into the buffer starting at 0 and set the length.
    pub fn fill(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(MAX_FRAME_LEN);
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        self.parse_idx = 0;
    }

    /// Current parse index: the offset of the next unconsumed header.
    pub fn parse_idx(&self) -> usize {
        self.parse_idx
    }

    pub fn set_parse_idx(&mut self, idx: usize) {
        self.parse_idx = idx.min(self.len);
    }

    pub fn advance(&mut self, by: usize) {
        self.parse_idx = (self.parse_idx + by).min(self.len);
    }

    /// Bytes not yet consumed by layer parsing.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.parse_idx..self.len]
    }

    fn reset(&mut self) {
        self.len = 0;
        self.parse_idx = 0;
        self.owner = Owner::Pool;
    }
}

/// Bounded free list of `Frame` buffers (: "lock-free (single
/// global free list)"). `alloc` distinguishes critical allocations (protocol
/// transmit paths that cannot tolerate failure, ) from
/// best-effort ones via `critical`; both simply return `None` on exhaustion
/// here — it is the caller's job to invoke `sys_error` for the critical case,
/// since that hook lives outside this crate's scope.
pub struct FramePool {
    free: Vec<Frame>,
    capacity: usize,
    outstanding: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(Frame::new());
        }
        FramePool { free, capacity, outstanding: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Allocate a frame from the pool. Returns `None` if exhausted — callers
    /// in the receive path silently drop on `None`; callers in
    /// a transmit path that cannot tolerate failure escalate to `sys_error`
    /// themselves.
    pub fn alloc(&mut self) -> Option<Frame> {
        let frame = self.free.pop()?;
        self.outstanding += 1;
        Some(frame)
    }

    /// Return a frame to the free list. This is the only way a `Frame`
    /// re-enters the pool — dropping a `Frame` without calling `release`
    /// leaks its slot, mirroring `sw/net`'s explicit pool-release
    /// discipline rather than relying on `Drop`, since a `Frame` may be in
    /// flight to a driver or parked on a resolver queue right up until the
    /// point its owner explicitly gives it back.
    pub fn release(&mut self, mut frame: Frame) {
        frame.reset();
        self.outstanding = self.outstanding.saturating_sub(1);
        self.free.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_returns_none() {
        let mut pool = FramePool::new(2);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        pool.release(a);
        assert!(pool.alloc().is_some());
        pool.release(b);
    }

    #[test]
    fn fill_resets_parse_cursor() {
        let mut pool = FramePool::new(1);
        let mut f = pool.alloc().unwrap();
        f.fill(&[1, 2, 3, 4]);
        f.advance(2);
        assert_eq!(f.remaining(), &[3, 4]);
        f.fill(&[9]);
        assert_eq!(f.parse_idx(), 0);
        assert_eq!(f.as_slice(), &[9]);
    }
}
