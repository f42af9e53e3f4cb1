//! Thin façade over in-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: protocols call
//! `.wait()` (or probe with `.test()`) before they trust a buffer.
//! Messages between one (source, destination, tag) triple are never
//! reordered, which is what MPI guarantees too.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ddm_error::DdmError;

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag `n` slots after this one (wrapping).
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

/// One distinct tag per protocol of a subdomain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdomainCommTags {
    pub halo: CommTag,
    pub interaction_sizes: CommTag,
    pub interaction_data: CommTag,
    pub numbering: CommTag,
    pub broadcast: CommTag,
}

impl SubdomainCommTags {
    /// Assign consecutive tags starting at `base`.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            halo: base,
            interaction_sizes: base.offset(1),
            interaction_data: base.offset(2),
            numbering: base.offset(3),
            broadcast: base.offset(4),
        }
    }

    /// True if no two protocols share a tag.
    pub fn all_distinct(&self) -> bool {
        let t = [
            self.halo,
            self.interaction_sizes,
            self.interaction_data,
            self.numbering,
            self.broadcast,
        ];
        t.iter()
            .enumerate()
            .all(|(i, a)| t[i + 1..].iter().all(|b| a != b))
    }
}

impl Default for SubdomainCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x4DD0))
    }
}

/// How two communicators relate as process groups.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GroupRelation {
    /// Same group, same context.
    Identical,
    /// Same members in the same order, different context.
    Congruent,
    /// Same members, different order.
    Similar,
    Unequal,
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;

    /// Probe for completion without blocking.
    fn test(&mut self) -> bool {
        true
    }
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Non-blocking communication interface.
///
/// Implementations need not be `Send`: a process drives its communicator from
/// a single thread of control.
pub trait Communicator: 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Post a send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Post a receive from `peer`; `buf.len()` is the expected message size and
    /// the payload is returned by [`Wait::wait`].
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Relation of this communicator's group to `other`'s.
    fn relation(&self, other: &Self) -> GroupRelation;

    /// Broadcast a `u64` from `root`; every rank must call this.
    ///
    /// The default implementation fans out point-to-point messages on `tag`.
    /// A non-root rank that receives anything but 8 bytes fails with
    /// [`DdmError::BufferSizeMismatch`].
    fn broadcast_u64(&self, root: usize, value: u64, tag: u16) -> Result<u64, DdmError> {
        let me = self.rank();
        if me == root {
            let bytes = value.to_le_bytes();
            let sends: Vec<_> = (0..self.size())
                .filter(|&p| p != root)
                .map(|p| self.isend(p, tag, &bytes))
                .collect();
            for s in sends {
                let _ = s.wait();
            }
            return Ok(value);
        }
        let mut buf = [0u8; 8];
        let h = self.irecv(root, tag, &mut buf);
        let Some(data) = h.wait() else {
            log::warn!("rank {me}: broadcast from {root} delivered no value");
            return Err(DdmError::CommError {
                neighbor: root,
                message: "broadcast delivered no value".into(),
            });
        };
        if data.len() != buf.len() {
            log::warn!("rank {me}: broadcast from {root} carried {} bytes", data.len());
            return Err(DdmError::BufferSizeMismatch {
                neighbor: root,
                expected: buf.len(),
                got: data.len(),
            });
        }
        buf.copy_from_slice(&data);
        Ok(u64::from_le_bytes(buf))
    }

    /// True for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Single-process communicator: rank 0 of 1, every operation is a no-op.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn relation(&self, _other: &Self) -> GroupRelation {
        GroupRelation::Identical
    }
    fn broadcast_u64(&self, _root: usize, value: u64, _tag: u16) -> Result<u64, DdmError> {
        Ok(value)
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: ranks as threads of one process ---

type Route = (usize, usize, u16); // (src, dst, tag)

static NEXT_CONTEXT: AtomicUsize = AtomicUsize::new(1);

/// Shared mailbox of one communication context.
#[derive(Debug)]
struct Mailbox {
    context: usize,
    messages: DashMap<(Route, u64), Bytes>,
    sent: Mutex<HashMap<Route, u64>>,
    posted: Mutex<HashMap<Route, u64>>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            context: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            messages: DashMap::new(),
            sent: Mutex::new(HashMap::new()),
            posted: Mutex::new(HashMap::new()),
        }
    }

    fn next(counter: &Mutex<HashMap<Route, u64>>, route: Route) -> u64 {
        let mut guard = counter.lock();
        let seq = guard.entry(route).or_insert(0);
        let cur = *seq;
        *seq += 1;
        cur
    }
}

/// A group of in-process ranks sharing one mailbox.
///
/// `members` lists the world ranks of the group in group-rank order; two
/// universes with the same members but different mailboxes are congruent.
#[derive(Clone, Debug)]
pub struct LocalUniverse {
    mailbox: Arc<Mailbox>,
    members: Arc<[usize]>,
}

impl LocalUniverse {
    /// World of `size` ranks.
    pub fn new(size: usize) -> Self {
        Self::with_members((0..size).collect())
    }

    /// Group made of the given world ranks.
    pub fn with_members(members: Vec<usize>) -> Self {
        Self {
            mailbox: Arc::new(Mailbox::new()),
            members: members.into(),
        }
    }

    /// New context over the same members.
    pub fn duplicate(&self) -> Self {
        Self {
            mailbox: Arc::new(Mailbox::new()),
            members: Arc::clone(&self.members),
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Communicator handle of group rank `rank`.
    pub fn comm(&self, rank: usize) -> LocalComm {
        assert!(rank < self.members.len(), "rank {rank} outside universe");
        LocalComm {
            rank,
            mailbox: Arc::clone(&self.mailbox),
            members: Arc::clone(&self.members),
        }
    }

    /// One handle per rank.
    pub fn comms(&self) -> Vec<LocalComm> {
        (0..self.size()).map(|r| self.comm(r)).collect()
    }
}

/// In-process communicator backed by a shared [`dashmap`] mailbox.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    mailbox: Arc<Mailbox>,
    members: Arc<[usize]>,
}

/// Receive handle of [`LocalComm`]; claims its message lazily.
#[derive(Debug)]
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: (Route, u64),
    slot: Option<Bytes>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        while !self.test() {
            std::thread::yield_now();
        }
        self.slot.take().map(|b| b.to_vec())
    }

    fn test(&mut self) -> bool {
        if self.slot.is_none() {
            self.slot = self.mailbox.messages.remove(&self.key).map(|(_, v)| v);
        }
        self.slot.is_some()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let route = (self.rank, peer, tag);
        let seq = Mailbox::next(&self.mailbox.sent, route);
        self.mailbox
            .messages
            .insert((route, seq), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalHandle {
        let route = (peer, self.rank, tag);
        let seq = Mailbox::next(&self.mailbox.posted, route);
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (route, seq),
            slot: None,
        }
    }

    fn relation(&self, other: &Self) -> GroupRelation {
        let same_members = self.members == other.members;
        if same_members && self.mailbox.context == other.mailbox.context {
            GroupRelation::Identical
        } else if same_members {
            GroupRelation::Congruent
        } else {
            let mut a = self.members.to_vec();
            let mut b = other.members.to_vec();
            a.sort_unstable();
            b.sort_unstable();
            if a == b {
                GroupRelation::Similar
            } else {
                GroupRelation::Unequal
            }
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, DdmError, GroupRelation, Wait};
    use mpi::datatype::Equivalence;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::{CommunicatorRelation, SimpleCommunicator};
    use mpi::traits::*;

    /// MPI communicator wrapper; MPI must be initialized by the caller and the
    /// `Universe` kept alive for as long as this handle is used.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Wrap any MPI communicator (world or a split subgroup).
        pub fn from_communicator(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }

        /// Wrap `MPI_COMM_WORLD`.
        pub fn world() -> Self {
            Self::from_communicator(SimpleCommunicator::world())
        }

        pub fn raw(&self) -> &SimpleCommunicator {
            &self.world
        }
    }

    /// In-flight MPI operation over a heap block owned by the handle.
    ///
    /// The block is released only after the request has completed.
    pub struct MpiHandle {
        req: Option<Request<'static, [u8]>>,
        block: *mut [u8],
        received: Option<usize>,
        is_recv: bool,
    }

    impl MpiHandle {
        fn new(block: Box<[u8]>, is_recv: bool) -> (Self, &'static mut [u8]) {
            let raw = Box::into_raw(block);
            // SAFETY: `raw` stays allocated until `release`, which runs only
            // once the request has completed.
            let view = unsafe { &mut *raw };
            (
                Self {
                    req: None,
                    block: raw,
                    received: None,
                    is_recv,
                },
                view,
            )
        }

        fn finish(&mut self, status: mpi::point_to_point::Status) {
            let n = status.count(u8::equivalent_datatype()) as usize;
            self.received = Some(n);
        }

        fn release(&mut self) -> Option<Vec<u8>> {
            // SAFETY: the request is gone, so MPI no longer touches the block.
            let block = unsafe { Box::from_raw(self.block) };
            self.block = std::ptr::slice_from_raw_parts_mut(std::ptr::null_mut(), 0);
            if self.is_recv {
                let n = self.received.unwrap_or(block.len()).min(block.len());
                Some(block[..n].to_vec())
            } else {
                None
            }
        }
    }

    impl Wait for MpiHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                let status = req.wait();
                self.finish(status);
            }
            self.release()
        }

        fn test(&mut self) -> bool {
            match self.req.take() {
                None => true,
                Some(req) => match req.test() {
                    Ok(status) => {
                        self.finish(status);
                        true
                    }
                    Err(req) => {
                        self.req = Some(req);
                        false
                    }
                },
            }
        }
    }

    impl Drop for MpiHandle {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            if !self.block.is_null() {
                let _ = self.release();
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let (mut h, view) = MpiHandle::new(buf.to_vec().into_boxed_slice(), false);
            let view: &'static [u8] = view;
            h.req = Some(self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                view,
                tag as i32,
            ));
            h
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let (mut h, view) = MpiHandle::new(vec![0u8; buf.len()].into_boxed_slice(), true);
            h.req = Some(
                self.world
                    .process_at_rank(peer as i32)
                    .immediate_receive_into_with_tag(StaticScope, view, tag as i32),
            );
            h
        }

        fn relation(&self, other: &Self) -> GroupRelation {
            match self.world.compare(&other.world) {
                CommunicatorRelation::Identical => GroupRelation::Identical,
                CommunicatorRelation::Congruent => GroupRelation::Congruent,
                CommunicatorRelation::Similar => GroupRelation::Similar,
                CommunicatorRelation::Unequal => GroupRelation::Unequal,
            }
        }

        fn broadcast_u64(&self, root: usize, value: u64, _tag: u16) -> Result<u64, DdmError> {
            let mut v = value;
            self.world.process_at_rank(root as i32).broadcast_into(&mut v);
            Ok(v)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let uni = LocalUniverse::new(2);
        let (c0, c1) = (uni.comm(0), uni.comm(1));

        let mut recv_buf = [0u8; 4];
        let recv_handle = c1.irecv(0, 7, &mut recv_buf);
        c0.isend(1, 7, &[1, 2, 3, 4]);

        let data = recv_handle.wait().expect("data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_probes_without_blocking() {
        let uni = LocalUniverse::new(2);
        let (c0, c1) = (uni.comm(0), uni.comm(1));
        let mut h = c1.irecv(0, 3, &mut [0u8; 1]);
        assert!(!h.test());
        c0.isend(1, 3, &[9]);
        assert!(h.test());
        assert_eq!(h.wait(), Some(vec![9]));
    }

    #[test]
    fn receives_match_sends_in_posting_order() {
        let uni = LocalUniverse::new(2);
        let (c0, c1) = (uni.comm(0), uni.comm(1));
        let mut handles: Vec<_> = (0..5).map(|_| c1.irecv(0, 1, &mut [0u8; 1])).collect();
        for i in 0..5u8 {
            c0.isend(1, 1, &[i]);
        }
        // Probe out of order: the third receive still gets the third message.
        assert!(handles[2].test());
        let got: Vec<u8> = handles.into_iter().map(|h| h.wait().unwrap()[0]).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn group_relations() {
        let world = LocalUniverse::new(3);
        let dup = world.duplicate();
        let sub = LocalUniverse::with_members(vec![0, 1]);
        let shuffled = LocalUniverse::with_members(vec![2, 0, 1]);
        let w0 = world.comm(0);
        assert_eq!(w0.relation(&world.comm(1)), GroupRelation::Identical);
        assert_eq!(w0.relation(&dup.comm(0)), GroupRelation::Congruent);
        assert_eq!(w0.relation(&shuffled.comm(0)), GroupRelation::Similar);
        assert_eq!(w0.relation(&sub.comm(0)), GroupRelation::Unequal);
    }

    #[test]
    fn tags_are_distinct() {
        let tags = SubdomainCommTags::default();
        assert!(tags.all_distinct());
        assert_eq!(tags.interaction_data, tags.halo.offset(2));
        let clash = SubdomainCommTags {
            numbering: tags.halo,
            ..tags
        };
        assert!(!clash.all_distinct());
    }

    #[test]
    fn commtag_offset_wraps() {
        assert_eq!(CommTag::new(u16::MAX).offset(1).as_u16(), 0);
    }

    #[test]
    fn no_comm_is_nop() {
        let comm = NoComm;
        assert!(comm.is_no_comm());
        let h = comm.irecv(0, 1, &mut [0u8; 8]);
        assert!(h.wait().is_none());
        assert_eq!(comm.broadcast_u64(0, 17, 0), Ok(17));
    }
}
