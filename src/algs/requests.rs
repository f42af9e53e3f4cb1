//! Fixed-capacity set of in-flight operations, one receive and one send slot
//! per neighbor, laid out `[recv_0 .. recv_{n-1}, send_0 .. send_{n-1}]`.
//!
//! A round posts into empty slots and must empty them again (wait or drain)
//! before the next round starts; posting over an occupied slot is a bug.

use crate::algs::communicator::{Communicator, Wait};

/// Request slots of one subdomain.
pub struct RequestSet<C: Communicator> {
    recvs: Vec<Option<C::RecvHandle>>,
    sends: Vec<Option<C::SendHandle>>,
}

impl<C: Communicator> RequestSet<C> {
    pub fn with_neighbors(n: usize) -> Self {
        Self {
            recvs: (0..n).map(|_| None).collect(),
            sends: (0..n).map(|_| None).collect(),
        }
    }

    /// Total number of slots, `2 * neighbors`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.recvs.len() + self.sends.len()
    }

    /// True when nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.recvs.iter().all(Option::is_none) && self.sends.iter().all(Option::is_none)
    }

    pub fn post_recv(&mut self, i: usize, h: C::RecvHandle) {
        debug_assert!(self.recvs[i].is_none(), "receive slot {i} still in flight");
        self.recvs[i] = Some(h);
    }

    pub fn post_send(&mut self, i: usize, h: C::SendHandle) {
        debug_assert!(self.sends[i].is_none(), "send slot {i} still in flight");
        self.sends[i] = Some(h);
    }

    /// Block until some posted receive completes; `None` once none is left.
    ///
    /// Completion order is whatever the transport reports first.
    pub fn wait_any_recv(&mut self) -> Option<(usize, Option<Vec<u8>>)> {
        if self.recvs.iter().all(Option::is_none) {
            return None;
        }
        loop {
            for (i, slot) in self.recvs.iter_mut().enumerate() {
                if let Some(h) = slot
                    && h.test()
                {
                    let h = slot.take()?;
                    return Some((i, h.wait()));
                }
            }
            std::thread::yield_now();
        }
    }

    /// Block on receive slot `i`; `None` if nothing was posted there.
    pub fn wait_recv(&mut self, i: usize) -> Option<Option<Vec<u8>>> {
        self.recvs[i].take().map(Wait::wait)
    }

    /// Block until every posted send has completed.
    pub fn wait_all_sends(&mut self) {
        for slot in &mut self.sends {
            if let Some(h) = slot.take() {
                let _ = h.wait();
            }
        }
    }

    /// Complete everything still in flight and discard received data.
    ///
    /// Error paths call this so no buffer is released while in use.
    pub fn drain(&mut self) {
        for slot in &mut self.recvs {
            if let Some(h) = slot.take() {
                let _ = h.wait();
            }
        }
        self.wait_all_sends();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{Communicator, LocalUniverse};

    #[test]
    fn wait_any_follows_arrival_order() {
        let uni = LocalUniverse::new(3);
        let (c0, c1, c2) = (uni.comm(0), uni.comm(1), uni.comm(2));
        let mut set = RequestSet::<crate::algs::communicator::LocalComm>::with_neighbors(2);
        assert_eq!(set.capacity(), 4);
        set.post_recv(0, c0.irecv(1, 5, &mut [0u8; 1]));
        set.post_recv(1, c0.irecv(2, 5, &mut [0u8; 1]));
        c2.isend(0, 5, &[2]);
        assert_eq!(set.wait_any_recv(), Some((1, Some(vec![2]))));
        c1.isend(0, 5, &[1]);
        assert_eq!(set.wait_any_recv(), Some((0, Some(vec![1]))));
        assert_eq!(set.wait_any_recv(), None);
        assert!(set.is_idle());
    }

    #[test]
    fn drain_empties_every_slot() {
        let uni = LocalUniverse::new(2);
        let (c0, c1) = (uni.comm(0), uni.comm(1));
        let mut set = RequestSet::<crate::algs::communicator::LocalComm>::with_neighbors(1);
        set.post_recv(0, c0.irecv(1, 2, &mut [0u8; 3]));
        set.post_send(0, c0.isend(1, 2, &[1, 2, 3]));
        c1.isend(0, 2, &[4, 5, 6]);
        set.drain();
        assert!(set.is_idle());
        assert_eq!(set.wait_recv(0), None);
    }
}
