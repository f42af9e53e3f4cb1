//! Global DOF numbering by a rank-ordered distributed prefix sum.
//!
//! Neighbors split into *below* (lower rank) and *above* (higher rank).
//! Each rank
//! 1. waits for the final ids of DOFs shared with every below neighbor and for
//!    the running counter from rank `me - 1`;
//! 2. mints fresh, strictly increasing ids from that counter for the DOFs it
//!    owns that are still unset;
//! 3. forwards the new counter to rank `me + 1` and its final ids to every
//!    neighbor;
//! 4. takes the ids above neighbors minted for DOFs it does not own.
//!
//! The counter rides on the numbering message to `me + 1` when that rank is a
//! neighbor, otherwise it travels alone. At most one message crosses each
//! directed pair, all on the numbering tag. The last rank's end counter is
//! broadcast as the total.

use num_traits::Float;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::requests::RequestSet;
use crate::data::csr::IndexBase;
use crate::data::scalar::is_owner_weight;
use crate::ddm_error::DdmError;
use crate::overlap::neighbor_map::NeighborMap;

/// Wire marker of a DOF without an id yet.
pub const UNSET: u64 = u64::MAX;

/// Global id of a DOF.
pub type GlobalId = usize;

/// Local → global map with this rank's freshly minted range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalNumbering {
    ids: Vec<GlobalId>,
    start: GlobalId,
    end: GlobalId,
    global: usize,
    base: IndexBase,
}

impl GlobalNumbering {
    /// Identity numbering of a lone process.
    pub fn identity(dof: usize, base: IndexBase) -> Self {
        let b = base.offset();
        Self {
            ids: (b..b + dof).collect(),
            start: b,
            end: b + dof,
            global: dof,
            base,
        }
    }

    /// Numbering computed elsewhere, e.g. restored from a checkpoint.
    pub fn from_parts(
        ids: Vec<GlobalId>,
        owned: std::ops::Range<GlobalId>,
        total: usize,
        base: IndexBase,
    ) -> Self {
        Self {
            ids,
            start: owned.start,
            end: owned.end,
            global: total,
            base,
        }
    }

    /// Global id of every local DOF.
    #[inline]
    pub fn ids(&self) -> &[GlobalId] {
        &self.ids
    }

    #[inline]
    pub fn id(&self, local: usize) -> GlobalId {
        self.ids[local]
    }

    /// `[start, end)`: ids minted by this rank.
    #[inline]
    pub fn owned_range(&self) -> std::ops::Range<GlobalId> {
        self.start..self.end
    }

    #[inline]
    pub fn start(&self) -> GlobalId {
        self.start
    }

    #[inline]
    pub fn end(&self) -> GlobalId {
        self.end
    }

    /// Number of DOFs across all ranks.
    #[inline]
    pub fn total(&self) -> usize {
        self.global
    }

    #[inline]
    pub fn base(&self) -> IndexBase {
        self.base
    }

    /// True if local DOF `i` falls in this rank's minted range.
    pub fn is_owned(&self, i: usize) -> bool {
        self.owned_range().contains(&self.ids[i])
    }

    /// True when every id equals its local index (plus base).
    pub fn is_identity(&self) -> bool {
        let b = self.base.offset();
        self.ids.iter().enumerate().all(|(i, &g)| g == i + b)
    }

    pub fn into_ids(self) -> Vec<GlobalId> {
        self.ids
    }
}

/// Progress of one rank through the numbering protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NumberingPhase {
    /// Waiting for ids from below neighbors and the counter from `me - 1`.
    AwaitingSeed,
    /// Minting ids for owned, unset DOFs.
    ComputingLocal,
    /// Counter and ids sent; taking ids from above neighbors.
    Forwarding,
    Done,
}

struct Numbering<'a, C: Communicator> {
    comm: &'a C,
    neighbors: &'a NeighborMap,
    requests: &'a mut RequestSet<C>,
    tag: u16,
    me: usize,
    below: usize,
    ids: Vec<u64>,
    counter: u64,
    start: u64,
    chain_recv: Option<C::RecvHandle>,
    chain_send: Option<C::SendHandle>,
    phase: NumberingPhase,
    first_err: Option<DdmError>,
}

impl<'a, C: Communicator> Numbering<'a, C> {
    fn enter(&mut self, next: NumberingPhase) {
        log::trace!("rank {}: numbering {:?} -> {:?}", self.me, self.phase, next);
        self.phase = next;
    }

    fn fail(&mut self, e: DdmError) {
        log::warn!("rank {}: numbering: {e}", self.me);
        self.first_err.get_or_insert(e);
    }

    /// True if the neighbor in slot `k` is rank `me - 1`.
    fn is_predecessor(&self, k: usize) -> bool {
        self.me > 0 && self.neighbors.get(k).rank == self.me - 1
    }

    fn is_successor(&self, k: usize) -> bool {
        self.neighbors.get(k).rank == self.me + 1
    }

    fn post_receives(&mut self) {
        for (k, n) in self.neighbors.iter().enumerate() {
            let extra = usize::from(self.is_predecessor(k));
            let mut buf = vec![0u8; (n.shared.len() + extra) * 8];
            let h = self.comm.irecv(n.rank, self.tag, &mut buf);
            self.requests.post_recv(k, h);
        }
        let has_pred = (0..self.below).any(|k| self.is_predecessor(k));
        if self.me > 0 && !has_pred {
            self.chain_recv = Some(self.comm.irecv(self.me - 1, self.tag, &mut [0u8; 8]));
        }
    }

    fn decode(&mut self, k: usize, data: Option<Vec<u8>>, expected: usize) -> Option<Vec<u64>> {
        let rank = self.neighbors.get(k).rank;
        match data {
            Some(d) if d.len() == expected * 8 => Some(
                d.chunks_exact(8)
                    .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            other => {
                let got = other.map_or(0, |d| d.len());
                self.fail(DdmError::BufferSizeMismatch {
                    neighbor: rank,
                    expected: expected * 8,
                    got,
                });
                None
            }
        }
    }

    /// Phase 1: below neighbors' ids land first-writer-wins, plus the counter.
    fn await_seed(&mut self, base: u64) {
        if self.me == 0 {
            self.counter = base;
        }
        for k in 0..self.below {
            let data = self.requests.wait_recv(k).flatten();
            let shared = &self.neighbors.get(k).shared;
            let extra = usize::from(self.is_predecessor(k));
            let Some(vals) = self.decode(k, data, shared.len() + extra) else {
                continue;
            };
            for (&idx, &g) in self.neighbors.get(k).shared.iter().zip(&vals) {
                if self.ids[idx] == UNSET && g != UNSET {
                    self.ids[idx] = g;
                }
            }
            if extra == 1 {
                self.counter = vals[vals.len() - 1];
            }
        }
        if let Some(h) = self.chain_recv.take() {
            match h.wait() {
                Some(d) if d.len() == 8 => {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(&d);
                    self.counter = u64::from_le_bytes(b);
                }
                other => self.fail(DdmError::BufferSizeMismatch {
                    neighbor: self.me - 1,
                    expected: 8,
                    got: other.map_or(0, |d| d.len()),
                }),
            }
        }
        self.enter(NumberingPhase::ComputingLocal);
    }

    /// Phase 2: mint ids for owned DOFs nobody below has numbered.
    fn compute_local<R: Float>(&mut self, weights: Option<&[R]>, threshold: f64) {
        self.start = self.counter;
        for (i, id) in self.ids.iter_mut().enumerate() {
            let owned = weights.is_none_or(|w| is_owner_weight(w[i], threshold));
            if owned && *id == UNSET {
                *id = self.counter;
                self.counter += 1;
            }
        }
        self.enter(NumberingPhase::Forwarding);
    }

    /// Phase 3: counter to `me + 1`, ids to every neighbor, then ids from above.
    fn forward(&mut self) {
        let size = self.comm.size();
        let mut has_succ = false;
        for (k, n) in self.neighbors.iter().enumerate() {
            let mut msg: Vec<u8> = n
                .shared
                .iter()
                .flat_map(|&idx| self.ids[idx].to_le_bytes())
                .collect();
            if self.is_successor(k) {
                has_succ = true;
                msg.extend_from_slice(&self.counter.to_le_bytes());
            }
            let h = self.comm.isend(n.rank, self.tag, &msg);
            self.requests.post_send(k, h);
        }
        if self.me + 1 < size && !has_succ {
            self.chain_send = Some(self.comm.isend(self.me + 1, self.tag, &self.counter.to_le_bytes()));
        }

        while let Some((k, data)) = self.requests.wait_any_recv() {
            let n = self.neighbors.get(k).shared.len();
            let Some(vals) = self.decode(k, data, n) else {
                continue;
            };
            for (&idx, &g) in self.neighbors.get(k).shared.iter().zip(&vals) {
                if g != UNSET {
                    self.ids[idx] = g;
                }
            }
        }
        self.requests.wait_all_sends();
        if let Some(h) = self.chain_send.take() {
            let _ = h.wait();
        }
        self.enter(NumberingPhase::Done);
    }
}

/// Assign process-wide ids to the local DOFs; every rank must call this.
///
/// `weights` selects the DOFs this rank may mint ids for (weight strictly
/// above `threshold`); without weights every DOF is eligible. DOFs shared
/// with a lower rank take that rank's id.
#[allow(clippy::too_many_arguments)]
pub fn global_mapping<C, R>(
    comm: &C,
    neighbors: &NeighborMap,
    requests: &mut RequestSet<C>,
    tag: CommTag,
    broadcast_tag: CommTag,
    base: IndexBase,
    weights: Option<&[R]>,
    threshold: f64,
) -> Result<GlobalNumbering, DdmError>
where
    C: Communicator,
    R: Float,
{
    let dof = neighbors.dof();
    if let Some(w) = weights
        && w.len() != dof
    {
        return Err(DdmError::LengthMismatch {
            what: "ownership weights",
            expected: dof,
            got: w.len(),
        });
    }
    if comm.size() <= 1 {
        return Ok(GlobalNumbering::identity(dof, base));
    }

    let me = comm.rank();
    let mut run = Numbering {
        comm,
        neighbors,
        requests,
        tag: tag.as_u16(),
        me,
        below: neighbors.count_below(me),
        ids: vec![UNSET; dof],
        counter: 0,
        start: 0,
        chain_recv: None,
        chain_send: None,
        phase: NumberingPhase::AwaitingSeed,
        first_err: None,
    };
    run.post_receives();
    run.await_seed(base.offset() as u64);
    run.compute_local(weights, threshold);
    run.forward();
    debug_assert_eq!(run.phase, NumberingPhase::Done);

    let last = comm.size() - 1;
    let end = comm.broadcast_u64(last, run.counter, broadcast_tag.as_u16());

    if let Some(e) = run.first_err {
        return Err(e);
    }
    let global = end?.saturating_sub(base.offset() as u64) as usize;
    let unset = run.ids.iter().filter(|&&g| g == UNSET).count();
    if unset > 0 {
        return Err(DdmError::UnassignedDofs { count: unset });
    }
    log::debug!(
        "rank {me}: minted [{}, {}) of {global} global DOFs",
        run.start,
        run.counter
    );
    Ok(GlobalNumbering {
        ids: run.ids.iter().map(|&g| g as GlobalId).collect(),
        start: run.start as GlobalId,
        end: run.counter as GlobalId,
        global,
        base,
    })
}
