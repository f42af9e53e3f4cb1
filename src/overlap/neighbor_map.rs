//! Adjacency between subdomains: which local DOFs are duplicated on which rank.
//!
//! Both ends of an edge list the shared DOFs in the same order, so position
//! `p` of rank A's list for B and position `p` of B's list for A denote the
//! same DOF. Every protocol in this crate relies on that agreement.

use serde::{Deserialize, Serialize};

use crate::ddm_error::DdmError;
use crate::debug_invariants::DebugInvariants;

/// One neighboring subdomain and the local indices it shares with us.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub rank: usize,
    pub shared: Vec<usize>,
}

/// Neighbors sorted by rank, no duplicates, indices in `[0, dof)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborMap {
    dof: usize,
    entries: Vec<Neighbor>,
}

impl NeighborMap {
    /// Build and validate a map for a subdomain with `dof` unknowns.
    ///
    /// Entries are sorted by rank; the order of each shared list is kept.
    pub fn new<I>(dof: usize, my_rank: usize, neighbors: I) -> Result<Self, DdmError>
    where
        I: IntoIterator<Item = (usize, Vec<usize>)>,
    {
        let mut entries: Vec<Neighbor> = neighbors
            .into_iter()
            .map(|(rank, shared)| Neighbor { rank, shared })
            .collect();
        entries.sort_by_key(|n| n.rank);
        if let Some(n) = entries.iter().find(|n| n.rank == my_rank) {
            return Err(DdmError::SelfNeighbor(n.rank));
        }
        Self { dof, entries }.checked()
    }

    /// Map with no neighbors.
    pub fn empty(dof: usize) -> Self {
        Self {
            dof,
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn dof(&self) -> usize {
        self.dof
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> &Neighbor {
        &self.entries[i]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.entries.iter()
    }

    /// Ranks in ascending order.
    pub fn ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|n| n.rank)
    }

    /// Position of `rank` in the map.
    pub fn position(&self, rank: usize) -> Option<usize> {
        self.entries.binary_search_by_key(&rank, |n| n.rank).ok()
    }

    /// Shared-index counts in neighbor order.
    pub fn counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|n| n.shared.len())
    }

    /// Σ shared-index counts.
    pub fn total_shared(&self) -> usize {
        self.counts().sum()
    }

    /// Number of neighbors with a rank below `rank`; they come first.
    pub fn count_below(&self, rank: usize) -> usize {
        self.entries.partition_point(|n| n.rank < rank)
    }
}

impl<'a> IntoIterator for &'a NeighborMap {
    type Item = &'a Neighbor;
    type IntoIter = std::slice::Iter<'a, Neighbor>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl DebugInvariants for NeighborMap {
    fn validate_invariants(&self) -> Result<(), DdmError> {
        for w in self.entries.windows(2) {
            if w[0].rank == w[1].rank {
                return Err(DdmError::DuplicateNeighbor(w[0].rank));
            }
            debug_assert!(w[0].rank < w[1].rank, "neighbor map must be sorted");
        }
        for n in &self.entries {
            if let Some(&index) = n.shared.iter().find(|&&i| i >= self.dof) {
                return Err(DdmError::SharedIndexOutOfBounds {
                    rank: n.rank,
                    index,
                    dof: self.dof,
                });
            }
        }
        Ok(())
    }
}
