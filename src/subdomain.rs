//! Per-process context: local matrix, neighbor map, communication arena and
//! request slots, plus the protocols that run over them.

use std::borrow::Cow;

use crate::algs::assembly::{self, DistributedCsr};
use crate::algs::communicator::{Communicator, GroupRelation};
use crate::algs::halo::{self, HaloCtx};
use crate::algs::interaction::{self, InteractionCtx};
use crate::algs::numbering::{self, GlobalNumbering};
use crate::algs::requests::RequestSet;
use crate::config::SubdomainConfig;
use crate::data::buffer_pool::BufferPool;
use crate::data::csr::CsrMatrix;
use crate::data::scalar::Scalar;
use crate::ddm_error::DdmError;
use crate::debug_invariants::DebugInvariants;
use crate::overlap::delta::{AddDelta, Delta};
use crate::overlap::neighbor_map::NeighborMap;

/// One subdomain of a domain decomposition.
///
/// Owns its matrix and communicator; the buffer pool and request set live as
/// long as the subdomain and are reused by every exchange.
pub struct Subdomain<K: Scalar, C: Communicator> {
    comm: C,
    matrix: Option<CsrMatrix<K>>,
    neighbors: NeighborMap,
    pool: BufferPool<K>,
    requests: RequestSet<C>,
    config: SubdomainConfig,
}

impl<K: Scalar, C: Communicator> Subdomain<K, C> {
    /// Set up a subdomain from its square local matrix and `(rank, shared
    /// local indices)` adjacency.
    ///
    /// Shared lists must enumerate the same DOFs in the same order on both
    /// ends of every edge.
    pub fn new<I>(
        comm: C,
        matrix: CsrMatrix<K>,
        neighbors: I,
        config: SubdomainConfig,
    ) -> Result<Self, DdmError>
    where
        I: IntoIterator<Item = (usize, Vec<usize>)>,
    {
        if !matrix.is_square() {
            return Err(DdmError::NotSquare {
                rows: matrix.n_rows(),
                cols: matrix.n_cols(),
            });
        }
        matrix.debug_assert_invariants();
        if !config.tags.all_distinct() {
            log::warn!("subdomain tags collide: {:?}", config.tags);
        }
        let neighbors = NeighborMap::new(matrix.n_rows(), comm.rank(), neighbors)?;
        let pool = BufferPool::new(neighbors.counts());
        let requests = RequestSet::with_neighbors(neighbors.len());
        log::debug!(
            "rank {}: subdomain with {} DOFs, {} neighbors, {} shared",
            comm.rank(),
            neighbors.dof(),
            neighbors.len(),
            neighbors.total_shared()
        );
        Ok(Self {
            comm,
            matrix: Some(matrix),
            neighbors,
            pool,
            requests,
            config,
        })
    }

    /// A process that takes part in `comm` but owns no part of the problem.
    pub fn excluded(comm: C, config: SubdomainConfig) -> Self {
        Self {
            comm,
            matrix: None,
            neighbors: NeighborMap::empty(0),
            pool: BufferPool::new(std::iter::empty::<usize>()),
            requests: RequestSet::with_neighbors(0),
            config,
        }
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }
    #[inline]
    pub fn neighbors(&self) -> &NeighborMap {
        &self.neighbors
    }
    #[inline]
    pub fn dof(&self) -> usize {
        self.neighbors.dof()
    }
    #[inline]
    pub fn matrix(&self) -> Option<&CsrMatrix<K>> {
        self.matrix.as_ref()
    }
    #[inline]
    pub fn config(&self) -> &SubdomainConfig {
        &self.config
    }
    #[inline]
    pub fn is_excluded(&self) -> bool {
        self.matrix.is_none()
    }

    /// True unless this subdomain's communicator is identical or congruent to
    /// `reference`.
    pub fn is_excluded_from(&self, reference: &C) -> bool {
        !matches!(
            self.comm.relation(reference),
            GroupRelation::Identical | GroupRelation::Congruent
        )
    }

    fn halo_ctx(&mut self) -> HaloCtx<'_, K, C> {
        HaloCtx {
            comm: &self.comm,
            neighbors: &self.neighbors,
            pool: &mut self.pool,
            requests: &mut self.requests,
            tag: self.config.tags.halo,
        }
    }

    /// Sum every duplicated DOF of `values` over all subdomains sharing it.
    pub fn exchange(&mut self, values: &mut [K]) -> Result<(), DdmError> {
        self.exchange_with::<AddDelta>(values)
    }

    /// Merge neighbors' copies of the shared DOFs into `values` with `D`.
    pub fn exchange_with<D: Delta<K>>(&mut self, values: &mut [K]) -> Result<(), DdmError> {
        halo::exchange_with::<K, D, C>(self.halo_ctx(), values)
    }

    /// Exchange shared values without merging; read them with [`received`](Self::received).
    pub fn recv_buffer(&mut self, values: &[K]) -> Result<(), DdmError> {
        halo::recv_buffer(self.halo_ctx(), values)
    }

    /// Values neighbor `i` sent in the last [`recv_buffer`](Self::recv_buffer).
    ///
    /// The slice shares memory with interaction staging, so it is only valid
    /// until the next exchange of any kind.
    pub fn received(&self, i: usize) -> &[K] {
        self.pool.recv(i)
    }

    /// Exchange interaction blocks computed from the owned matrix.
    pub fn interaction(
        &mut self,
        weights: Option<&[K::Real]>,
    ) -> Result<Vec<CsrMatrix<K>>, DdmError> {
        let matrix = self.matrix.as_ref().ok_or(DdmError::Excluded)?;
        let ctx = InteractionCtx {
            comm: &self.comm,
            neighbors: &self.neighbors,
            pool: &mut self.pool,
            requests: &mut self.requests,
            sizes_tag: self.config.tags.interaction_sizes,
            data_tag: self.config.tags.interaction_data,
        };
        interaction::interaction(ctx, matrix, weights, &self.config.interaction)
    }

    /// Exchange interaction blocks computed from another `dof x dof` matrix,
    /// e.g. a 1-based or rescaled copy of the owned one.
    pub fn interaction_with(
        &mut self,
        matrix: &CsrMatrix<K>,
        weights: Option<&[K::Real]>,
    ) -> Result<Vec<CsrMatrix<K>>, DdmError> {
        let ctx = InteractionCtx {
            comm: &self.comm,
            neighbors: &self.neighbors,
            pool: &mut self.pool,
            requests: &mut self.requests,
            sizes_tag: self.config.tags.interaction_sizes,
            data_tag: self.config.tags.interaction_data,
        };
        interaction::interaction(ctx, matrix, weights, &self.config.interaction)
    }

    /// Global numbering of the local DOFs; collective over the communicator.
    ///
    /// Excluded processes take part with zero DOFs so the counter keeps
    /// flowing through them.
    pub fn global_mapping(
        &mut self,
        weights: Option<&[K::Real]>,
    ) -> Result<GlobalNumbering, DdmError> {
        numbering::global_mapping(
            &self.comm,
            &self.neighbors,
            &mut self.requests,
            self.config.tags.numbering,
            self.config.tags.broadcast,
            self.config.numbering_base,
            weights,
            self.config.ownership_threshold,
        )
    }

    /// Rows of the owned matrix with global id in `[first, last)`.
    pub fn distributed_csr(
        &self,
        numbering: &GlobalNumbering,
        first: usize,
        last: usize,
    ) -> Result<DistributedCsr<'_, K>, DdmError> {
        let matrix = self.matrix.as_ref().ok_or(DdmError::Excluded)?;
        assembly::distributed_csr(numbering, first, last, matrix, &self.config.assembly)
    }

    /// Compact the owned-range entries of a local vector.
    pub fn distributed_vec<'a>(
        &self,
        numbering: &GlobalNumbering,
        first: usize,
        last: usize,
        x: &'a [K],
    ) -> Result<Cow<'a, [K]>, DdmError> {
        assembly::gather(numbering, first, last, x, &self.config.assembly)
    }

    /// Write a compact owned-range vector back into local positions.
    pub fn scatter_vec(
        &self,
        numbering: &GlobalNumbering,
        first: usize,
        last: usize,
        compact: &[K],
        x: &mut [K],
    ) -> Result<(), DdmError> {
        assembly::scatter(numbering, first, last, compact, x)
    }
}

impl<K: Scalar, C: Communicator> std::fmt::Debug for Subdomain<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subdomain")
            .field("rank", &self.comm.rank())
            .field("dof", &self.dof())
            .field("neighbors", &self.neighbors.len())
            .field("excluded", &self.is_excluded())
            .finish()
    }
}
