//! Halo exchange: reconcile values on DOFs duplicated across subdomains.
//!
//! One round posts a receive and a send per neighbor, using the neighbor's
//! receive and send slices of the [`BufferPool`]. Receives are completed in
//! whatever order the transport reports them and merged with a [`Delta`]
//! rule, so only order-independent rules give deterministic results when a
//! DOF is shared by several neighbors.

use std::mem::size_of;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::requests::RequestSet;
use crate::algs::wire::{cast_slice, cast_slice_mut, expect_exact_len};
use crate::data::buffer_pool::BufferPool;
use crate::data::scalar::Scalar;
use crate::ddm_error::DdmError;
use crate::overlap::delta::Delta;
use crate::overlap::neighbor_map::NeighborMap;

/// Everything a halo round borrows from its subdomain.
pub struct HaloCtx<'a, K, C: Communicator> {
    pub comm: &'a C,
    pub neighbors: &'a NeighborMap,
    pub pool: &'a mut BufferPool<K>,
    pub requests: &'a mut RequestSet<C>,
    pub tag: CommTag,
}

/// Merge every neighbor's copy of the shared DOFs into `values` with `D`.
///
/// With [`AddDelta`](crate::overlap::delta::AddDelta) each duplicated DOF ends
/// up holding the sum of all subdomains' contributions. Calling this twice
/// sums twice.
pub fn exchange_with<K, D, C>(ctx: HaloCtx<'_, K, C>, values: &mut [K]) -> Result<(), DdmError>
where
    K: Scalar,
    D: Delta<K>,
    C: Communicator,
{
    let HaloCtx {
        comm,
        neighbors,
        pool,
        requests,
        tag,
    } = ctx;
    check_len(neighbors, values.len())?;
    if pool.is_empty() {
        return Ok(());
    }
    post_round(comm, neighbors, pool, requests, tag, values);
    let res = complete_receives(neighbors, pool, requests, |i, pool| {
        for (&idx, &v) in neighbors.get(i).shared.iter().zip(pool.recv(i)) {
            D::fuse(&mut values[idx], v);
        }
    });
    requests.wait_all_sends();
    res
}

/// Same posting as [`exchange_with`], but leave each neighbor's values in its
/// receive slice instead of merging them.
pub fn recv_buffer<K, C>(ctx: HaloCtx<'_, K, C>, values: &[K]) -> Result<(), DdmError>
where
    K: Scalar,
    C: Communicator,
{
    let HaloCtx {
        comm,
        neighbors,
        pool,
        requests,
        tag,
    } = ctx;
    check_len(neighbors, values.len())?;
    if pool.is_empty() {
        return Ok(());
    }
    post_round(comm, neighbors, pool, requests, tag, values);
    let res = complete_receives(neighbors, pool, requests, |_, _| {});
    requests.wait_all_sends();
    res
}

fn check_len(neighbors: &NeighborMap, got: usize) -> Result<(), DdmError> {
    if got != neighbors.dof() {
        return Err(DdmError::LengthMismatch {
            what: "halo vector",
            expected: neighbors.dof(),
            got,
        });
    }
    Ok(())
}

fn post_round<K: Scalar, C: Communicator>(
    comm: &C,
    neighbors: &NeighborMap,
    pool: &mut BufferPool<K>,
    requests: &mut RequestSet<C>,
    tag: CommTag,
    values: &[K],
) {
    for (i, n) in neighbors.iter().enumerate() {
        let h = comm.irecv(n.rank, tag.as_u16(), cast_slice_mut(pool.recv_mut(i)));
        requests.post_recv(i, h);
    }
    for (i, n) in neighbors.iter().enumerate() {
        let send = pool.send_mut(i);
        for (slot, &idx) in send.iter_mut().zip(&n.shared) {
            *slot = values[idx];
        }
        let h = comm.isend(n.rank, tag.as_u16(), cast_slice(pool.send(i)));
        requests.post_send(i, h);
    }
}

/// Wait-any over the posted receives, copying each into its receive slice
/// and handing it to `on_recv`. The first failure is returned once every
/// receive has completed.
fn complete_receives<K, C, F>(
    neighbors: &NeighborMap,
    pool: &mut BufferPool<K>,
    requests: &mut RequestSet<C>,
    mut on_recv: F,
) -> Result<(), DdmError>
where
    K: Scalar,
    C: Communicator,
    F: FnMut(usize, &BufferPool<K>),
{
    let mut first_err = None;
    while let Some((i, data)) = requests.wait_any_recv() {
        if first_err.is_some() {
            continue;
        }
        let rank = neighbors.get(i).rank;
        let Some(data) = data else {
            log::warn!("halo receive from rank {rank} completed without data");
            first_err = Some(DdmError::CommError {
                neighbor: rank,
                message: "receive completed without data".into(),
            });
            continue;
        };
        let expected = pool.view(i).len * size_of::<K>();
        if let Err(e) = expect_exact_len(rank, data.len(), expected) {
            log::warn!("halo message from rank {rank}: {e}");
            first_err = Some(e);
            continue;
        }
        cast_slice_mut(pool.recv_mut(i)).copy_from_slice(&data);
        on_recv(i, pool);
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
