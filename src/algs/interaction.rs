//! Interaction blocks: matrix entries coupling local DOFs to a neighbor's
//! shared DOFs, exchanged so each side can assemble the other's coupling.
//!
//! The exchange runs in two rounds over the request set:
//! 1. size records ([`WireSizes`]) on the sizes tag, one per neighbor;
//! 2. payloads ([`encode_block`] layout) on the data tag, completed in
//!    arrival order and decoded into one [`CsrMatrix`] per neighbor.
//!
//! Outgoing payloads and incoming bytes are staged in the halo arena when
//! they fit, otherwise in a scratch block released at the end of the call.

use std::mem::size_of;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::requests::RequestSet;
use crate::algs::wire::{
    WireRun, WireSizes, block_len, decode_block, encode_block, expect_exact_len, wire_u32,
    DecodedBlock,
};
use crate::config::InteractionOptions;
use crate::data::buffer_pool::BufferPool;
use crate::data::csr::CsrMatrix;
use crate::data::scalar::Scalar;
use crate::ddm_error::DdmError;
use crate::overlap::neighbor_map::NeighborMap;

/// One coupling `(shared position, local column, raw entry position)`.
pub type Coupling = (u32, u32, usize);

/// Everything an interaction exchange borrows from its subdomain.
pub struct InteractionCtx<'a, K, C: Communicator> {
    pub comm: &'a C,
    pub neighbors: &'a NeighborMap,
    pub pool: &'a mut BufferPool<K>,
    pub requests: &'a mut RequestSet<C>,
    pub sizes_tag: CommTag,
    pub data_tag: CommTag,
}

/// Entries of `matrix` that couple local DOFs to the DOFs listed in `shared`,
/// oriented with the shared DOF as row and sorted lexicographically.
///
/// A non-shared row `i` contributes `(pos(c), i, j)` for each entry `j` whose
/// column `c` is shared. With `symmetric`, a shared row contributes its
/// entries toward columns outside the shared set as `(pos(i), c, j)`.
pub fn collect_couplings<K: Scalar>(
    matrix: &CsrMatrix<K>,
    shared: &[usize],
    symmetric: bool,
) -> Vec<Coupling> {
    let mut lookup: Vec<(usize, u32)> = shared
        .iter()
        .enumerate()
        .map(|(p, &idx)| (idx, p as u32))
        .collect();
    lookup.sort_unstable();
    let find = |idx: usize| {
        lookup
            .binary_search_by_key(&idx, |&(i, _)| i)
            .ok()
            .map(|at| lookup[at].1)
    };

    let mut out = Vec::new();
    for i in 0..matrix.n_rows() {
        match find(i) {
            Some(row_pos) => {
                if symmetric {
                    for (j, c, _) in matrix.row(i) {
                        if find(c).is_none() {
                            out.push((row_pos, c as u32, j));
                        }
                    }
                }
            }
            None => {
                for (j, c, _) in matrix.row(i) {
                    if let Some(col_pos) = find(c) {
                        out.push((col_pos, i as u32, j));
                    }
                }
            }
        }
    }
    out.sort_unstable();
    out
}

/// Outgoing payload of one neighbor, ready to be encoded.
struct Outgoing<K> {
    runs: Vec<WireRun>,
    cols: Vec<u32>,
    values: Vec<K>,
}

impl<K: Scalar> Outgoing<K> {
    fn build(
        matrix: &CsrMatrix<K>,
        couplings: &[Coupling],
        weights: Option<&[K::Real]>,
    ) -> Result<Self, DdmError> {
        let runs = couplings
            .iter()
            .map(|t| t.0)
            .dedup_with_count()
            .map(|(len, row)| Ok(WireRun::new(row, wire_u32("run length", len)?)))
            .collect::<Result<_, DdmError>>()?;
        let cols = couplings.iter().map(|t| t.1).collect();
        let values = couplings
            .iter()
            .map(|&(_, _, j)| {
                let mut v = matrix.values()[j];
                if let Some(w) = weights.and_then(|w| w.get(matrix.col_at(j))) {
                    v.scale_by(*w);
                }
                v
            })
            .collect();
        Ok(Self { runs, cols, values })
    }

    fn byte_len(&self) -> usize {
        block_len::<K>(self.runs.len(), self.values.len())
    }
}

fn outgoing_blocks<K: Scalar>(
    matrix: &CsrMatrix<K>,
    neighbors: &NeighborMap,
    symmetric: bool,
    weights: Option<&[K::Real]>,
) -> Result<Vec<Outgoing<K>>, DdmError> {
    let build = |k: usize| {
        let couplings = collect_couplings(matrix, &neighbors.get(k).shared, symmetric);
        Outgoing::build(matrix, &couplings, weights)
    };
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..neighbors.len()).into_par_iter().map(build).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..neighbors.len()).map(build).collect()
    }
}

/// Exchange interaction blocks with every neighbor.
///
/// Returns one block per neighbor, in neighbor order: block `k` has one row
/// per local DOF and one column per distinct column id received from
/// neighbor `k`, numbered in first-seen order. A matrix whose shape differs
/// from `dof x dof` is reported and used anyway.
///
/// `weights` is only read when `opts.scale` is set.
pub fn interaction<K, C>(
    ctx: InteractionCtx<'_, K, C>,
    matrix: &CsrMatrix<K>,
    weights: Option<&[K::Real]>,
    opts: &InteractionOptions,
) -> Result<Vec<CsrMatrix<K>>, DdmError>
where
    K: Scalar,
    C: Communicator,
{
    let InteractionCtx {
        comm,
        neighbors,
        pool,
        requests,
        sizes_tag,
        data_tag,
    } = ctx;
    let dof = neighbors.dof();
    if matrix.n_rows() != dof || matrix.n_cols() != dof {
        log::error!(
            "interaction matrix is {}x{}, subdomain has {dof} DOFs",
            matrix.n_rows(),
            matrix.n_cols()
        );
    }
    let weights = if opts.scale { weights } else { None };
    if let Some(w) = weights
        && w.len() != dof
    {
        return Err(DdmError::LengthMismatch {
            what: "interaction weights",
            expected: dof,
            got: w.len(),
        });
    }
    if neighbors.is_empty() {
        return Ok(Vec::new());
    }

    // local indices travel as u32 columns
    wire_u32("matrix dimension", matrix.n_rows().max(matrix.n_cols()))?;
    let symmetric = opts.symmetric.unwrap_or(matrix.is_symmetric());
    let outgoing = outgoing_blocks(matrix, neighbors, symmetric, weights)?;
    let sizes = outgoing
        .iter()
        .map(|out| WireSizes::new(out.runs.len(), out.byte_len()))
        .collect::<Result<Vec<_>, _>>()?;

    // round 1: sizes
    for (k, n) in neighbors.iter().enumerate() {
        let h = comm.irecv(n.rank, sizes_tag.as_u16(), &mut [0u8; size_of::<WireSizes>()]);
        requests.post_recv(k, h);
    }
    for (k, (n, s)) in neighbors.iter().zip(&sizes).enumerate() {
        let h = comm.isend(n.rank, sizes_tag.as_u16(), bytemuck::bytes_of(s));
        requests.post_send(k, h);
    }
    let incoming = wait_sizes(neighbors, requests);
    requests.wait_all_sends();
    let incoming = incoming?;

    // round 2: payloads
    let recv_total: usize = incoming.iter().map(WireSizes::len).sum();
    let send_total: usize = outgoing.iter().map(Outgoing::byte_len).sum();
    let mut staging = pool.staging(recv_total + send_total)?;
    let (recv_area, send_area) = staging.split_at_mut(recv_total);

    let mut recv_at = Vec::with_capacity(neighbors.len());
    let mut off = 0;
    for (k, n) in neighbors.iter().enumerate() {
        let len = incoming[k].len();
        let h = comm.irecv(n.rank, data_tag.as_u16(), &mut recv_area[off..off + len]);
        requests.post_recv(k, h);
        recv_at.push(off..off + len);
        off += len;
    }
    let mut off = 0;
    for (k, n) in neighbors.iter().enumerate() {
        let out = &outgoing[k];
        let buf = &mut send_area[off..off + out.byte_len()];
        if let Err(e) = encode_block(buf, &out.runs, &out.cols, &out.values) {
            requests.drain();
            return Err(e);
        }
        let h = comm.isend(n.rank, data_tag.as_u16(), buf);
        requests.post_send(k, h);
        off += out.byte_len();
    }
    log::debug!(
        "interaction: {} neighbors, {recv_total} bytes in, {send_total} bytes out",
        neighbors.len()
    );

    let mut blocks: Vec<Option<CsrMatrix<K>>> = (0..neighbors.len()).map(|_| None).collect();
    let mut first_err = None;
    while let Some((k, data)) = requests.wait_any_recv() {
        if first_err.is_some() {
            continue;
        }
        let rank = neighbors.get(k).rank;
        let res = data
            .ok_or_else(|| DdmError::CommError {
                neighbor: rank,
                message: "interaction payload completed without data".into(),
            })
            .and_then(|data| {
                let dst = &mut recv_area[recv_at[k].clone()];
                expect_exact_len(rank, data.len(), dst.len())?;
                dst.copy_from_slice(&data);
                decode_block::<K>(rank, dst, incoming[k].runs())
            })
            .and_then(|decoded| {
                assemble_block(rank, &neighbors.get(k).shared, dof, decoded, opts.sorted)
            });
        match res {
            Ok(block) => blocks[k] = Some(block),
            Err(e) => {
                log::warn!("interaction with rank {rank} failed: {e}");
                first_err = Some(e);
            }
        }
    }
    requests.wait_all_sends();
    if let Some(e) = first_err {
        return Err(e);
    }
    Ok(blocks
        .into_iter()
        .map(|b| b.unwrap_or_else(|| CsrMatrix::zeroed(dof, 0, 0)))
        .collect())
}

fn wait_sizes<C: Communicator>(
    neighbors: &NeighborMap,
    requests: &mut RequestSet<C>,
) -> Result<Vec<WireSizes>, DdmError> {
    let mut sizes = vec![WireSizes::default(); neighbors.len()];
    let mut first_err = None;
    while let Some((k, data)) = requests.wait_any_recv() {
        let rank = neighbors.get(k).rank;
        match data {
            Some(d) if d.len() == size_of::<WireSizes>() => {
                sizes[k] = bytemuck::pod_read_unaligned(&d);
            }
            other => {
                let got = other.map_or(0, |d| d.len());
                first_err.get_or_insert(DdmError::BufferSizeMismatch {
                    neighbor: rank,
                    expected: size_of::<WireSizes>(),
                    got,
                });
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(sizes),
    }
}

/// Turn a decoded payload from a neighbor into a `dof x distinct-cols` block.
///
/// `shared` is our list for that neighbor; run rows are positions in it.
fn assemble_block<K: Scalar>(
    neighbor: usize,
    shared: &[usize],
    dof: usize,
    decoded: DecodedBlock<K>,
    sorted: bool,
) -> Result<CsrMatrix<K>, DdmError> {
    let DecodedBlock { runs, cols, values } = decoded;
    let nnz = values.len().min(cols.len());

    let mut rows = Vec::with_capacity(runs.len());
    let mut row_ptr = vec![0usize; dof + 1];
    for &(pos, len) in &runs {
        let Some(&row) = shared.get(pos) else {
            return Err(DdmError::MalformedPayload {
                neighbor,
                message: format!("row position {pos} outside {} shared DOFs", shared.len()),
            });
        };
        row_ptr[row + 1] = row_ptr[row + 1].saturating_add(len);
        rows.push(row);
    }
    for i in 0..dof {
        row_ptr[i + 1] = row_ptr[i + 1].saturating_add(row_ptr[i]);
    }
    let total = row_ptr[dof];
    if total != nnz {
        log::error!(
            "interaction block from rank {neighbor}: row pointers end at {total}, payload holds {nnz} entries"
        );
    }
    // entries the payload cannot back are dropped, keeping row pointers
    // monotone and bounded by what was received
    let kept = total.min(nnz);
    for p in row_ptr.iter_mut() {
        *p = (*p).min(kept);
    }

    let mut col_map: HashMap<u32, usize> = HashMap::with_capacity(kept);
    for &c in &cols[..kept] {
        let next = col_map.len();
        col_map.entry(c).or_insert(next);
    }

    let mut block = CsrMatrix::<K>::zeroed(dof, col_map.len(), kept);
    let (ptr, col_idx, vals) = block.parts_mut();
    ptr.copy_from_slice(&row_ptr);

    let mut fill = row_ptr[..dof].to_vec();
    let mut m = 0;
    'runs: for (&row, &(_, len)) in rows.iter().zip(&runs) {
        for _ in 0..len {
            if m >= kept {
                break 'runs;
            }
            let at = fill[row];
            if at < row_ptr[row + 1] {
                col_idx[at] = col_map[&cols[m]];
                vals[at] = values[m];
                fill[row] += 1;
            }
            m += 1;
        }
    }

    if sorted {
        for i in 0..dof {
            let (start, end) = (row_ptr[i], row_ptr[i + 1]);
            if end - start < 2 {
                continue;
            }
            let mut entries: Vec<(usize, K)> = col_idx[start..end]
                .iter()
                .copied()
                .zip(vals[start..end].iter().copied())
                .collect();
            entries.sort_by_key(|e| e.0);
            for (at, (c, v)) in (start..end).zip(entries) {
                col_idx[at] = c;
                vals[at] = v;
            }
        }
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, LocalUniverse};
    use crate::debug_invariants::DebugInvariants;

    fn laplacian(n: usize, symmetric: bool) -> CsrMatrix<f64> {
        let mut t = Vec::new();
        for i in 0..n {
            if i > 0 && !symmetric {
                t.push((i, i - 1, -1.0));
            }
            t.push((i, i, 2.0));
            if i + 1 < n {
                t.push((i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(n, n, &t, symmetric).unwrap()
    }

    #[test]
    fn non_shared_rows_are_transposed() {
        let a = laplacian(4, false);
        // shared DOF 3: row 2 couples to it
        let c = collect_couplings(&a, &[3], false);
        assert_eq!(c, vec![(0, 2, a.row_range(2).end - 1)]);
    }

    #[test]
    fn symmetric_shared_rows_skip_shared_columns() {
        let a = laplacian(4, true);
        // upper triangle: row 1 stores (1,1),(1,2); row 2 stores (2,2),(2,3)
        let c = collect_couplings(&a, &[1, 3], true);
        let (rows, cols): (Vec<u32>, Vec<u32>) = c.iter().map(|t| (t.0, t.1)).unzip();
        // row 0 -> 1 (pos 0); shared row 1 -> col 2 only; row 2 -> 3 (pos 1)
        assert_eq!(rows, vec![0, 0, 1]);
        assert_eq!(cols, vec![0, 2, 2]);
    }

    #[test]
    fn couplings_are_sorted() {
        let a = laplacian(6, false);
        let c = collect_couplings(&a, &[5, 0], false);
        assert!(c.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(c[0].0, 0);
        assert_eq!(c.last().map(|t| t.0), Some(1));
    }

    #[test]
    fn assembled_block_maps_columns_first_seen() {
        let decoded = DecodedBlock {
            runs: vec![(0, 2), (1, 1)],
            cols: vec![9, 4, 9],
            values: vec![1.0f64, 2.0, 3.0],
        };
        let b = assemble_block(1, &[3, 0], 4, decoded, true).unwrap();
        assert_eq!(b.n_rows(), 4);
        assert_eq!(b.n_cols(), 2);
        assert_eq!(b.row_ptr(), &[0, 1, 1, 1, 3]);
        // row 3 got cols 9 -> 0, 4 -> 1, already sorted
        let r3: Vec<_> = b.row(3).map(|(_, c, v)| (c, v)).collect();
        assert_eq!(r3, vec![(0, 1.0), (1, 2.0)]);
        let r0: Vec<_> = b.row(0).map(|(_, c, v)| (c, v)).collect();
        assert_eq!(r0, vec![(0, 3.0)]);
    }

    #[test]
    fn unsorted_rows_keep_wire_order() {
        let decoded = DecodedBlock {
            runs: vec![(0, 2)],
            cols: vec![4, 9, 4],
            values: vec![1.0f64, 2.0, 3.0],
        };
        // second run missing: nnz mismatch is reported, not fatal
        let b = assemble_block(1, &[1], 2, decoded, false).unwrap();
        assert_eq!(b.row_ptr(), &[0, 0, 2]);
        assert_eq!(b.nnz(), 2);
        assert_eq!(b.col_idx(), &[0, 1]);
    }

    #[test]
    fn runs_longer_than_payload_are_truncated() {
        let decoded = DecodedBlock {
            runs: vec![(0, 5), (1, 1)],
            cols: vec![7],
            values: vec![1.0f64],
        };
        let b = assemble_block(1, &[0, 1], 2, decoded, true).unwrap();
        assert_eq!(b.row_ptr(), &[0, 1, 1]);
        assert_eq!(b.col_idx(), &[0]);
        assert_eq!(b.values(), &[1.0]);
        assert_eq!(b.n_cols(), 1);
        assert!(b.validate_invariants().is_ok());
    }

    #[test]
    fn bad_row_position_is_malformed() {
        let decoded = DecodedBlock {
            runs: vec![(5, 1)],
            cols: vec![0],
            values: vec![1.0f64],
        };
        assert!(matches!(
            assemble_block(2, &[0], 1, decoded, true),
            Err(DdmError::MalformedPayload { neighbor: 2, .. })
        ));
    }

    #[test]
    fn two_ranks_exchange_couplings() {
        let uni = LocalUniverse::new(2);
        let run = |comm: LocalComm, shared: usize| {
            let neighbors = NeighborMap::new(4, comm.rank(), vec![(1 - comm.rank(), vec![shared])])
                .unwrap();
            let mut pool = BufferPool::<f64>::new(neighbors.counts());
            let mut requests = RequestSet::with_neighbors(1);
            let a = laplacian(4, false);
            let ctx = InteractionCtx {
                comm: &comm,
                neighbors: &neighbors,
                pool: &mut pool,
                requests: &mut requests,
                sizes_tag: CommTag::new(20),
                data_tag: CommTag::new(21),
            };
            interaction(ctx, &a, None, &InteractionOptions::default()).unwrap()
        };
        let c1 = uni.comm(1);
        let t = std::thread::spawn(move || run(c1, 0));
        let on_a = run(uni.comm(0), 3);
        let on_b = t.join().unwrap();
        // B's row 1 couples to its shared DOF 0, sent to A as (pos 0, col 1)
        assert_eq!(on_a[0].n_cols(), 1);
        let r3: Vec<_> = on_a[0].row(3).map(|(_, c, v)| (c, v)).collect();
        assert_eq!(r3, vec![(0, -1.0)]);
        assert_eq!(on_b[0].row(0).count(), 1);
        assert_eq!(on_b[0].nnz(), 1);
    }
}
