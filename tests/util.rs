#![allow(dead_code)]
use ddm_subdomain::prelude::*;
use std::thread;

/// Run `f` once per rank of a fresh in-process universe, one thread each,
/// and collect the results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let uni = LocalUniverse::new(size);
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = uni
            .comms()
            .into_iter()
            .map(|c| s.spawn(move || f(c)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// 1-D Laplacian `tridiag(-1, 2, -1)` of size `n`.
///
/// With `upper` only the upper triangle is stored and the matrix is flagged
/// symmetric.
pub fn laplacian(n: usize, upper: bool) -> CsrMatrix<f64> {
    let mut t = Vec::new();
    for i in 0..n {
        if i > 0 && !upper {
            t.push((i, i - 1, -1.0));
        }
        t.push((i, i, 2.0));
        if i + 1 < n {
            t.push((i, i + 1, -1.0));
        }
    }
    CsrMatrix::from_triplets(n, n, &t, upper).expect("valid laplacian")
}

/// Adjacency of rank `rank` in a 1-D chain of `size` subdomains with `n`
/// local DOFs each, neighbors sharing one end DOF.
pub fn chain(rank: usize, size: usize, n: usize) -> Vec<(usize, Vec<usize>)> {
    let mut nb = Vec::new();
    if rank > 0 {
        nb.push((rank - 1, vec![0]));
    }
    if rank + 1 < size {
        nb.push((rank + 1, vec![n - 1]));
    }
    nb
}

/// Subdomain of a 1-D chain on `comm`.
pub fn chain_subdomain(comm: LocalComm, n: usize, cfg: SubdomainConfig) -> Subdomain<f64, LocalComm> {
    let (rank, size) = (comm.rank(), comm.size());
    Subdomain::new(comm, laplacian(n, false), chain(rank, size, n), cfg).expect("valid subdomain")
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
