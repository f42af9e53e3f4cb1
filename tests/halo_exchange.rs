mod util;

use ddm_subdomain::prelude::*;
use proptest::prelude::*;
use util::{chain_subdomain, laplacian, run_ranks};

#[test]
fn chain_sums_every_interface() {
    let out = run_ranks(3, |comm| {
        let r = comm.rank() as f64;
        let mut s = chain_subdomain(comm, 3, SubdomainConfig::default());
        let mut v = vec![r + 1.0; 3];
        s.exchange(&mut v).unwrap();
        v
    });
    assert_eq!(out[0], vec![1.0, 1.0, 3.0]);
    assert_eq!(out[1], vec![3.0, 2.0, 5.0]);
    assert_eq!(out[2], vec![5.0, 3.0, 3.0]);
}

#[test]
fn exchange_twice_sums_twice() {
    let out = run_ranks(2, |comm| {
        let mut s = chain_subdomain(comm, 2, SubdomainConfig::default());
        let mut v = vec![1.0; 2];
        s.exchange(&mut v).unwrap();
        s.exchange(&mut v).unwrap();
        v
    });
    // 1 + 1 = 2, then 2 + 2 = 4
    assert_eq!(out[0], vec![1.0, 4.0]);
    assert_eq!(out[1], vec![4.0, 1.0]);
}

#[test]
fn recv_buffer_exposes_each_neighbor() {
    let out = run_ranks(3, |comm| {
        let r = comm.rank() as f64;
        let mut s = chain_subdomain(comm, 3, SubdomainConfig::default());
        let v = vec![10.0 * r, 0.0, 10.0 * r + 1.0];
        s.recv_buffer(&v).unwrap();
        (0..s.neighbors().len())
            .map(|i| s.received(i).to_vec())
            .collect::<Vec<_>>()
    });
    assert_eq!(out[0], vec![vec![10.0]]);
    assert_eq!(out[1], vec![vec![1.0], vec![20.0]]);
    assert_eq!(out[2], vec![vec![11.0]]);
}

#[test]
fn dof_shared_by_three_ranks() {
    // every rank shares its DOF 0 with both others, DOF 1 is private
    let out = run_ranks(3, |comm| {
        let me = comm.rank();
        let others: Vec<_> = (0..3).filter(|&r| r != me).map(|r| (r, vec![0])).collect();
        let mut s = Subdomain::new(comm, laplacian(2, false), others, SubdomainConfig::default())
            .unwrap();
        let mut v = vec![(me + 1) as f64, 7.0];
        s.exchange(&mut v).unwrap();
        v
    });
    for v in out {
        assert_eq!(v, vec![6.0, 7.0]);
    }
}

#[test]
fn copy_delta_takes_neighbor_value() {
    let out = run_ranks(2, |comm| {
        let r = comm.rank() as f64;
        let mut s = chain_subdomain(comm, 2, SubdomainConfig::default());
        let mut v = vec![r; 2];
        s.exchange_with::<CopyDelta>(&mut v).unwrap();
        v
    });
    assert_eq!(out[0], vec![0.0, 1.0]);
    assert_eq!(out[1], vec![0.0, 1.0]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn interface_value_is_sum_of_contributions(
        size in 2usize..5,
        n in 2usize..5,
        seed in proptest::collection::vec(-100i32..100, 20),
    ) {
        let contributions: Vec<Vec<f64>> = (0..size)
            .map(|r| (0..n).map(|i| seed[(r * n + i) % seed.len()] as f64).collect())
            .collect();
        let input = contributions.clone();
        let out = run_ranks(size, move |comm| {
            let mut v = input[comm.rank()].clone();
            let mut s = chain_subdomain(comm, n, SubdomainConfig::default());
            s.exchange(&mut v).unwrap();
            v
        });
        for r in 0..size {
            let mut want = contributions[r].clone();
            if r > 0 {
                want[0] += contributions[r - 1][n - 1];
            }
            if r + 1 < size {
                want[n - 1] += contributions[r + 1][0];
            }
            prop_assert_eq!(&out[r], &want);
        }
    }
}
