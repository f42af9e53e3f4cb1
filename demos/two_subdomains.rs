//! Two subdomains of a 1-D Laplacian sharing one DOF, run on in-process ranks.
//!
//! ```text
//! cargo run --example two_subdomains
//! ```

use std::thread;

use ddm_subdomain::prelude::*;

fn laplacian(n: usize) -> CsrMatrix<f64> {
    let mut t = Vec::new();
    for i in 0..n {
        if i > 0 {
            t.push((i, i - 1, -1.0));
        }
        t.push((i, i, 2.0));
        if i + 1 < n {
            t.push((i, i + 1, -1.0));
        }
    }
    CsrMatrix::from_triplets(n, n, &t, false).expect("valid laplacian")
}

fn run(comm: LocalComm) -> Result<String, DdmError> {
    let me = comm.rank();
    // rank 0's DOF 3 is rank 1's DOF 0
    let neighbors = if me == 0 { vec![(1, vec![3])] } else { vec![(0, vec![0])] };
    let mut sub = Subdomain::new(comm, laplacian(4), neighbors, SubdomainConfig::default())?;

    let mut ones = vec![1.0; 4];
    sub.exchange(&mut ones)?;

    let blocks = sub.interaction(None)?;
    let numbering = sub.global_mapping(None)?;
    let own = numbering.owned_range();
    let rows = sub.distributed_csr(&numbering, own.start, own.end)?;

    Ok(format!(
        "rank {me}: multiplicity {ones:?}, {} interaction block(s), ids {:?} of {}, owns {:?} ({} nnz)",
        blocks.len(),
        numbering.ids(),
        numbering.total(),
        own,
        rows.values().len(),
    ))
}

fn main() -> Result<(), DdmError> {
    let uni = LocalUniverse::new(2);
    let reports = thread::scope(|s| {
        let handles: Vec<_> = uni.comms().into_iter().map(|c| s.spawn(move || run(c))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect::<Result<Vec<_>, _>>()
    })?;
    for line in reports {
        println!("{line}");
    }
    Ok(())
}
