mod util;

use ddm_subdomain::algs::RequestSet;
use ddm_subdomain::prelude::*;
use util::run_ranks;

#[test]
fn local_round_trip() {
    let tag = CommTag::new(0x1000);
    let uni = LocalUniverse::new(2);
    let (c0, c1) = (uni.comm(0), uni.comm(1));

    let msg = b"hello";
    c0.isend(1, tag.as_u16(), msg);

    let mut buf = [0u8; 5];
    let h = c1.irecv(0, tag.as_u16(), &mut buf);
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn local_fifo_order() {
    let tag = CommTag::new(0x1001);
    let uni = LocalUniverse::new(2);
    let (c0, c1) = (uni.comm(0), uni.comm(1));

    for i in 0..10u8 {
        c0.isend(1, tag.as_u16(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = c1.irecv(0, tag.as_u16(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn tags_do_not_mix() {
    let uni = LocalUniverse::new(2);
    let (c0, c1) = (uni.comm(0), uni.comm(1));
    c0.isend(1, 1, &[1]);
    c0.isend(1, 2, &[2]);
    let h2 = c1.irecv(0, 2, &mut [0u8; 1]);
    let h1 = c1.irecv(0, 1, &mut [0u8; 1]);
    assert_eq!(h2.wait().unwrap(), vec![2]);
    assert_eq!(h1.wait().unwrap(), vec![1]);
}

#[test]
fn universes_are_isolated() {
    let a = LocalUniverse::new(2);
    let b = a.duplicate();
    a.comm(0).isend(1, 5, &[7]);
    let mut h = b.comm(1).irecv(0, 5, &mut [0u8; 1]);
    assert!(!h.test());
    b.comm(0).isend(1, 5, &[8]);
    assert_eq!(h.wait().unwrap(), vec![8]);
}

#[test]
fn broadcast_reaches_every_rank() {
    let got = run_ranks(4, |comm| {
        let mine = 100 + comm.rank() as u64;
        comm.broadcast_u64(3, mine, 9)
    });
    assert_eq!(got, vec![Ok(103); 4]);
}

#[test]
fn broadcast_of_wrong_size_is_an_error() {
    let got = run_ranks(2, |comm| {
        if comm.rank() == 1 {
            comm.isend(0, 9, &[1, 2, 3, 4]);
            None
        } else {
            Some(comm.broadcast_u64(1, 0, 9))
        }
    });
    assert_eq!(
        got[0],
        Some(Err(DdmError::BufferSizeMismatch { neighbor: 1, expected: 8, got: 4 }))
    );
}

#[test]
fn request_set_wait_any_across_threads() {
    let got = run_ranks(3, |comm| {
        let me = comm.rank();
        let peers: Vec<usize> = (0..3).filter(|&p| p != me).collect();
        let mut set = RequestSet::<LocalComm>::with_neighbors(peers.len());
        for (i, &p) in peers.iter().enumerate() {
            set.post_recv(i, comm.irecv(p, 4, &mut [0u8; 1]));
        }
        for (i, &p) in peers.iter().enumerate() {
            set.post_send(i, comm.isend(p, 4, &[me as u8]));
        }
        let mut from = Vec::new();
        while let Some((_, data)) = set.wait_any_recv() {
            from.push(data.unwrap()[0] as usize);
        }
        set.wait_all_sends();
        from.sort_unstable();
        from
    });
    assert_eq!(got, vec![vec![1, 2], vec![0, 2], vec![0, 1]]);
}
