//! Transport behaviour seen through the public API. Tests on the shared
//! default `RayonComm` session run `#[serial]` so their mailboxes never mix.

mod util;
use util::*;

use mesh_ghosts::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
use mesh_ghosts::algs::exchange::{all_gather_variable_length, gather_variable_length};
use mesh_ghosts::mesh_error::GhostError;
use serial_test::serial;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

#[test]
fn no_comm_is_rank_zero_of_one() {
    assert_eq!(NoComm.rank(), 0);
    assert_eq!(NoComm.size(), 1);
    let gathered = all_gather_variable_length(&NoComm, CommTag::new(9), b"xy").unwrap();
    assert_eq!(gathered, vec![b"xy".to_vec()]);
}

#[test]
#[serial]
fn default_session_tags_are_isolated() {
    let (c0, c1) = (RayonComm::new(0, 2), RayonComm::new(1, 2));
    let mut a = [0u8; 3];
    let mut b = [0u8; 3];
    let rx_a = c1.irecv(0, 0xA1, &mut a);
    let rx_b = c1.irecv(0, 0xB2, &mut b);
    c0.isend(1, 0xB2, b"bbb").wait();
    c0.isend(1, 0xA1, b"aaa").wait();
    assert_eq!(rx_a.wait().unwrap(), b"aaa");
    assert_eq!(rx_b.wait().unwrap(), b"bbb");
}

#[test]
#[serial]
fn default_session_two_stage_exchange() {
    let (c0, c1) = (RayonComm::new(0, 2), RayonComm::new(1, 2));
    let tag = CommTag::new(0x4400);
    let got = std::thread::scope(|s| {
        let h0 = s.spawn(|| {
            c0.exchange(tag, &BTreeMap::from([(1, vec![1u8; 17])]), &BTreeSet::from([1]))
                .unwrap()
        });
        let h1 = s.spawn(|| {
            c1.exchange(tag, &BTreeMap::from([(0, Vec::new())]), &BTreeSet::from([0]))
                .unwrap()
        });
        (h0.join().unwrap(), h1.join().unwrap())
    });
    assert_eq!(got.0[&1], Vec::<u8>::new());
    assert_eq!(got.1[&0], vec![1u8; 17]);
}

#[test]
fn missing_sender_times_out_as_comm_error() {
    let world = RayonComm::world(2);
    let lonely = world[0].clone().with_timeout(Duration::from_millis(50));
    let err = lonely
        .exchange(CommTag::new(0x10), &BTreeMap::new(), &BTreeSet::from([1]))
        .unwrap_err();
    assert!(matches!(err, GhostError::CommError { neighbor: 1, .. }));
}

#[test]
fn gather_to_root_over_world() {
    let results = on_ranks(3, |comm| {
        let payload = format!("r{}", comm.rank()).into_bytes();
        gather_variable_length(comm, CommTag::new(0x60), 0, &payload).unwrap()
    });
    let (all, offsets) = results[0].clone().unwrap();
    assert_eq!(all, b"r0r1r2");
    assert_eq!(offsets, vec![0, 2, 4, 6]);
    assert!(results[1].is_none() && results[2].is_none());
}
