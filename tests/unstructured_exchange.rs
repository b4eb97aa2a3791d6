mod util;
use util::*;

use mesh_ghosts::algs::communicator::{CommTag, Communicator, NoComm};
use mesh_ghosts::boundaries::UnstructuredDomainBoundaries;
use mesh_ghosts::ghost::flags::{GhostNodeType, GhostZoneType, has_node_flag, has_zone_flag};
use mesh_ghosts::ghost::{GHOST_NODES, GHOST_ZONES};
use mesh_ghosts::mesh::{DataArray, Mesh};
use mesh_ghosts::mesh_error::GhostError;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const TAG: CommTag = CommTag::new(0x5100);

#[test]
fn given_points_already_shared_are_filtered() {
    let (a, b) = (did(0), did(1));
    let mut bounds = UnstructuredDomainBoundaries::new(2);
    bounds.set_shared_points(a, b, &[10, 11, 12, 13], &[0, 1, 2, 3]).unwrap();
    bounds.set_given_cells_and_points(a, b, &[5, 6], &[10, 21], true).unwrap();
    let given = bounds.given(a, b).unwrap();
    assert_eq!(given.cells, vec![5, 6]);
    assert_eq!(given.points, vec![21]);

    bounds.set_given_cells_and_points(a, b, &[5, 6], &[10, 21], false).unwrap();
    assert_eq!(bounds.given(a, b).unwrap().points, vec![10, 21]);
}

#[test]
fn mismatched_shared_lengths_record_nothing() {
    let (a, b) = (did(0), did(1));
    let mut bounds = UnstructuredDomainBoundaries::new(2);
    let err = bounds.set_shared_points(a, b, &[1, 2, 3], &[1, 2]).unwrap_err();
    assert!(matches!(
        err,
        GhostError::SharedPointLengthMismatch { len_a: 3, len_b: 2, .. }
    ));
    assert!(bounds.shared_points(a, b).is_none());
    assert!(bounds.shared_points(b, a).is_none());
    assert!(bounds.neighbors(a).is_empty());
}

/// Serial exchange + ghost nodes over all domains of a quad row.
fn serial_run(n: usize) -> Vec<Mesh> {
    let (bounds, meshes) = quad_row(n);
    let doms = (0..n as u32).map(did).collect::<Vec<_>>();
    let mut out = bounds.exchange_mesh(&NoComm, TAG, &doms, &meshes).unwrap();
    let x: Vec<DataArray> = meshes.iter().map(|m| m.point_array("x").unwrap().clone()).collect();
    let x = bounds.exchange_scalar(&NoComm, TAG.offset(4), &doms, true, &x).unwrap();
    for (m, a) in out.iter_mut().zip(x) {
        m.set_point_array("x", a);
    }
    assert!(bounds.create_ghost_nodes(&doms, &mut out, &doms).unwrap());
    out
}

/// Same as [`serial_run`] but with domains dealt out over `ranks` ranks by
/// `placement[d]`. Results are returned indexed by domain.
fn distributed_run(n: usize, ranks: usize, placement: &[usize]) -> Vec<Mesh> {
    let per_rank = on_ranks(ranks, |comm| {
        let (bounds, meshes) = quad_row(n);
        let all = (0..n as u32).map(did).collect::<Vec<_>>();
        let mine: Vec<usize> = (0..n).filter(|&d| placement[d] == comm.rank()).collect();
        let doms: Vec<_> = mine.iter().map(|&d| did(d as u32)).collect();
        let local: Vec<Mesh> = mine.iter().map(|&d| meshes[d].clone()).collect();
        let mut out = bounds.exchange_mesh(comm, TAG, &doms, &local).unwrap();
        let x: Vec<DataArray> = local.iter().map(|m| m.point_array("x").unwrap().clone()).collect();
        let x = bounds.exchange_scalar(comm, TAG.offset(4), &doms, true, &x).unwrap();
        for (m, a) in out.iter_mut().zip(x) {
            m.set_point_array("x", a);
        }
        assert!(bounds.create_ghost_nodes(&doms, &mut out, &all).unwrap());
        mine.into_iter().zip(out).collect::<Vec<_>>()
    });
    let mut by_domain: BTreeMap<usize, Mesh> = per_rank.into_iter().flatten().collect();
    (0..n).map(|d| by_domain.remove(&d).unwrap()).collect()
}

#[test]
fn remote_ghost_values_match_sender() {
    // domains 0 and 1 on rank 0, domain 2 on rank 1
    let meshes = distributed_run(3, 2, &[0, 0, 1]);
    let d2 = &meshes[2];
    assert_eq!(d2.num_points(), 6);
    assert_eq!(d2.num_cells(), 2);
    let x = d2.point_array("x").unwrap().as_slice::<f64>().unwrap();
    // domain 1 gives its points 0 and 3, both at x = 1
    assert_eq!(&x[4..], &[1.0, 1.0]);
    let ids = d2.cell_array("avtOriginalCellNumbers").unwrap().as_slice::<i32>().unwrap();
    assert_eq!(ids, &[2, 0, 1, 0]);
}

#[test]
fn results_do_not_depend_on_placement() {
    let serial = serial_run(4);
    for (ranks, placement) in [
        (2, vec![0, 0, 1, 1]),
        (2, vec![1, 0, 1, 0]),
        (3, vec![2, 1, 0, 2]),
        (4, vec![0, 1, 2, 3]),
    ] {
        let distributed = distributed_run(4, ranks, &placement);
        assert_eq!(distributed, serial, "placement {placement:?}");
    }
    // and the serial run is deterministic
    assert_eq!(serial_run(4), serial);
}

#[test]
fn every_point_has_exactly_one_real_owner() {
    let meshes = serial_run(4);
    let mut real: BTreeMap<(i64, i64), usize> = BTreeMap::new();
    let mut seen: BTreeSet<(i64, i64)> = BTreeSet::new();
    for m in &meshes {
        let flags = m.point_array(GHOST_NODES).unwrap().as_slice::<u8>().unwrap();
        for (p, xyz) in m.points.iter().enumerate() {
            let key = (xyz[0] as i64, xyz[1] as i64);
            seen.insert(key);
            if !has_node_flag(flags[p], GhostNodeType::DuplicatedNode) {
                *real.entry(key).or_default() += 1;
            }
        }
    }
    for key in seen {
        assert_eq!(real.get(&key), Some(&1), "point {key:?}");
    }
}

#[test]
fn appended_cells_are_duplicated_zones() {
    let meshes = serial_run(3);
    let zones = meshes[1].cell_array(GHOST_ZONES).unwrap().as_slice::<u8>().unwrap();
    assert_eq!(zones.len(), 3);
    assert_eq!(zones[0], 0);
    for &z in &zones[1..] {
        assert!(has_zone_flag(z, GhostZoneType::DuplicatedZoneInternalToProblem));
    }
    // ghost copy from domain 0 comes before the one from domain 2
    let id = meshes[1].cell_array("avtOriginalCellNumbers").unwrap().as_slice::<i32>().unwrap();
    assert_eq!(id, &[1, 0, 0, 0, 2, 0]);
}

#[test]
fn absent_neighbour_is_skipped() {
    let (bounds, meshes) = quad_row(3);
    let doms = dids(&[0, 1]);
    let out = bounds.exchange_mesh(&NoComm, TAG, &doms, &meshes[..2]).unwrap();
    assert_eq!(out[1].num_cells(), 2);
    assert_eq!(out[0].num_cells(), 2);
}

proptest! {
    /// Filtering keeps exactly the non-shared given points, in order.
    #[test]
    fn filter_keeps_non_shared_in_order(
        shared in proptest::collection::btree_set(0usize..40, 0..15),
        given in proptest::collection::vec(0usize..40, 0..30),
    ) {
        let (a, b) = (did(0), did(1));
        let mut bounds = UnstructuredDomainBoundaries::new(2);
        let sa: Vec<usize> = shared.iter().copied().collect();
        let sb: Vec<usize> = (100..100 + sa.len()).collect();
        bounds.set_shared_points(a, b, &sa, &sb).unwrap();
        bounds.set_given_cells_and_points(a, b, &[0], &given, true).unwrap();
        let kept = &bounds.given(a, b).unwrap().points;

        let want: Vec<usize> = given.iter().copied().filter(|p| !shared.contains(p)).collect();
        prop_assert_eq!(kept, &want);
        // nothing lost: kept plus the filtered shared points cover the input
        let mut back: BTreeSet<usize> = kept.iter().copied().collect();
        back.extend(given.iter().copied().filter(|p| shared.contains(p)));
        prop_assert_eq!(back, given.iter().copied().collect::<BTreeSet<_>>());
    }
}
