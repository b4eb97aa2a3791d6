mod util;
use util::*;

use mesh_ghosts::prelude::*;
use mesh_ghosts::ghost::flags::count_ghosts;
use mesh_ghosts::topology::domain::DomainId;
use std::time::{Duration, Instant};

fn row_topology(n: usize) -> impl FnMut(&[DomainId]) -> Result<GhostTopology, GhostError> {
    move |_all| {
        Ok(GhostTopology {
            nesting: Nesting::Trivial { num_domains: n },
            boundaries: BoundaryExchanger::Unstructured(quad_row(n).0),
        })
    }
}

#[test]
fn single_domain_dataset_is_not_ghosted() {
    let mut app = GhostApplication::new(NoComm, row_topology(1), GhostConfig::default());
    let mut meshes = quad_row(1).1;
    let before = meshes.clone();
    assert!(!app.apply_ghost(&dids(&[0]), &dids(&[0]), &mut meshes).unwrap());
    assert_eq!(meshes, before);
    assert!(meshes[0].point_array(GHOST_NODES).is_none());
    assert!(meshes[0].cell_array(GHOST_ZONES).is_none());
}

#[test]
fn config_round_trips_through_json() {
    let config = GhostConfig {
        ghost_type: GhostDataType::NodeData,
        clean_ownership: false,
        base_tag: CommTag::new(0x7100),
        require_robust_nodes: true,
        exchange_point_data: false,
        exchange_cell_data: true,
    };
    let text = serde_json::to_string(&config).unwrap();
    let back: GhostConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn distributed_application_matches_serial() {
    let all = dids(&[0, 1, 2]);
    let mut serial = quad_row(3).1;
    let mut app = GhostApplication::new(NoComm, row_topology(3), GhostConfig::default());
    assert!(app.apply_ghost(&all, &all, &mut serial).unwrap());
    assert!(app.last_outcome().coverage.is_complete());

    let placement = [1usize, 0, 1];
    let per_rank = on_ranks(2, |comm| {
        let meshes = quad_row(3).1;
        let mine: Vec<usize> = (0..3).filter(|&d| placement[d] == comm.rank()).collect();
        let doms: Vec<DomainId> = mine.iter().map(|&d| did(d as u32)).collect();
        let mut local: Vec<Mesh> = mine.iter().map(|&d| meshes[d].clone()).collect();
        let mut app = GhostApplication::new(comm.clone(), row_topology(3), GhostConfig::default());
        assert!(app.apply_ghost(&doms, &all, &mut local).unwrap());
        mine.into_iter().zip(local).collect::<Vec<_>>()
    });
    for (d, mesh) in per_rank.into_iter().flatten() {
        assert_eq!(mesh, serial[d], "domain {d}");
    }
    // exchanged point and cell data ride along
    let x = serial[1].point_array("x").unwrap().as_slice::<f64>().unwrap();
    assert_eq!(x, &[1., 2., 2., 1., 0., 0., 3., 3.]);
    let id = serial[1].cell_array("id").unwrap().as_slice::<i32>().unwrap();
    assert_eq!(id, &[1, 0, 2]);
}

fn missing_array(err: &GhostError) -> Option<(String, Vec<usize>)> {
    match err {
        GhostError::ExchangeFailed { source, .. } => match source.as_ref() {
            GhostError::MissingArray { name, ranks } => Some((name.clone(), ranks.clone())),
            _ => None,
        },
        _ => None,
    }
}

#[test]
fn array_missing_on_one_rank_fails_every_rank_promptly() {
    let all = dids(&[0, 1]);
    let per_rank = on_ranks(2, |comm| {
        let comm = comm.clone().with_timeout(Duration::from_secs(60));
        let rank = comm.rank();
        let mut local = vec![quad_row(2).1[rank].clone()];
        if rank == 1 {
            local[0].point_data.remove("x");
        }
        let before = local.clone();
        let mut app = GhostApplication::new(comm, row_topology(2), GhostConfig::default());
        let start = Instant::now();
        let err = app.apply_ghost(&all[rank..=rank], &all, &mut local).unwrap_err();
        assert_eq!(local, before);
        assert_eq!(app.state(), GhostState::Failed);
        (missing_array(&err), start.elapsed())
    });
    for (missing, elapsed) in per_rank {
        assert_eq!(missing, Some(("x".to_string(), vec![1])));
        assert!(elapsed < Duration::from_secs(30), "took {elapsed:?}");
    }
}

#[test]
fn one_sided_boundary_is_reported_or_rejected() {
    let one_sided = |_all: &[DomainId]| -> Result<GhostTopology, GhostError> {
        let mut b = UnstructuredDomainBoundaries::new(2);
        b.set_shared_points(did(0), did(1), &[1, 2], &[0, 3])?;
        b.set_given_cells_and_points(did(0), did(1), &[0], &[0, 1, 2, 3], true)?;
        Ok(GhostTopology {
            nesting: Nesting::Trivial { num_domains: 2 },
            boundaries: BoundaryExchanger::Unstructured(b),
        })
    };
    let all = dids(&[0, 1]);

    let mut app = GhostApplication::new(NoComm, one_sided, GhostConfig::default());
    let mut meshes = quad_row(2).1;
    assert!(app.apply_ghost(&all, &all, &mut meshes).unwrap());
    let outcome = app.last_outcome();
    assert!(!outcome.robust_nodes);
    assert_eq!(
        outcome.coverage.issues(),
        &[PartialCoverage::NonRobustGhostNodes {
            pairs: vec![DomainPair::new(did(0), did(1))]
        }]
    );

    let strict = GhostConfig {
        require_robust_nodes: true,
        ..GhostConfig::default()
    };
    let mut app = GhostApplication::new(NoComm, one_sided, strict);
    let mut meshes = quad_row(2).1;
    let before = meshes.clone();
    let err = app.apply_ghost(&all, &all, &mut meshes).unwrap_err();
    assert!(matches!(err, GhostError::NonRobustGhostNodes(_)));
    assert_eq!(meshes, before);
    assert_eq!(app.state(), GhostState::Failed);
}

#[test]
fn amr_through_application() {
    let source = |_all: &[DomainId]| -> Result<GhostTopology, GhostError> {
        Ok(GhostTopology {
            nesting: Nesting::Structured(two_level_nesting()),
            boundaries: BoundaryExchanger::None,
        })
    };
    let mut app = GhostApplication::new(NoComm, source, GhostConfig::default());
    let all = dids(&[0, 1]);
    let mut meshes = vec![Mesh::structured([10, 10, 10]), Mesh::structured([8, 8, 8])];
    assert!(app.apply_ghost(&all, &all, &mut meshes).unwrap());
    assert_eq!(count_ghosts(meshes[0].cell_array(GHOST_ZONES)), 64);

    // a mesh that no longer matches its extents is a topology error
    let mut wrong = vec![Mesh::structured([10, 10, 9]), Mesh::structured([8, 8, 8])];
    let err = app.apply_ghost(&all, &all, &mut wrong).unwrap_err();
    assert!(err.is_topology_mismatch());
    assert!(app.topology().is_none());
}

#[test]
fn point_decomposed_through_application() {
    let source = |_all: &[DomainId]| -> Result<GhostTopology, GhostError> {
        let mut p = PointDecomposedBoundaries::new(3);
        for d in 0..2u32 {
            p.set_shared_points(did(d), did(d + 1), &[1, 2], &[0, 3])?;
        }
        Ok(GhostTopology {
            nesting: Nesting::Trivial { num_domains: 3 },
            boundaries: BoundaryExchanger::PointDecomposed(p),
        })
    };
    let all = dids(&[0, 1, 2]);
    let mut expected = quad_row(3).1;
    GhostApplication::new(NoComm, row_topology(3), GhostConfig::default())
        .apply_ghost(&all, &all, &mut expected)
        .unwrap();

    let mut app = GhostApplication::new(NoComm, source, GhostConfig::default());
    let mut meshes = quad_row(3).1;
    assert!(app.apply_ghost(&all, &all, &mut meshes).unwrap());
    assert!(app.last_outcome().robust_nodes);
    assert_eq!(meshes, expected);
}
