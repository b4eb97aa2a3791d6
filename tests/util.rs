#![allow(dead_code)]
use mesh_ghosts::{
    algs::communicator::RayonComm,
    boundaries::UnstructuredDomainBoundaries,
    mesh::{Cell, CellType, DataArray, Mesh},
    nesting::StructuredDomainNesting,
    topology::domain::DomainId,
};

pub fn did(raw: u32) -> DomainId {
    DomainId::new(raw)
}

pub fn dids(raw: &[u32]) -> Vec<DomainId> {
    raw.iter().map(|&r| did(r)).collect()
}

/// Two-level 3D hierarchy: domain 0 is a 10^3 coarse block, domain 1 a
/// level-1 child covering coarse cells 2..=5 on every axis (ratio 2).
pub fn two_level_nesting() -> StructuredDomainNesting {
    let mut n = StructuredDomainNesting::new(2, 2, 3).unwrap();
    n.set_level_refinement_ratio(1, &[2, 2, 2]).unwrap();
    n.set_level_cell_size(0, &[1.0, 1.0, 1.0]).unwrap();
    n.set_level_cell_size(1, &[0.5, 0.5, 0.5]).unwrap();
    n.set_domain_info(did(0), 0, &[did(1)], &[0, 9, 0, 9, 0, 9]).unwrap();
    n.set_domain_info(did(1), 1, &[], &[4, 11, 4, 11, 4, 11]).unwrap();
    n
}

/// A row of `n` unit quads split into `n` domains, one quad each. Domain `d`
/// owns points `(d,0) (d+1,0) (d+1,1) (d,1)` numbered 0..4 locally, and
/// carries a point scalar `"x"` equal to each point's x coordinate.
pub fn quad_row(n: usize) -> (UnstructuredDomainBoundaries, Vec<Mesh>) {
    let mut b = UnstructuredDomainBoundaries::new(n);
    let mut meshes = Vec::with_capacity(n);
    for d in 0..n {
        let x = d as f64;
        let mut m = Mesh::unstructured(
            vec![[x, 0., 0.], [x + 1., 0., 0.], [x + 1., 1., 0.], [x, 1., 0.]],
            vec![Cell::new(CellType::Quad, vec![0, 1, 2, 3])],
        );
        m.set_point_array("x", DataArray::scalar(vec![x, x + 1., x + 1., x]));
        m.set_cell_array("id", DataArray::scalar(vec![d as i32]));
        meshes.push(m);
    }
    for d in 0..n.saturating_sub(1) {
        let (a, c) = (did(d as u32), did(d as u32 + 1));
        b.set_shared_points(a, c, &[1, 2], &[0, 3]).unwrap();
        b.set_given_cells_and_points(a, c, &[0], &[0, 1, 2, 3], true).unwrap();
        b.set_given_cells_and_points(c, a, &[0], &[0, 1, 2, 3], true).unwrap();
    }
    (b, meshes)
}

/// Run `f` once per rank of a fresh `RayonComm` world on scoped threads and
/// collect the results in rank order.
pub fn on_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&RayonComm) -> T + Sync,
{
    let world = RayonComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
