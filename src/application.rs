//! Top-level orchestration of one ghosting pass.
//!
//! [`GhostApplication`] owns the cached topology (nesting table and boundary
//! exchanger) of one dataset and runs, per execution, the mesh exchange, the
//! named-array exchanges and the ghost classification. The topology is built
//! on first use and rebuilt whenever the local meshes no longer match the
//! shapes it was built from.
//!
//! ```text
//! Idle -> BuildingTopology -> Ready -> Exchanging -> Ready
//!                                          \-> Failed (next execution restarts from Ready)
//! Ready -> Idle (close)
//! ```

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::all_gather_variable_length;
use crate::boundaries::{BoundaryExchanger, TAGS_PER_EXCHANGE};
use crate::config::{GhostConfig, GhostDataType};
use crate::debug_invariants::DebugInvariants;
use crate::ghost::flags::{GHOST_NODES, GHOST_ZONES, ORIGINAL_CELL_NUMBERS, ORIGINAL_NODE_NUMBERS};
use crate::ghost::{Coverage, PartialCoverage};
use crate::mesh::{DataArray, Material, Mesh, MixedVariable};
use crate::mesh_error::GhostError;
use crate::nesting::Nesting;
use crate::topology::domain::{DomainId, DomainPair};
use std::collections::{BTreeMap, BTreeSet};

const RESERVED: [&str; 4] = [GHOST_ZONES, GHOST_NODES, ORIGINAL_NODE_NUMBERS, ORIGINAL_CELL_NUMBERS];

/// Structural description of a dataset, produced by the reader layer.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GhostTopology {
    pub nesting: Nesting,
    pub boundaries: BoundaryExchanger,
}

/// Supplies the topology tables when they need to be (re)built.
pub trait TopologySource {
    fn build_topology(&mut self, all_domains: &[DomainId]) -> Result<GhostTopology, GhostError>;
}

impl<F> TopologySource for F
where
    F: FnMut(&[DomainId]) -> Result<GhostTopology, GhostError>,
{
    fn build_topology(&mut self, all_domains: &[DomainId]) -> Result<GhostTopology, GhostError> {
        self(all_domains)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GhostState {
    Idle,
    BuildingTopology,
    Ready,
    Exchanging,
    /// The last execution failed. The next one starts from `Ready`.
    Failed,
}

/// What the last [`GhostApplication::apply_ghost`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GhostOutcome {
    pub ghosted: bool,
    pub robust_nodes: bool,
    pub coverage: Coverage,
}

pub struct GhostApplication<C: Communicator, S: TopologySource> {
    comm: C,
    source: S,
    config: GhostConfig,
    state: GhostState,
    topology: Option<GhostTopology>,
    fingerprint: BTreeMap<DomainId, (usize, usize)>,
    next_tag: CommTag,
    last: GhostOutcome,
}

impl<C: Communicator, S: TopologySource> GhostApplication<C, S> {
    pub fn new(comm: C, source: S, config: GhostConfig) -> Self {
        let next_tag = config.base_tag;
        Self {
            comm,
            source,
            config,
            state: GhostState::Idle,
            topology: None,
            fingerprint: BTreeMap::new(),
            next_tag,
            last: GhostOutcome::default(),
        }
    }

    pub fn state(&self) -> GhostState {
        self.state
    }

    pub fn config(&self) -> &GhostConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn topology(&self) -> Option<&GhostTopology> {
        self.topology.as_ref()
    }

    pub fn last_outcome(&self) -> &GhostOutcome {
        &self.last
    }

    /// Drop the cached topology (dataset closed or replaced).
    pub fn close(&mut self) {
        self.topology = None;
        self.fingerprint.clear();
        self.state = GhostState::Idle;
    }

    fn take_tag(&mut self) -> CommTag {
        let tag = self.next_tag;
        self.next_tag = tag.offset(TAGS_PER_EXCHANGE);
        tag
    }

    fn needs_rebuild(&self, domains: &[DomainId], meshes: &[Mesh]) -> bool {
        self.topology.is_none()
            || domains
                .iter()
                .zip(meshes)
                .any(|(d, m)| self.fingerprint.get(d) != Some(&m.shape()))
    }

    fn build_topology(&mut self, domains: &[DomainId], meshes: &[Mesh], all_domains: &[DomainId]) -> Result<(), GhostError> {
        self.state = GhostState::BuildingTopology;
        let built = self.source.build_topology(all_domains).and_then(|mut topo| {
            if let Some(n) = topo.nesting.as_structured() {
                n.validate_invariants()?;
            }
            if let Some(b) = topo.boundaries.boundaries() {
                b.validate_invariants()?;
            }
            topo.boundaries.prepare(domains, meshes)?;
            Ok(topo)
        });
        match built {
            Ok(topo) => {
                log::debug!(
                    "built ghost topology: {} domains, {} levels",
                    topo.nesting.num_domains(),
                    topo.nesting.num_levels()
                );
                self.topology = Some(topo);
                self.fingerprint = domains.iter().copied().zip(meshes.iter().map(Mesh::shape)).collect();
                self.state = GhostState::Ready;
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(wrap("topology", e))
            }
        }
    }

    /// Ghost the local `meshes` (one per entry of `domains`) given the working
    /// set `all_domains`. Returns whether any ghost data was produced; a
    /// single-domain working set is left untouched.
    ///
    /// On failure the meshes are unchanged and the error names the failing
    /// stage. A topology mismatch discards the cached tables so the next call
    /// rebuilds them.
    pub fn apply_ghost(
        &mut self,
        domains: &[DomainId],
        all_domains: &[DomainId],
        meshes: &mut [Mesh],
    ) -> Result<bool, GhostError> {
        if domains.len() != meshes.len() {
            return Err(GhostError::ArrayCountMismatch {
                domains: domains.len(),
                payloads: meshes.len(),
            });
        }
        if self.needs_rebuild(domains, meshes) {
            self.build_topology(domains, meshes, all_domains)?;
        }
        self.next_tag = self.config.base_tag;
        self.state = GhostState::Exchanging;

        match self.execute(domains, all_domains, meshes) {
            Ok(outcome) => {
                let ghosted = outcome.ghosted;
                self.last = outcome;
                self.state = GhostState::Ready;
                Ok(ghosted)
            }
            Err(e) => {
                if e.is_topology_mismatch() {
                    log::warn!("topology changed under cached tables; rebuilding next execution");
                    self.topology = None;
                    self.fingerprint.clear();
                }
                self.state = GhostState::Failed;
                Err(e)
            }
        }
    }

    fn execute(
        &mut self,
        domains: &[DomainId],
        all_domains: &[DomainId],
        meshes: &mut [Mesh],
    ) -> Result<GhostOutcome, GhostError> {
        let mut outcome = GhostOutcome {
            robust_nodes: true,
            ..GhostOutcome::default()
        };
        if all_domains.len() < 2 {
            log::debug!("single-domain working set; nothing to ghost");
            return Ok(outcome);
        }
        let Some(topo) = self.topology.take() else {
            return Err(not_ready("topology"));
        };
        let result = self.execute_with(&topo, domains, all_domains, meshes, &mut outcome);
        self.topology = Some(topo);
        result.map(|()| outcome)
    }

    fn execute_with(
        &mut self,
        topo: &GhostTopology,
        domains: &[DomainId],
        all_domains: &[DomainId],
        meshes: &mut [Mesh],
        outcome: &mut GhostOutcome,
    ) -> Result<(), GhostError> {
        topo.nesting
            .confirm_mesh(domains, meshes)
            .and_then(|()| topo.boundaries.confirm_mesh(domains, meshes))
            .map_err(|e| wrap("confirm mesh", e))?;

        let (amr, coverage) = topo
            .nesting
            .apply_ghost(domains, meshes, all_domains)
            .map_err(|e| wrap("amr ghost zones", e))?;
        outcome.ghosted |= amr;
        outcome.coverage.merge(coverage);

        let ghost_type = self.config.ghost_type;
        let Some(bounds) = topo.boundaries.boundaries() else {
            return Ok(());
        };
        let weak = topo.boundaries.non_robust_pairs(all_domains);
        let clean = self.config.clean_ownership;
        match ghost_type {
            GhostDataType::None => return Ok(()),
            GhostDataType::ZoneData if topo.boundaries.requires_communication(ghost_type) => {
                let mut grown = self.exchange_zone_layer(&topo.boundaries, domains, meshes)?;
                // every rank finishes the collective stages before rejecting
                self.reject_weak(&weak)?;
                bounds
                    .create_ghost_nodes_with(domains, &mut grown, all_domains, clean)
                    .map_err(|e| wrap("ghost nodes", e))?;
                for (m, g) in meshes.iter_mut().zip(grown) {
                    *m = g;
                }
            }
            _ => {
                self.reject_weak(&weak)?;
                bounds
                    .create_ghost_nodes_with(domains, meshes, all_domains, clean)
                    .map_err(|e| wrap("ghost nodes", e))?;
            }
        }
        outcome.ghosted = true;
        outcome.robust_nodes = weak.is_empty();
        if !weak.is_empty() {
            outcome.coverage.push(PartialCoverage::NonRobustGhostNodes { pairs: weak });
        }
        Ok(())
    }

    fn reject_weak(&self, weak: &[DomainPair]) -> Result<(), GhostError> {
        if self.config.require_robust_nodes && !weak.is_empty() {
            let list = weak.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            return Err(GhostError::NonRobustGhostNodes(list));
        }
        Ok(())
    }

    /// Exchange the mesh and every named array; returns the grown meshes.
    fn exchange_zone_layer(
        &mut self,
        bounds: &BoundaryExchanger,
        domains: &[DomainId],
        meshes: &[Mesh],
    ) -> Result<Vec<Mesh>, GhostError> {
        let tag = self.take_tag();
        let mut grown = bounds
            .exchange_mesh(&self.comm, tag, domains, meshes)
            .map_err(|e| wrap("mesh", e))?;

        for is_point in [true, false] {
            let wanted = if is_point {
                self.config.exchange_point_data
            } else {
                self.config.exchange_cell_data
            };
            if !wanted {
                continue;
            }
            let tag = self.take_tag();
            let names = global_names(&self.comm, tag, meshes, is_point)
                .map_err(|e| wrap("array names", e))?;
            for name in names {
                let arrays = meshes
                    .iter()
                    .map(|m| arrays_of(m, is_point).get(&name).cloned())
                    .collect::<Option<Vec<DataArray>>>()
                    .ok_or_else(|| {
                        wrap(
                            &name,
                            GhostError::MissingArray {
                                name: name.clone(),
                                ranks: vec![self.comm.rank()],
                            },
                        )
                    })?;
                let tag = self.take_tag();
                let out = bounds
                    .exchange_vector(&self.comm, tag, domains, is_point, &arrays)
                    .map_err(|e| wrap(&name, e))?;
                for (m, a) in grown.iter_mut().zip(out) {
                    if is_point {
                        m.set_point_array(name.clone(), a);
                    } else {
                        m.set_cell_array(name.clone(), a);
                    }
                }
            }
        }
        Ok(grown)
    }

    fn ready_boundaries(&mut self) -> Result<BoundaryExchanger, GhostError> {
        match (&self.state, &self.topology) {
            (GhostState::Ready | GhostState::Failed, Some(t)) => Ok(t.boundaries.clone()),
            _ => Err(not_ready("variable exchange")),
        }
    }

    /// Exchange one more variable after [`apply_ghost`](Self::apply_ghost).
    /// `arrays` are the variable's values on the original (pre-exchange)
    /// meshes.
    pub fn exchange_variable(
        &mut self,
        name: &str,
        domains: &[DomainId],
        is_point_data: bool,
        arrays: &[DataArray],
    ) -> Result<Vec<DataArray>, GhostError> {
        let bounds = self.ready_boundaries()?;
        let tag = self.take_tag();
        bounds
            .exchange_vector(&self.comm, tag, domains, is_point_data, arrays)
            .map_err(|e| self.fail(name, e))
    }

    /// Exchange materials after [`apply_ghost`](Self::apply_ghost).
    pub fn exchange_material(
        &mut self,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        let bounds = self.ready_boundaries()?;
        let tag = self.take_tag();
        bounds
            .exchange_material(&self.comm, tag, domains, materials)
            .map_err(|e| self.fail("material", e))
    }

    /// Exchange a mixed variable after [`apply_ghost`](Self::apply_ghost).
    pub fn exchange_mix_var(
        &mut self,
        domains: &[DomainId],
        materials: &[Material],
        var: &[MixedVariable],
    ) -> Result<Vec<MixedVariable>, GhostError> {
        let bounds = self.ready_boundaries()?;
        let tag = self.take_tag();
        let stage = var.first().map_or("mixed variable", |v| v.name.as_str()).to_string();
        bounds
            .exchange_mix_var(&self.comm, tag, domains, materials, var)
            .map_err(|e| self.fail(&stage, e))
    }

    fn fail(&mut self, stage: &str, e: GhostError) -> GhostError {
        self.state = GhostState::Failed;
        wrap(stage, e)
    }
}

fn not_ready(stage: &str) -> GhostError {
    GhostError::NotReady(stage.to_string())
}

fn wrap(stage: &str, e: GhostError) -> GhostError {
    match e {
        GhostError::ExchangeFailed { .. } | GhostError::NonRobustGhostNodes(_) => e,
        other => GhostError::ExchangeFailed {
            stage: stage.to_string(),
            source: Box::new(other),
        },
    }
}

fn arrays_of(mesh: &Mesh, is_point: bool) -> &BTreeMap<String, DataArray> {
    if is_point { &mesh.point_data } else { &mesh.cell_data }
}

/// Sorted union of non-reserved array names over all ranks, so every rank
/// runs the same sequence of exchanges. A name that some rank holding meshes
/// lacks on any of them fails on every rank at once, before any exchange.
fn global_names<C: Communicator>(
    comm: &C,
    tag: CommTag,
    meshes: &[Mesh],
    is_point: bool,
) -> Result<BTreeSet<String>, GhostError> {
    let seen: BTreeSet<&String> = meshes
        .iter()
        .flat_map(|m| arrays_of(m, is_point).keys())
        .filter(|k| !RESERVED.contains(&k.as_str()))
        .collect();

    // [has meshes] then (b'+' complete | b'-' partial) name NUL, per name
    let mut buf = vec![u8::from(!meshes.is_empty())];
    for name in &seen {
        let complete = meshes.iter().all(|m| arrays_of(m, is_point).contains_key(*name));
        buf.push(if complete { b'+' } else { b'-' });
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
    }
    let gathered = if comm.size() <= 1 {
        vec![buf]
    } else {
        all_gather_variable_length(comm, tag, &buf)?
    };

    let mut names = BTreeSet::new();
    let mut complete_on: Vec<Option<BTreeSet<String>>> = Vec::with_capacity(gathered.len());
    for (rank, bytes) in gathered.iter().enumerate() {
        let Some((&has_meshes, entries)) = bytes.split_first() else {
            return Err(GhostError::comm(rank, "empty array name list"));
        };
        let mut complete = BTreeSet::new();
        for entry in entries.split(|&b| b == 0).filter(|s| !s.is_empty()) {
            let (&mark, raw) = entry
                .split_first()
                .ok_or_else(|| GhostError::comm(rank, "empty array name entry"))?;
            let name = std::str::from_utf8(raw)
                .map_err(|e| GhostError::comm(rank, format!("array name: {e}")))?
                .to_string();
            if mark == b'+' {
                complete.insert(name.clone());
            }
            names.insert(name);
        }
        complete_on.push((has_meshes != 0).then_some(complete));
    }

    for name in &names {
        let ranks: Vec<usize> = complete_on
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_ref().is_some_and(|c| !c.contains(name)))
            .map(|(rank, _)| rank)
            .collect();
        if !ranks.is_empty() {
            return Err(GhostError::MissingArray {
                name: name.clone(),
                ranks,
            });
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::boundaries::UnstructuredDomainBoundaries;
    use crate::mesh::{Cell, CellType};
    use crate::topology::domain::did;

    fn squares() -> Vec<Mesh> {
        let mut a = Mesh::unstructured(
            vec![[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]],
            vec![Cell::new(CellType::Quad, vec![0, 1, 2, 3])],
        );
        a.set_point_array("t", DataArray::scalar(vec![0.0f64, 1.0, 2.0, 3.0]));
        let mut b = Mesh::unstructured(
            vec![[1., 0., 0.], [2., 0., 0.], [2., 1., 0.], [1., 1., 0.]],
            vec![Cell::new(CellType::Quad, vec![0, 1, 2, 3])],
        );
        b.set_point_array("t", DataArray::scalar(vec![1.0f64, 4.0, 5.0, 2.0]));
        vec![a, b]
    }

    fn source(calls: &std::cell::Cell<usize>) -> impl FnMut(&[DomainId]) -> Result<GhostTopology, GhostError> + '_ {
        move |_all| {
            calls.set(calls.get() + 1);
            let mut b = UnstructuredDomainBoundaries::new(2);
            b.set_shared_points(did(0), did(1), &[1, 2], &[0, 3])?;
            b.set_given_cells_and_points(did(0), did(1), &[0], &[0, 1, 2, 3], true)?;
            b.set_given_cells_and_points(did(1), did(0), &[0], &[0, 1, 2, 3], true)?;
            Ok(GhostTopology {
                nesting: Nesting::Trivial { num_domains: 2 },
                boundaries: BoundaryExchanger::Unstructured(b),
            })
        }
    }

    #[test]
    fn zone_ghosting_carries_arrays() {
        let calls = std::cell::Cell::new(0);
        let mut app = GhostApplication::new(NoComm, source(&calls), GhostConfig::default());
        assert_eq!(app.state(), GhostState::Idle);
        let doms = [did(0), did(1)];
        let mut meshes = squares();
        assert!(app.apply_ghost(&doms, &doms, &mut meshes).unwrap());
        assert_eq!(app.state(), GhostState::Ready);
        assert!(app.last_outcome().robust_nodes);
        let t = meshes[0].point_array("t").unwrap().as_slice::<f64>().unwrap();
        assert_eq!(t, &[0., 1., 2., 3., 4., 5.]);
        assert!(meshes[1].point_array(GHOST_NODES).is_some());

        // same shapes again: cached topology is reused
        let mut again = squares();
        app.apply_ghost(&doms, &doms, &mut again).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(again, meshes);
    }

    #[test]
    fn array_on_only_some_domains_is_rejected() {
        let calls = std::cell::Cell::new(0);
        let mut app = GhostApplication::new(NoComm, source(&calls), GhostConfig::default());
        let doms = [did(0), did(1)];
        let mut meshes = squares();
        meshes[1].point_data.remove("t");
        let before = meshes.clone();
        let err = app.apply_ghost(&doms, &doms, &mut meshes).unwrap_err();
        match err {
            GhostError::ExchangeFailed { stage, source } => {
                assert_eq!(stage, "array names");
                assert!(matches!(
                    *source,
                    GhostError::MissingArray { ref name, ref ranks } if name == "t" && ranks == &[0]
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(meshes, before);
        assert_eq!(app.state(), GhostState::Failed);
    }

    #[test]
    fn single_domain_is_untouched() {
        let calls = std::cell::Cell::new(0);
        let mut app = GhostApplication::new(NoComm, source(&calls), GhostConfig::default());
        let mut meshes = squares()[..1].to_vec();
        let before = meshes.clone();
        assert!(!app.apply_ghost(&[did(0)], &[did(0)], &mut meshes).unwrap());
        assert_eq!(meshes, before);
    }

    #[test]
    fn changed_shape_rebuilds_topology() {
        let calls = std::cell::Cell::new(0);
        let mut app = GhostApplication::new(NoComm, source(&calls), GhostConfig::default());
        let doms = [did(0), did(1)];
        app.apply_ghost(&doms, &doms, &mut squares()).unwrap();
        let mut grown = squares();
        grown[1].points.push([3., 0., 0.]);
        for m in &mut grown {
            m.point_data.clear();
        }
        app.apply_ghost(&doms, &doms, &mut grown).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn failure_names_stage_and_is_not_sticky() {
        let calls = std::cell::Cell::new(0);
        let mut app = GhostApplication::new(NoComm, source(&calls), GhostConfig::default());
        let doms = [did(0), did(1)];
        let mut bad = squares();
        bad[1].set_point_array("t", DataArray::scalar(vec![1i32, 2, 3, 4]));
        let before = bad.clone();
        let err = app.apply_ghost(&doms, &doms, &mut bad).unwrap_err();
        assert!(matches!(err, GhostError::ExchangeFailed { ref stage, .. } if stage == "t"));
        assert_eq!(app.state(), GhostState::Failed);
        assert_eq!(bad, before);

        assert!(app.apply_ghost(&doms, &doms, &mut squares()).unwrap());
        assert_eq!(app.state(), GhostState::Ready);
        let later = app
            .exchange_variable("p", &doms, false, &[DataArray::scalar(vec![7.0f32]), DataArray::scalar(vec![8.0f32])])
            .unwrap();
        assert_eq!(later[0].as_slice::<f32>().unwrap(), &[7.0, 8.0]);
    }

    #[test]
    fn node_data_needs_no_exchange() {
        let calls = std::cell::Cell::new(0);
        let config = GhostConfig {
            ghost_type: GhostDataType::NodeData,
            ..GhostConfig::default()
        };
        let mut app = GhostApplication::new(NoComm, source(&calls), config);
        let doms = [did(0), did(1)];
        let mut meshes = squares();
        assert!(app.apply_ghost(&doms, &doms, &mut meshes).unwrap());
        assert_eq!(meshes[1].num_points(), 4);
        let b = meshes[1].point_array(GHOST_NODES).unwrap().as_slice::<u8>().unwrap();
        assert_eq!(b, &[1, 0, 0, 1]);
    }
}
