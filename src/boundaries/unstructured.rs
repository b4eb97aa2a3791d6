//! Boundary tables and exchanges for unstructured domains.
//!
//! Setup records, per directed pair `(from, to)`, the map from `from`-local to
//! `to`-local ids of the points the two domains share, and the cells and
//! points `from` must transmit so `to` can grow a ghost layer. The tables are
//! read-only during exchanges.
//!
//! Every exchange applies incoming payloads in ascending `(from, to)` order, so
//! a receiving domain's appended points, cells and values land at the same
//! local ids no matter where the senders live or in which order messages
//! arrive. Later variable exchanges rely on the ids assigned by
//! [`UnstructuredDomainBoundaries::exchange_mesh`].

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{
    ConnRef, WireCellHdr, WireConn, WireCoord, WireMix, WireReader, WireWriter, WireZoneMat, kind,
};
use crate::boundaries::transport::{DomainProcessorMap, Segment, route_segments};
use crate::config::GhostDataType;
use crate::debug_invariants::DebugInvariants;
use crate::ghost::flags::{
    GHOST_NODES, GHOST_ZONES, GhostNodeType, GhostZoneType, ORIGINAL_CELL_NUMBERS,
    ORIGINAL_NODE_NUMBERS, with_ghost_nodes,
};
use crate::ghost::ownership::PointOwnership;
use crate::mesh::{Cell, CellType, DataArray, Element, ElementTag, Material, Mesh, MixedVariable};
use crate::mesh_error::GhostError;
use crate::topology::domain::{DomainId, DomainPair};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const MAT_CLEAN: u32 = 0;
const MAT_MIXED: u32 = 1;

/// Cells and points one domain transmits to a neighbour.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GivenElements {
    pub cells: Vec<usize>,
    pub points: Vec<usize>,
}

static NOTHING_GIVEN: GivenElements = GivenElements {
    cells: Vec::new(),
    points: Vec::new(),
};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct UnstructuredDomainBoundaries {
    num_domains: usize,
    shared: BTreeMap<DomainPair, BTreeMap<usize, usize>>,
    given: BTreeMap<DomainPair, GivenElements>,
    shapes: BTreeMap<DomainId, (usize, usize)>,
    /// Exchange along every shared pair rather than only declared given pairs.
    pairs_from_shared: bool,
}

impl UnstructuredDomainBoundaries {
    pub fn new(num_domains: usize) -> Self {
        Self {
            num_domains,
            ..Self::default()
        }
    }

    pub(crate) fn with_shared_pairs(num_domains: usize) -> Self {
        Self {
            num_domains,
            pairs_from_shared: true,
            ..Self::default()
        }
    }

    pub fn num_domains(&self) -> usize {
        self.num_domains
    }

    /// Resize the domain id space. Fails if a recorded relationship would
    /// fall outside it.
    pub fn set_total_number_of_domains(&mut self, n: usize) -> Result<(), GhostError> {
        let too_big = self
            .shared
            .keys()
            .chain(self.given.keys())
            .flat_map(|p| [p.from, p.to])
            .find(|d| d.index() >= n);
        if let Some(domain) = too_big {
            return Err(GhostError::DomainOutOfRange {
                domain,
                num_domains: n,
            });
        }
        self.num_domains = n;
        Ok(())
    }

    fn check_pair(&self, from: DomainId, to: DomainId) -> Result<DomainPair, GhostError> {
        for d in [from, to] {
            if d.index() >= self.num_domains {
                return Err(GhostError::DomainOutOfRange {
                    domain: d,
                    num_domains: self.num_domains,
                });
            }
        }
        if from == to {
            return Err(GhostError::SelfNeighbor(from));
        }
        Ok(DomainPair::new(from, to))
    }

    /// Declare that `points_in_a[k]` of `a` and `points_in_b[k]` of `b` are
    /// the same physical point. Both directions are recorded; repeated calls
    /// for a pair add to the map.
    pub fn set_shared_points(
        &mut self,
        a: DomainId,
        b: DomainId,
        points_in_a: &[usize],
        points_in_b: &[usize],
    ) -> Result<(), GhostError> {
        if points_in_a.len() != points_in_b.len() {
            return Err(GhostError::SharedPointLengthMismatch {
                a,
                b,
                len_a: points_in_a.len(),
                len_b: points_in_b.len(),
            });
        }
        let ab = self.check_pair(a, b)?;
        let forward = self.shared.entry(ab).or_default();
        forward.extend(points_in_a.iter().copied().zip(points_in_b.iter().copied()));
        let backward = self.shared.entry(ab.reversed()).or_default();
        backward.extend(points_in_b.iter().copied().zip(points_in_a.iter().copied()));
        log::trace!("shared points {ab}: {}", points_in_a.len());
        Ok(())
    }

    /// Declare the cells and points `from` transmits to `to`. With
    /// `filter_shared`, points already shared by the pair are dropped from the
    /// list. Replaces any earlier declaration for the pair.
    pub fn set_given_cells_and_points(
        &mut self,
        from: DomainId,
        to: DomainId,
        cells: &[usize],
        points: &[usize],
        filter_shared: bool,
    ) -> Result<(), GhostError> {
        let pair = self.check_pair(from, to)?;
        let shared = self.shared.get(&pair);
        let kept: Vec<usize> = if filter_shared {
            points
                .iter()
                .copied()
                .filter(|p| !shared.is_some_and(|s| s.contains_key(p)))
                .collect()
        } else {
            points.to_vec()
        };
        log::trace!(
            "given {pair}: {} cells, {} points ({} filtered)",
            cells.len(),
            kept.len(),
            points.len() - kept.len()
        );
        self.given.insert(
            pair,
            GivenElements {
                cells: cells.to_vec(),
                points: kept,
            },
        );
        Ok(())
    }

    pub fn shared_points(&self, from: DomainId, to: DomainId) -> Option<&BTreeMap<usize, usize>> {
        self.shared.get(&DomainPair::new(from, to))
    }

    pub fn given(&self, from: DomainId, to: DomainId) -> Option<&GivenElements> {
        self.given.get(&DomainPair::new(from, to))
    }

    fn given_for(&self, pair: DomainPair) -> &GivenElements {
        self.given.get(&pair).unwrap_or(&NOTHING_GIVEN)
    }

    /// Domains sharing points with `domain`.
    pub fn neighbors(&self, domain: DomainId) -> BTreeSet<DomainId> {
        self.shared
            .keys()
            .filter(|p| p.from == domain)
            .map(|p| p.to)
            .collect()
    }

    /// Remember the `(points, cells)` shape of a domain's mesh for
    /// [`confirm_mesh`](Self::confirm_mesh).
    pub fn record_mesh_shape(&mut self, domain: DomainId, shape: (usize, usize)) {
        self.shapes.insert(domain, shape);
    }

    /// Directed pairs along which payloads travel.
    fn exchange_pairs(&self) -> impl Iterator<Item = DomainPair> + '_ {
        let from_given = (!self.pairs_from_shared).then(|| self.given.keys().copied());
        let from_shared = self.pairs_from_shared.then(|| self.shared.keys().copied());
        from_given.into_iter().flatten().chain(from_shared.into_iter().flatten())
    }

    pub(crate) fn given_mut(&mut self) -> &mut BTreeMap<DomainPair, GivenElements> {
        &mut self.given
    }

    /// Check that each local mesh still matches the recorded shape and that
    /// every recorded index is inside it.
    pub fn confirm_mesh(&self, domains: &[DomainId], meshes: &[Mesh]) -> Result<(), GhostError> {
        check_count(domains.len(), meshes.len())?;
        for (&d, mesh) in domains.iter().zip(meshes) {
            let mismatch = |reason: String| GhostError::TopologyMismatch { domain: d, reason };
            if d.index() >= self.num_domains {
                return Err(GhostError::DomainOutOfRange {
                    domain: d,
                    num_domains: self.num_domains,
                });
            }
            if mesh.is_structured() {
                return Err(mismatch("structured mesh on unstructured boundaries".into()));
            }
            let (npts, ncells) = mesh.shape();
            if let Some(&recorded) = self.shapes.get(&d) {
                if recorded != (npts, ncells) {
                    return Err(mismatch(format!(
                        "shape {:?} differs from recorded {recorded:?}",
                        (npts, ncells)
                    )));
                }
            }
            for (pair, map) in &self.shared {
                let bad = if pair.from == d {
                    map.keys().find(|&&p| p >= npts)
                } else if pair.to == d {
                    map.values().find(|&&p| p >= npts)
                } else {
                    None
                };
                if let Some(p) = bad {
                    return Err(mismatch(format!(
                        "shared point {p} of {pair} past {npts} points"
                    )));
                }
            }
            for (pair, given) in self.given.iter().filter(|(p, _)| p.from == d) {
                if let Some(c) = given.cells.iter().find(|&&c| c >= ncells) {
                    return Err(mismatch(format!("given cell {c} of {pair} past {ncells} cells")));
                }
                if let Some(p) = given.points.iter().find(|&&p| p >= npts) {
                    return Err(mismatch(format!("given point {p} of {pair} past {npts} points")));
                }
            }
        }
        Ok(())
    }

    /// Collective: which rank holds each domain of the working set.
    pub fn create_domain_to_processor_map<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
    ) -> Result<DomainProcessorMap, GhostError> {
        DomainProcessorMap::build(comm, tag, domains)
    }

    /// Run one exchange: encode a segment for every pair with a local sender,
    /// route, and return the segments for local receivers in pair order.
    fn run_exchange<C, F>(
        &self,
        comm: &C,
        tag: CommTag,
        payload_kind: u16,
        domains: &[DomainId],
        mut encode: F,
    ) -> Result<(HashMap<DomainId, usize>, BTreeMap<DomainPair, Segment>), GhostError>
    where
        C: Communicator,
        F: FnMut(DomainPair, usize) -> Result<Segment, GhostError>,
    {
        let map = self.create_domain_to_processor_map(comm, tag, domains)?;
        let slot: HashMap<DomainId, usize> =
            domains.iter().enumerate().map(|(i, &d)| (d, i)).collect();
        let live: BTreeSet<DomainPair> = self
            .exchange_pairs()
            .filter(|p| map.is_present(p.from) && map.is_present(p.to))
            .collect();

        let mut outgoing = BTreeMap::new();
        for &pair in &live {
            if let Some(&i) = slot.get(&pair.from) {
                outgoing.insert(pair, encode(pair, i)?);
            }
        }
        let expected: BTreeSet<DomainPair> = live
            .iter()
            .copied()
            .filter(|p| slot.contains_key(&p.to))
            .collect();
        let received = route_segments(comm, tag.offset(2), payload_kind, &map, outgoing, &expected)?;
        Ok((slot, received))
    }

    /// Append to every local domain the given cells and points of its
    /// neighbours, renumbered into the receiver's local ids.
    ///
    /// The returned meshes carry the geometry, `avtOriginalNodeNumbers` and
    /// `avtOriginalCellNumbers` (origin domain, origin id), and `avtGhostZones`
    /// with the appended cells flagged as duplicated. Other named arrays are
    /// not carried over; exchange them with [`exchange_scalar`](Self::exchange_scalar)
    /// or [`exchange_vector`](Self::exchange_vector).
    pub fn exchange_mesh<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        meshes: &[Mesh],
    ) -> Result<Vec<Mesh>, GhostError> {
        check_count(domains.len(), meshes.len())?;
        let (slot, received) = self.run_exchange(comm, tag, kind::MESH, domains, |pair, i| {
            self.encode_mesh(pair, &meshes[i])
        })?;

        let mut out: Vec<GrowingMesh> = domains
            .iter()
            .zip(meshes)
            .map(|(&d, m)| GrowingMesh::new(d, m))
            .collect::<Result<_, _>>()?;
        for (pair, seg) in &received {
            let i = slot_of(&slot, *pair)?;
            out[i].append(*pair, seg)?;
        }
        let meshes: Vec<Mesh> = out.into_iter().map(GrowingMesh::finish).collect();
        for (d, m) in domains.iter().zip(&meshes) {
            log::debug!("domain {d}: {} points, {} cells after exchange", m.num_points(), m.num_cells());
        }
        Ok(meshes)
    }

    fn encode_mesh(&self, pair: DomainPair, mesh: &Mesh) -> Result<Segment, GhostError> {
        if mesh.is_structured() {
            return Err(GhostError::TopologyMismatch {
                domain: pair.from,
                reason: "structured mesh on unstructured boundaries".into(),
            });
        }
        let given = self.given_for(pair);
        let shared = self.shared.get(&pair);
        let mut position = HashMap::with_capacity(given.points.len());
        for (k, &p) in given.points.iter().enumerate() {
            position.entry(p).or_insert(k);
        }

        let mut w = WireWriter::new();
        for &p in &given.points {
            let xyz = mesh.points.get(p).ok_or(GhostError::IndexOutOfRange {
                index: p,
                len: mesh.points.len(),
            })?;
            w.put(WireCoord::new(*xyz));
        }
        w.put_slice(&to_le_ids(&given.points));
        w.put_slice(&to_le_ids(&given.cells));
        let cells = mesh.cells();
        for &c in &given.cells {
            let cell = cells.get(c).ok_or(GhostError::IndexOutOfRange {
                index: c,
                len: cells.len(),
            })?;
            w.put(WireCellHdr::new(cell.cell_type as u8, cell.points.len()));
            for &p in &cell.points {
                let conn = if let Some(&local) = shared.and_then(|s| s.get(&p)) {
                    WireConn::shared(local)
                } else if let Some(&k) = position.get(&p) {
                    WireConn::given(k)
                } else {
                    return Err(GhostError::UnresolvedCellPoint {
                        from: pair.from,
                        to: pair.to,
                        cell: c,
                        point: p,
                    });
                };
                w.put(conn);
            }
        }
        Ok(Segment {
            count: given.points.len(),
            aux: given.cells.len() as u32,
            body: w.finish(),
        })
    }

    /// Exchange a one-component array.
    pub fn exchange_scalar<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        is_point_data: bool,
        arrays: &[DataArray],
    ) -> Result<Vec<DataArray>, GhostError> {
        if let Some(a) = arrays.iter().find(|a| a.components() != 1) {
            return Err(GhostError::ComponentMismatch {
                expected: 1,
                got: a.components(),
            });
        }
        self.exchange_vector(comm, tag, domains, is_point_data, arrays)
    }

    /// Exchange an array of any element type and component count. All local
    /// arrays must agree on the element type.
    pub fn exchange_vector<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        is_point_data: bool,
        arrays: &[DataArray],
    ) -> Result<Vec<DataArray>, GhostError> {
        check_count(domains.len(), arrays.len())?;
        let element = arrays.first().map_or(ElementTag::U8, DataArray::tag);
        if let Some(a) = arrays.iter().find(|a| a.tag() != element) {
            return Err(GhostError::ArrayTypeMismatch {
                expected: element.name(),
                got: a.tag().name(),
            });
        }
        match element {
            ElementTag::U8 => self.exchange_array::<u8, C>(comm, tag, domains, is_point_data, arrays),
            ElementTag::I32 => self.exchange_array::<i32, C>(comm, tag, domains, is_point_data, arrays),
            ElementTag::I64 => self.exchange_array::<i64, C>(comm, tag, domains, is_point_data, arrays),
            ElementTag::F32 => self.exchange_array::<f32, C>(comm, tag, domains, is_point_data, arrays),
            ElementTag::F64 => self.exchange_array::<f64, C>(comm, tag, domains, is_point_data, arrays),
        }
    }

    fn exchange_array<T: Element, C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        is_point_data: bool,
        arrays: &[DataArray],
    ) -> Result<Vec<DataArray>, GhostError> {
        let (slot, received) = self.run_exchange(comm, tag, kind::ARRAY, domains, |pair, i| {
            let given = self.given_for(pair);
            let ids = if is_point_data { &given.points } else { &given.cells };
            let array = &arrays[i];
            let values: Vec<T> = array
                .gather_tuples::<T>(ids)?
                .into_iter()
                .map(T::le_order)
                .collect();
            Ok(Segment {
                count: ids.len(),
                aux: array_aux(T::TAG, array.components()),
                body: bytemuck::cast_slice(&values).to_vec(),
            })
        })?;

        let mut out = arrays.to_vec();
        for (pair, seg) in &received {
            let target = &mut out[slot_of(&slot, *pair)?];
            let (element, components) = split_array_aux(seg.aux);
            if element != Some(T::TAG) {
                return Err(GhostError::ArrayTypeMismatch {
                    expected: T::TAG.name(),
                    got: element.map_or("unknown", ElementTag::name),
                });
            }
            if components != target.components() {
                return Err(GhostError::ComponentMismatch {
                    expected: target.components(),
                    got: components,
                });
            }
            let values: Vec<T> = WireReader::new(&seg.body)
                .get_vec::<T>(seg.count * components)
                .map_err(|reason| malformed(*pair, reason))?
                .into_iter()
                .map(T::le_order)
                .collect();
            target.extend_from(&values)?;
        }
        Ok(out)
    }

    /// Exchange materials, keeping mixed zones whenever any local material has
    /// them and collapsing to clean zones otherwise.
    pub fn exchange_material<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        if materials.iter().any(Material::has_mixed) {
            self.exchange_mixed_materials(comm, tag, domains, materials)
        } else {
            self.exchange_clean_materials(comm, tag, domains, materials)
        }
    }

    /// Exchange materials with every mixed zone sent in full.
    pub fn exchange_mixed_materials<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        self.exchange_materials_as(comm, tag, domains, materials, MAT_MIXED)
    }

    /// Exchange materials with every given zone collapsed to its dominant
    /// material.
    pub fn exchange_clean_materials<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
    ) -> Result<Vec<Material>, GhostError> {
        self.exchange_materials_as(comm, tag, domains, materials, MAT_CLEAN)
    }

    fn exchange_materials_as<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
        mode: u32,
    ) -> Result<Vec<Material>, GhostError> {
        check_count(domains.len(), materials.len())?;
        let (slot, received) = self.run_exchange(comm, tag, kind::MATERIAL, domains, |pair, i| {
            let given = self.given_for(pair);
            let mat = &materials[i];
            let mut w = WireWriter::new();
            for &zone in &given.cells {
                if mode == MAT_CLEAN {
                    w.put(WireZoneMat::clean(mat.dominant_material(zone)?));
                    continue;
                }
                let comps = mat.zone_components(zone)?;
                if mat.matlist[zone] >= 0 {
                    w.put(WireZoneMat::clean(comps[0].material));
                } else {
                    w.put(WireZoneMat::mixed(comps.len()));
                    for c in &comps {
                        w.put(WireMix::new(c.material, c.volume_fraction));
                    }
                }
            }
            Ok(Segment {
                count: given.cells.len(),
                aux: mode,
                body: w.finish(),
            })
        })?;

        let mut out = materials.to_vec();
        for (pair, seg) in &received {
            let target = &mut out[slot_of(&slot, *pair)?];
            let bad = |reason: String| malformed(*pair, reason);
            let mut r = WireReader::new(&seg.body);
            for _ in 0..seg.count {
                let z: WireZoneMat = r.get().map_err(bad)?;
                let v = z.get();
                if v >= 0 {
                    target.push_clean_zone(v);
                } else if seg.aux == MAT_MIXED {
                    let mixes: Vec<WireMix> = r.get_vec(v.unsigned_abs() as usize).map_err(bad)?;
                    let comps: Vec<(i32, f32)> = mixes
                        .iter()
                        .map(|m| (m.material(), m.volume_fraction()))
                        .collect();
                    target.push_mixed_zone(&comps);
                } else {
                    return Err(bad(format!("mixed zone {v} in a clean material payload")));
                }
            }
            if !r.is_exhausted() {
                return Err(bad("trailing bytes after material zones".into()));
            }
        }
        Ok(out)
    }

    /// Exchange a per-mixed-slot variable. `materials` are the materials
    /// before exchange; given zones contribute their mixed slots in chain
    /// order, matching the slots appended by
    /// [`exchange_mixed_materials`](Self::exchange_mixed_materials).
    pub fn exchange_mix_var<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        domains: &[DomainId],
        materials: &[Material],
        vars: &[MixedVariable],
    ) -> Result<Vec<MixedVariable>, GhostError> {
        check_count(domains.len(), materials.len())?;
        check_count(domains.len(), vars.len())?;
        let (slot, received) = self.run_exchange(comm, tag, kind::MIX_VAR, domains, |pair, i| {
            let given = self.given_for(pair);
            let var = &vars[i];
            let mut values = Vec::new();
            for &zone in &given.cells {
                for c in materials[i].zone_components(zone)? {
                    if c.slot == usize::MAX {
                        continue;
                    }
                    let v = var.values.get(c.slot).ok_or(GhostError::IndexOutOfRange {
                        index: c.slot,
                        len: var.values.len(),
                    })?;
                    values.push(v.to_bits().to_le());
                }
            }
            Ok(Segment {
                count: values.len(),
                aux: 0,
                body: bytemuck::cast_slice(&values).to_vec(),
            })
        })?;

        let mut out = vars.to_vec();
        for (pair, seg) in &received {
            let bits: Vec<u32> = WireReader::new(&seg.body)
                .get_vec(seg.count)
                .map_err(|reason| malformed(*pair, reason))?;
            out[slot_of(&slot, *pair)?]
                .values
                .extend(bits.into_iter().map(|b| f32::from_bits(u32::from_le(b))));
        }
        Ok(out)
    }

    /// Flag `avtGhostNodes` on the local meshes and report whether the layer
    /// is robust. Points appended by [`exchange_mesh`](Self::exchange_mesh)
    /// are always ghost; shared points are ghost where a lower-numbered
    /// neighbour in `all_domains` also holds them.
    pub fn create_ghost_nodes(
        &self,
        domains: &[DomainId],
        meshes: &mut [Mesh],
        all_domains: &[DomainId],
    ) -> Result<bool, GhostError> {
        self.create_ghost_nodes_with(domains, meshes, all_domains, true)
    }

    /// As [`create_ghost_nodes`](Self::create_ghost_nodes); with
    /// `clean_ownership` off, shared points stay real on every domain.
    pub fn create_ghost_nodes_with(
        &self,
        domains: &[DomainId],
        meshes: &mut [Mesh],
        all_domains: &[DomainId],
        clean_ownership: bool,
    ) -> Result<bool, GhostError> {
        check_count(domains.len(), meshes.len())?;
        let present: BTreeSet<DomainId> = all_domains.iter().copied().collect();
        for (&d, mesh) in domains.iter().zip(meshes.iter_mut()) {
            let mut owners = PointOwnership::all_owned(d, mesh.num_points());
            if let Some(origins) = mesh.point_array(ORIGINAL_NODE_NUMBERS) {
                let ids = origins.try_as_slice::<i32>()?;
                for (p, pair) in ids.chunks_exact(2).enumerate() {
                    let origin = DomainId::new(pair[0] as u32);
                    if origin != d {
                        owners.set(p, origin)?;
                    }
                }
            }
            if clean_ownership {
                for nb in self.neighbors(d).into_iter().filter(|nb| *nb < d) {
                    if !present.contains(&nb) {
                        continue;
                    }
                    if let Some(map) = self.shared.get(&DomainPair::new(d, nb)) {
                        for &p in map.keys() {
                            owners.set_owner_min(p, nb)?;
                        }
                    }
                }
            }
            let bit = GhostNodeType::DuplicatedNode.bit();
            let n = with_ghost_nodes(mesh, |flags| owners.apply_to(flags, bit));
            log::debug!("domain {d}: {n} ghost nodes");
        }

        let weak = self.non_robust_pairs(all_domains);
        if !weak.is_empty() {
            log::warn!(
                "ghost node layer not robust: {} neighbour pairs lack given cells ({})",
                weak.len(),
                weak.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            );
        }
        Ok(weak.is_empty())
    }

    /// Neighbour pairs in `all_domains` whose shared boundary lacks given
    /// cells in at least one direction.
    pub fn non_robust_pairs(&self, all_domains: &[DomainId]) -> Vec<DomainPair> {
        let present: BTreeSet<DomainId> = all_domains.iter().copied().collect();
        let lacks_cells = |pair: DomainPair| match self.given.get(&pair) {
            Some(g) => g.cells.is_empty(),
            None => !self.pairs_from_shared,
        };
        self.shared
            .iter()
            .filter(|(p, map)| p.from < p.to && !map.is_empty())
            .map(|(p, _)| *p)
            .filter(|p| present.contains(&p.from) && present.contains(&p.to))
            .filter(|&p| lacks_cells(p) || lacks_cells(p.reversed()))
            .collect()
    }

    /// Whether the requested ghost data needs any messages at all.
    pub fn requires_communication(&self, ghost_type: GhostDataType) -> bool {
        match ghost_type {
            GhostDataType::ZoneData => true,
            GhostDataType::NodeData | GhostDataType::None => false,
        }
    }
}

impl DebugInvariants for UnstructuredDomainBoundaries {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "UnstructuredDomainBoundaries");
    }

    /// Every pair is in range, and each shared map is the inverse of its
    /// reverse pair's map.
    fn validate_invariants(&self) -> Result<(), GhostError> {
        for pair in self.shared.keys().chain(self.given.keys()) {
            self.check_pair(pair.from, pair.to)?;
        }
        for (pair, forward) in &self.shared {
            let backward = self.shared.get(&pair.reversed());
            for (&p, &q) in forward {
                if backward.and_then(|b| b.get(&q)) != Some(&p) {
                    return Err(GhostError::TopologyMismatch {
                        domain: pair.from,
                        reason: format!("shared point {p}->{q} of {pair} has no matching reverse entry"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_count(domains: usize, payloads: usize) -> Result<(), GhostError> {
    if domains == payloads {
        Ok(())
    } else {
        Err(GhostError::ArrayCountMismatch { domains, payloads })
    }
}

/// Index of the local receiver of `pair`.
fn slot_of(slot: &HashMap<DomainId, usize>, pair: DomainPair) -> Result<usize, GhostError> {
    slot.get(&pair.to)
        .copied()
        .ok_or_else(|| malformed(pair, "receiver is not a local domain".into()))
}

fn malformed(pair: DomainPair, reason: String) -> GhostError {
    GhostError::MalformedPayload {
        from: pair.from,
        to: pair.to,
        reason,
    }
}

fn to_le_ids(ids: &[usize]) -> Vec<u64> {
    ids.iter().map(|&i| (i as u64).to_le()).collect()
}

fn to_i32(value: usize) -> Result<i32, GhostError> {
    i32::try_from(value).map_err(|_| GhostError::IndexOutOfRange {
        index: value,
        len: i32::MAX as usize,
    })
}

fn array_aux(element: ElementTag, components: usize) -> u32 {
    (element as u32) | ((components as u32) << 8)
}

fn split_array_aux(aux: u32) -> (Option<ElementTag>, usize) {
    (ElementTag::from_u8((aux & 0xFF) as u8), (aux >> 8) as usize)
}

/// A receiving mesh while neighbour payloads are appended to it.
struct GrowingMesh {
    domain: DomainId,
    original_points: usize,
    points: Vec<[f64; 3]>,
    cells: Vec<Cell>,
    node_origin: Vec<i32>,
    cell_origin: Vec<i32>,
    zones: Vec<u8>,
    nodes: Option<Vec<u8>>,
}

impl GrowingMesh {
    fn new(domain: DomainId, mesh: &Mesh) -> Result<Self, GhostError> {
        if mesh.is_structured() {
            return Err(GhostError::TopologyMismatch {
                domain,
                reason: "structured mesh on unstructured boundaries".into(),
            });
        }
        let d = to_i32(domain.index())?;
        let (npts, ncells) = mesh.shape();
        let mut node_origin = Vec::with_capacity(2 * npts);
        for p in 0..npts {
            node_origin.extend([d, to_i32(p)?]);
        }
        let mut cell_origin = Vec::with_capacity(2 * ncells);
        for c in 0..ncells {
            cell_origin.extend([d, to_i32(c)?]);
        }
        let zones = match mesh.cell_array(GHOST_ZONES).and_then(|a| a.as_slice::<u8>()) {
            Some(z) if z.len() == ncells => z.to_vec(),
            _ => vec![0; ncells],
        };
        let nodes = mesh
            .point_array(GHOST_NODES)
            .and_then(|a| a.as_slice::<u8>())
            .filter(|n| n.len() == npts)
            .map(<[u8]>::to_vec);
        let dropped = mesh
            .point_data
            .keys()
            .chain(mesh.cell_data.keys())
            .filter(|k| ![GHOST_ZONES, GHOST_NODES, ORIGINAL_NODE_NUMBERS, ORIGINAL_CELL_NUMBERS].contains(&k.as_str()))
            .count();
        if dropped > 0 {
            log::debug!("domain {domain}: {dropped} named arrays not carried by mesh exchange");
        }
        Ok(Self {
            domain,
            original_points: npts,
            points: mesh.points.clone(),
            cells: mesh.cells().to_vec(),
            node_origin,
            cell_origin,
            zones,
            nodes,
        })
    }

    fn append(&mut self, pair: DomainPair, seg: &Segment) -> Result<(), GhostError> {
        debug_assert_eq!(pair.to, self.domain);
        let bad = |reason: String| malformed(pair, reason);
        let mut r = WireReader::new(&seg.body);
        let n_points = seg.count;
        let n_cells = seg.aux as usize;
        let coords: Vec<WireCoord> = r.get_vec(n_points).map_err(bad)?;
        let point_ids: Vec<u64> = r.get_vec(n_points).map_err(bad)?;
        let cell_ids: Vec<u64> = r.get_vec(n_cells).map_err(bad)?;
        let from = to_i32(pair.from.index())?;

        let base = self.points.len();
        self.points.extend(coords.iter().map(WireCoord::get));
        for id in point_ids {
            self.node_origin.extend([from, to_i32(u64::from_le(id) as usize)?]);
        }
        for id in cell_ids {
            let hdr: WireCellHdr = r.get().map_err(bad)?;
            let cell_type = CellType::from_u8(hdr.cell_type)
                .ok_or_else(|| bad(format!("unknown cell type {}", hdr.cell_type)))?;
            let conns: Vec<WireConn> = r.get_vec(hdr.n_points()).map_err(bad)?;
            let mut points = Vec::with_capacity(conns.len());
            for conn in conns {
                points.push(match conn.decode() {
                    ConnRef::Shared(l) if l < self.original_points => l,
                    ConnRef::Given(k) if k < n_points => base + k,
                    other => return Err(bad(format!("connectivity {other:?} out of range"))),
                });
            }
            self.cells.push(Cell::new(cell_type, points));
            self.cell_origin.extend([from, to_i32(u64::from_le(id) as usize)?]);
            self.zones.push(GhostZoneType::DuplicatedZoneInternalToProblem.bit());
        }
        if !r.is_exhausted() {
            return Err(bad("trailing bytes after given cells".into()));
        }
        if let Some(nodes) = self.nodes.as_mut() {
            nodes.resize(self.points.len(), 0);
        }
        log::trace!("{pair}: appended {n_points} points, {n_cells} cells at {base}");
        Ok(())
    }

    fn finish(self) -> Mesh {
        let mut mesh = Mesh::unstructured(self.points, self.cells);
        mesh.set_point_array(ORIGINAL_NODE_NUMBERS, DataArray::new(2, self.node_origin));
        mesh.set_cell_array(ORIGINAL_CELL_NUMBERS, DataArray::new(2, self.cell_origin));
        mesh.set_cell_array(GHOST_ZONES, DataArray::scalar(self.zones));
        if let Some(nodes) = self.nodes {
            mesh.set_point_array(GHOST_NODES, DataArray::scalar(nodes));
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::domain::did;

    const TAG: CommTag = CommTag::new(0x100);

    /// Two unit squares side by side: A = cell over x in [0,1], B over [1,2].
    /// A points 0..4: (0,0) (1,0) (1,1) (0,1); B points 0..4: (1,0) (2,0) (2,1) (1,1).
    fn squares() -> (UnstructuredDomainBoundaries, Vec<Mesh>) {
        let a = Mesh::unstructured(
            vec![[0., 0., 0.], [1., 0., 0.], [1., 1., 0.], [0., 1., 0.]],
            vec![Cell::new(CellType::Quad, vec![0, 1, 2, 3])],
        );
        let b = Mesh::unstructured(
            vec![[1., 0., 0.], [2., 0., 0.], [2., 1., 0.], [1., 1., 0.]],
            vec![Cell::new(CellType::Quad, vec![0, 1, 2, 3])],
        );
        let mut bd = UnstructuredDomainBoundaries::new(2);
        bd.set_shared_points(did(0), did(1), &[1, 2], &[0, 3]).unwrap();
        bd.set_given_cells_and_points(did(0), did(1), &[0], &[0, 1, 2, 3], true)
            .unwrap();
        bd.set_given_cells_and_points(did(1), did(0), &[0], &[0, 1, 2, 3], true)
            .unwrap();
        (bd, vec![a, b])
    }

    #[test]
    fn mismatched_shared_lengths_record_nothing() {
        let mut bd = UnstructuredDomainBoundaries::new(2);
        let err = bd
            .set_shared_points(did(0), did(1), &[1, 2, 3], &[1, 2])
            .unwrap_err();
        assert!(matches!(err, GhostError::SharedPointLengthMismatch { .. }));
        assert!(bd.shared_points(did(0), did(1)).is_none());
        assert!(bd.shared_points(did(1), did(0)).is_none());
    }

    #[test]
    fn setup_rejects_bad_domains() {
        let mut bd = UnstructuredDomainBoundaries::new(2);
        assert!(matches!(
            bd.set_shared_points(did(1), did(1), &[0], &[0]),
            Err(GhostError::SelfNeighbor(_))
        ));
        assert!(matches!(
            bd.set_given_cells_and_points(did(0), did(2), &[], &[], false),
            Err(GhostError::DomainOutOfRange { .. })
        ));
        bd.set_shared_points(did(0), did(1), &[0], &[0]).unwrap();
        assert!(bd.set_total_number_of_domains(1).is_err());
        assert_eq!(bd.num_domains(), 2);
    }

    #[test]
    fn filter_drops_shared_points() {
        let (bd, _) = squares();
        assert_eq!(bd.given(did(0), did(1)).unwrap().points, vec![0, 3]);
        assert_eq!(bd.given(did(1), did(0)).unwrap().points, vec![1, 2]);
    }

    #[test]
    fn mesh_exchange_appends_in_receiver_numbering() {
        let (bd, meshes) = squares();
        let doms = [did(0), did(1)];
        let out = bd.exchange_mesh(&NoComm, TAG, &doms, &meshes).unwrap();

        let a = &out[0];
        assert_eq!(a.num_points(), 6);
        assert_eq!(a.points[4], [2., 0., 0.]);
        assert_eq!(a.points[5], [2., 1., 0.]);
        // B's quad 0 1 2 3 -> shared 0->1, given 1->4, given 2->5, shared 3->2
        assert_eq!(a.cells()[1].points, vec![1, 4, 5, 2]);
        let zones = a.cell_array(GHOST_ZONES).unwrap().as_slice::<u8>().unwrap();
        assert_eq!(zones, &[0, GhostZoneType::DuplicatedZoneInternalToProblem.bit()]);
        let origin = a.point_array(ORIGINAL_NODE_NUMBERS).unwrap().as_slice::<i32>().unwrap();
        assert_eq!(&origin[8..], &[1, 1, 1, 2]);

        let b = &out[1];
        assert_eq!(b.cells()[1].points, vec![4, 0, 3, 5]);
    }

    #[test]
    fn unresolved_cell_point_is_error() {
        let (mut bd, meshes) = squares();
        bd.set_given_cells_and_points(did(0), did(1), &[0], &[0], true)
            .unwrap();
        let err = bd
            .exchange_mesh(&NoComm, TAG, &[did(0), did(1)], &meshes)
            .unwrap_err();
        assert!(matches!(
            err,
            GhostError::UnresolvedCellPoint { cell: 0, point: 3, .. }
        ));
    }

    #[test]
    fn arrays_follow_mesh_numbering() {
        let (bd, _) = squares();
        let doms = [did(0), did(1)];
        let pts = vec![
            DataArray::scalar(vec![0.0f64, 1.0, 2.0, 3.0]),
            DataArray::scalar(vec![10.0f64, 11.0, 12.0, 13.0]),
        ];
        let out = bd.exchange_scalar(&NoComm, TAG, &doms, true, &pts).unwrap();
        assert_eq!(out[0].as_slice::<f64>().unwrap(), &[0., 1., 2., 3., 11., 12.]);
        assert_eq!(out[1].as_slice::<f64>().unwrap(), &[10., 11., 12., 13., 0., 3.]);

        let vecs = vec![
            DataArray::new(2, vec![1i32, 2]),
            DataArray::new(2, vec![3i32, 4]),
        ];
        let out = bd.exchange_vector(&NoComm, TAG, &doms, false, &vecs).unwrap();
        assert_eq!(out[0].as_slice::<i32>().unwrap(), &[1, 2, 3, 4]);
        assert!(bd.exchange_scalar(&NoComm, TAG, &doms, false, &vecs).is_err());

        let mixed = vec![DataArray::scalar(vec![1.0f32]), DataArray::scalar(vec![1i32])];
        assert!(matches!(
            bd.exchange_vector(&NoComm, TAG, &doms, false, &mixed),
            Err(GhostError::ArrayTypeMismatch { .. })
        ));
    }

    #[test]
    fn materials_and_mix_vars() {
        let (bd, _) = squares();
        let doms = [did(0), did(1)];
        let a = Material::clean(vec!["steel".into(), "air".into()], vec![0]);
        let mut b = Material::clean(vec!["steel".into(), "air".into()], vec![]);
        b.push_mixed_zone(&[(0, 0.3), (1, 0.7)]);
        let mats = vec![a, b];

        let mixed = bd.exchange_material(&NoComm, TAG, &doms, &mats).unwrap();
        assert_eq!(mixed[0].matlist, vec![0, -1]);
        assert_eq!(mixed[0].mix_mat, vec![0, 1]);
        assert_eq!(mixed[0].mix_zone, vec![1, 1]);
        assert_eq!(mixed[1].matlist, vec![-1, 0]);

        let clean = bd.exchange_clean_materials(&NoComm, TAG, &doms, &mats).unwrap();
        assert_eq!(clean[0].matlist, vec![0, 1]);
        assert!(!clean[0].has_mixed());

        let vars = vec![MixedVariable::new("p", vec![]), MixedVariable::new("p", vec![5.0, 6.0])];
        let out = bd.exchange_mix_var(&NoComm, TAG, &doms, &mats, &vars).unwrap();
        assert_eq!(out[0].values, vec![5.0, 6.0]);
        assert_eq!(out[1].values, vec![5.0, 6.0]);
    }

    #[test]
    fn ghost_nodes_after_exchange() {
        let (bd, meshes) = squares();
        let doms = [did(0), did(1)];
        let mut out = bd.exchange_mesh(&NoComm, TAG, &doms, &meshes).unwrap();
        assert!(bd.create_ghost_nodes(&doms, &mut out, &doms).unwrap());
        let bit = GhostNodeType::DuplicatedNode.bit();
        let a = out[0].point_array(GHOST_NODES).unwrap().as_slice::<u8>().unwrap();
        assert_eq!(a, &[0, 0, 0, 0, bit, bit]);
        // B's shared points 0 and 3 are owned by domain 0
        let b = out[1].point_array(GHOST_NODES).unwrap().as_slice::<u8>().unwrap();
        assert_eq!(b, &[bit, 0, 0, bit, bit, bit]);
    }

    #[test]
    fn missing_reverse_given_is_not_robust() {
        let mut bd = UnstructuredDomainBoundaries::new(2);
        bd.set_shared_points(did(0), did(1), &[1], &[0]).unwrap();
        bd.set_given_cells_and_points(did(0), did(1), &[0], &[], true)
            .unwrap();
        let mut meshes = vec![
            Mesh::unstructured(vec![[0.; 3]; 2], vec![]),
            Mesh::unstructured(vec![[0.; 3]; 2], vec![]),
        ];
        let robust = bd
            .create_ghost_nodes(&[did(0), did(1)], &mut meshes, &[did(0), did(1)])
            .unwrap();
        assert!(!robust);
        assert_eq!(bd.non_robust_pairs(&[did(0), did(1)]).len(), 1);
        // an absent neighbour makes the pair irrelevant
        assert!(bd.non_robust_pairs(&[did(0)]).is_empty());
    }

    #[test]
    fn confirm_mesh_catches_changed_topology() {
        let (mut bd, meshes) = squares();
        let doms = [did(0), did(1)];
        bd.confirm_mesh(&doms, &meshes).unwrap();
        bd.record_mesh_shape(did(0), (4, 1));
        let shrunk = vec![
            Mesh::unstructured(vec![[0.; 3]; 3], meshes[0].cells().to_vec()),
            meshes[1].clone(),
        ];
        assert!(bd.confirm_mesh(&doms, &shrunk).unwrap_err().is_topology_mismatch());
        assert!(matches!(
            bd.confirm_mesh(&doms, &meshes[..1]),
            Err(GhostError::ArrayCountMismatch { .. })
        ));
    }

    #[test]
    fn shared_maps_stay_inverse() {
        let (mut bd, _) = squares();
        bd.validate_invariants().unwrap();
        // A's point 1 re-declared against a second B point
        bd.set_shared_points(did(0), did(1), &[1], &[2]).unwrap();
        assert!(bd.validate_invariants().unwrap_err().is_topology_mismatch());
    }

    #[test]
    fn requires_communication_by_ghost_type() {
        let bd = UnstructuredDomainBoundaries::new(1);
        assert!(bd.requires_communication(GhostDataType::ZoneData));
        assert!(!bd.requires_communication(GhostDataType::NodeData));
        assert!(!bd.requires_communication(GhostDataType::None));
    }
}
