//! Routing of per-pair payloads between domains.
//!
//! Every boundary exchange produces one [`Segment`] per `(from, to)` pair.
//! Segments whose receiver lives on this rank are handed over directly. The
//! rest are batched into one message per destination rank (a [`WireHdr`]
//! followed by the segments in ascending pair order) and moved with
//! [`Communicator::exchange`].

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::all_gather_variable_length;
use crate::algs::wire::{WireHdr, WireLen, WirePairHdr, WireReader, WireWriter, kind};
use crate::mesh_error::GhostError;
use crate::topology::domain::{DomainId, DomainPair};
use std::collections::{BTreeMap, BTreeSet};

/// Tag values consumed by one boundary exchange call: two for the domain map
/// gather, two for the payload exchange.
pub const TAGS_PER_EXCHANGE: u16 = 4;

/// Which rank each domain of the working set lives on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainProcessorMap {
    me: usize,
    rank_of: BTreeMap<DomainId, usize>,
}

impl DomainProcessorMap {
    /// Map for a single process holding `domains`.
    pub fn serial(domains: &[DomainId]) -> Result<Self, GhostError> {
        let mut rank_of = BTreeMap::new();
        insert_rank(&mut rank_of, domains, 0)?;
        Ok(Self { me: 0, rank_of })
    }

    /// Collective: every rank contributes its local domain list.
    pub fn build<C: Communicator>(
        comm: &C,
        tag: CommTag,
        local: &[DomainId],
    ) -> Result<Self, GhostError> {
        if comm.size() <= 1 {
            return Self::serial(local);
        }
        let mut w = WireWriter::new();
        w.put(WireHdr::new(kind::DOMAIN_LIST, local.len()));
        for d in local {
            w.put(d.get().to_le());
        }
        let lists = all_gather_variable_length(comm, tag, &w.finish())?;

        let mut rank_of = BTreeMap::new();
        for (rank, bytes) in lists.iter().enumerate() {
            let mut r = WireReader::new(bytes);
            let decoded = r.header(kind::DOMAIN_LIST).and_then(|hdr| {
                let raw: Vec<u32> = r.get_vec(hdr.segments())?;
                Ok(raw.into_iter().map(|v| DomainId::new(u32::from_le(v))).collect::<Vec<_>>())
            });
            let ids = decoded.map_err(|e| GhostError::comm(rank, format!("domain list: {e}")))?;
            insert_rank(&mut rank_of, &ids, rank)?;
        }
        log::debug!(
            "rank {}: {} domains resident across {} ranks",
            comm.rank(),
            rank_of.len(),
            comm.size()
        );
        Ok(Self {
            me: comm.rank(),
            rank_of,
        })
    }

    pub fn rank_of(&self, domain: DomainId) -> Option<usize> {
        self.rank_of.get(&domain).copied()
    }

    /// Resident somewhere in the working set.
    pub fn is_present(&self, domain: DomainId) -> bool {
        self.rank_of.contains_key(&domain)
    }

    pub fn is_local(&self, domain: DomainId) -> bool {
        self.rank_of(domain) == Some(self.me)
    }

    pub fn domains(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.rank_of.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rank_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rank_of.is_empty()
    }
}

fn insert_rank(
    rank_of: &mut BTreeMap<DomainId, usize>,
    domains: &[DomainId],
    rank: usize,
) -> Result<(), GhostError> {
    for &d in domains {
        if let Some(prev) = rank_of.insert(d, rank) {
            return Err(GhostError::TopologyMismatch {
                domain: d,
                reason: format!("domain listed by rank {prev} and rank {rank}"),
            });
        }
    }
    Ok(())
}

/// Payload for one `(from, to)` pair. `count` and `aux` are interpreted by
/// the exchange that produced the segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    pub count: usize,
    pub aux: u32,
    pub body: Vec<u8>,
}

/// Deliver `outgoing` segments to the ranks owning their receivers and collect
/// every segment in `expected`.
///
/// Fails if a received segment was not expected or an expected one never
/// arrived; nothing is applied by this function.
pub fn route_segments<C: Communicator>(
    comm: &C,
    tag: CommTag,
    payload_kind: u16,
    map: &DomainProcessorMap,
    outgoing: BTreeMap<DomainPair, Segment>,
    expected: &BTreeSet<DomainPair>,
) -> Result<BTreeMap<DomainPair, Segment>, GhostError> {
    let me = comm.rank();
    let mut received = BTreeMap::new();
    let mut by_rank: BTreeMap<usize, Vec<(DomainPair, Segment)>> = BTreeMap::new();
    for (pair, seg) in outgoing {
        let dest = map.rank_of(pair.to).ok_or(GhostError::UnknownDomain(pair.to))?;
        if dest == me {
            received.insert(pair, seg);
        } else {
            by_rank.entry(dest).or_default().push((pair, seg));
        }
    }
    let local_copies = received.len();

    let mut messages = BTreeMap::new();
    let mut bytes_out = 0usize;
    for (rank, segs) in by_rank {
        let mut w = WireWriter::new();
        w.put(WireHdr::new(payload_kind, segs.len()));
        for (pair, seg) in segs {
            w.put(WirePairHdr::new(pair.from.get(), pair.to.get(), seg.count, seg.aux));
            w.put(WireLen::new(seg.body.len()));
            w.put_slice(&seg.body);
        }
        let bytes = w.finish();
        bytes_out += bytes.len();
        messages.insert(rank, bytes);
    }

    let senders: BTreeSet<usize> = expected
        .iter()
        .filter_map(|p| map.rank_of(p.from))
        .filter(|&r| r != me)
        .collect();

    let replies = comm.exchange(tag, &messages, &senders)?;
    for (rank, bytes) in &replies {
        decode_message(*rank, bytes, payload_kind, map, expected, &mut received)?;
    }
    log::debug!(
        "rank {me}: {local_copies} local segments, {} messages out ({bytes_out} bytes), {} in",
        messages.len(),
        replies.len()
    );

    if let Some(missing) = expected.iter().find(|p| !received.contains_key(p)) {
        return Err(GhostError::MalformedPayload {
            from: missing.from,
            to: missing.to,
            reason: "no payload received".into(),
        });
    }
    Ok(received)
}

fn decode_message(
    rank: usize,
    bytes: &[u8],
    payload_kind: u16,
    map: &DomainProcessorMap,
    expected: &BTreeSet<DomainPair>,
    received: &mut BTreeMap<DomainPair, Segment>,
) -> Result<(), GhostError> {
    let mut r = WireReader::new(bytes);
    let hdr = r
        .header(payload_kind)
        .map_err(|e| GhostError::comm(rank, e))?;
    for _ in 0..hdr.segments() {
        let ph: WirePairHdr = r.get().map_err(|e| GhostError::comm(rank, e))?;
        let pair = DomainPair::new(DomainId::new(ph.from()), DomainId::new(ph.to()));
        let malformed = |reason: String| GhostError::MalformedPayload {
            from: pair.from,
            to: pair.to,
            reason,
        };
        let len: WireLen = r.get().map_err(malformed)?;
        let body: Vec<u8> = r.get_vec(len.get()).map_err(malformed)?;
        if !expected.contains(&pair) || map.rank_of(pair.from) != Some(rank) {
            return Err(malformed(format!("unexpected segment from rank {rank}")));
        }
        let seg = Segment {
            count: ph.count(),
            aux: ph.aux(),
            body,
        };
        if received.insert(pair, seg).is_some() {
            return Err(malformed("duplicate segment".into()));
        }
        log::trace!("segment {pair} from rank {rank}: {} records", ph.count());
    }
    if !r.is_exhausted() {
        return Err(GhostError::comm(rank, "trailing bytes after last segment"));
    }
    Ok(())
}
