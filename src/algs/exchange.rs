//! Peer exchange built on point-to-point sends.
//!
//! Stage 1 exchanges byte counts with every peer, stage 2 exchanges the
//! payloads themselves. Every send and receive handle is drained before
//! returning, even when an error occurs, and the first error wins.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::WireLen;
use crate::mesh_error::GhostError;
use std::collections::{BTreeMap, BTreeSet};
use std::mem::size_of;

/// Generic two-stage exchange used by [`Communicator::exchange`].
pub fn exchange_two_stage<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    incoming: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, GhostError>
where
    C: Communicator,
{
    let me = comm.rank();
    if let Some(&peer) = outgoing.keys().chain(incoming.iter()).find(|&&p| p == me) {
        return Err(GhostError::comm(peer, "exchange with own rank"));
    }
    let sizes = exchange_sizes(comm, tag, outgoing, incoming)?;
    exchange_payloads(comm, tag.offset(1), outgoing, &sizes)
}

/// Stage 1: tell each receiver how many bytes to expect.
fn exchange_sizes<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    incoming: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, usize>, GhostError> {
    // 1) post all receives
    let mut recv_size = Vec::with_capacity(incoming.len());
    for &nbr in incoming {
        let mut cnt = [0u8; size_of::<WireLen>()];
        let h = comm.irecv(nbr, tag.as_u16(), &mut cnt);
        recv_size.push((nbr, h));
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&nbr, bytes) in outgoing {
        let count = WireLen::new(bytes.len());
        pending_sends.push(comm.isend(nbr, tag.as_u16(), bytemuck::bytes_of(&count)));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == size_of::<WireLen>() => {
                let cnt: WireLen = bytemuck::pod_read_unaligned(&data);
                sizes_in.insert(nbr, cnt.get());
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(GhostError::comm(
                    nbr,
                    format!(
                        "expected {} bytes for size header, got {}",
                        size_of::<WireLen>(),
                        data.len()
                    ),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(GhostError::comm(
                    nbr,
                    format!("failed to receive size from rank {nbr}"),
                ));
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Stage 2: move the payloads.
fn exchange_payloads<C: Communicator>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
    sizes: &BTreeMap<usize, usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, GhostError> {
    let mut recv_data = Vec::with_capacity(sizes.len());
    for (&nbr, &n) in sizes {
        let mut buffer = vec![0u8; n];
        let h = comm.irecv(nbr, tag.as_u16(), &mut buffer);
        recv_data.push((nbr, n, h));
    }

    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&nbr, bytes) in outgoing {
        pending_sends.push(comm.isend(nbr, tag.as_u16(), bytes));
    }

    let mut out = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, n, h) in recv_data {
        match h.wait() {
            Some(raw) if raw.len() == n => {
                out.insert(nbr, raw);
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(GhostError::comm(
                    nbr,
                    format!("expected {n} payload bytes, got {}", raw.len()),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(GhostError::comm(
                    nbr,
                    format!("failed to receive payload from rank {nbr}"),
                ));
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Collective gather of one variable-length buffer per rank to `root`.
///
/// On `root` returns the concatenation in rank order together with an offset
/// table of `size + 1` entries, so rank `r`'s piece is
/// `all[offsets[r]..offsets[r + 1]]`. Other ranks get `None`.
pub fn gather_variable_length<C: Communicator>(
    comm: &C,
    tag: CommTag,
    root: usize,
    buffer: &[u8],
) -> Result<Option<(Vec<u8>, Vec<usize>)>, GhostError> {
    let me = comm.rank();
    let size = comm.size();
    if root >= size {
        return Err(GhostError::comm(root, format!("gather root out of range (size {size})")));
    }
    if me != root {
        let outgoing = BTreeMap::from([(root, buffer.to_vec())]);
        comm.exchange(tag, &outgoing, &BTreeSet::new())?;
        return Ok(None);
    }
    let incoming: BTreeSet<usize> = (0..size).filter(|&r| r != root).collect();
    let mut pieces = comm.exchange(tag, &BTreeMap::new(), &incoming)?;
    pieces.insert(root, buffer.to_vec());
    let mut all = Vec::new();
    let mut offsets = Vec::with_capacity(size + 1);
    for r in 0..size {
        offsets.push(all.len());
        all.extend(pieces.remove(&r).unwrap_or_default());
    }
    offsets.push(all.len());
    Ok(Some((all, offsets)))
}

/// Every rank receives every rank's buffer, indexed by rank.
pub fn all_gather_variable_length<C: Communicator>(
    comm: &C,
    tag: CommTag,
    buffer: &[u8],
) -> Result<Vec<Vec<u8>>, GhostError> {
    let me = comm.rank();
    let size = comm.size();
    let peers: BTreeSet<usize> = (0..size).filter(|&r| r != me).collect();
    let outgoing: BTreeMap<usize, Vec<u8>> =
        peers.iter().map(|&r| (r, buffer.to_vec())).collect();
    let mut pieces = comm.exchange(tag, &outgoing, &peers)?;
    pieces.insert(me, buffer.to_vec());
    Ok((0..size)
        .map(|r| pieces.remove(&r).unwrap_or_default())
        .collect())
}
