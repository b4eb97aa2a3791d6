//! Thin façade over intra-process (mailbox) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable**; the exchange layer calls `.wait()` before it
//! trusts that a buffer is ready. Higher-level code should go through
//! [`Communicator::exchange`], which backends may override with a schedule that
//! suits their transport.

use crate::algs::exchange;
use crate::mesh_error::GhostError;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

/// Message tag epoch. Each exchange call derives its tags from one of these so
/// concurrent epochs never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(raw: u16) -> Self {
        CommTag(raw)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// A tag `n` steps past this one (wrapping).
    pub const fn offset(self, n: u16) -> Self {
        CommTag(self.0.wrapping_add(n))
    }
}

impl Default for CommTag {
    fn default() -> Self {
        CommTag(0x6A00)
    }
}

/// Point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of processes.
    fn size(&self) -> usize;

    fn barrier(&self) {}

    /// Send one buffer to each peer in `outgoing` and receive one from each
    /// peer in `incoming`. Messages to or from this rank are not allowed.
    fn exchange(
        &self,
        tag: CommTag,
        outgoing: &BTreeMap<usize, Vec<u8>>,
        incoming: &BTreeSet<usize>,
    ) -> Result<BTreeMap<usize, Vec<u8>>, GhostError>
    where
        Self: Sized,
    {
        exchange::exchange_two_stage(self, tag, outgoing, incoming)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (u64, usize, usize, u16); // (session, src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Receive handle that polls the mailbox when waited on.
pub struct LocalHandle {
    key: Key,
    len: usize,
    timeout: Duration,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let start = Instant::now();
        loop {
            if let Some(mut queue) = MAILBOX.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    let n = self.len.min(bytes.len());
                    return Some(bytes[..n].to_vec());
                }
            }
            if start.elapsed() > self.timeout {
                log::warn!("mailbox receive timed out for key {:?}", self.key);
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: ranks are threads sharing a global mailbox.
///
/// Ranks created together by [`RayonComm::world`] share a private session, so
/// independent worlds (e.g. concurrent tests) never see each other's messages.
/// Messages between the same `(src, dst, tag)` are delivered FIFO.
#[derive(Clone, Debug)]
pub struct RayonComm {
    session: u64,
    rank: usize,
    size: usize,
    barrier: Option<Arc<Barrier>>,
    timeout: Duration,
}

impl RayonComm {
    /// A rank in the shared default session. Prefer [`RayonComm::world`].
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            session: 0,
            rank,
            size,
            barrier: None,
            timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// `size` connected ranks in a fresh session.
    pub fn world(size: usize) -> Vec<Self> {
        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let barrier = Arc::new(Barrier::new(size.max(1)));
        (0..size)
            .map(|rank| Self {
                session,
                rank,
                size,
                barrier: Some(barrier.clone()),
                timeout: DEFAULT_RECV_TIMEOUT,
            })
            .collect()
    }

    /// Give up on a receive after `timeout`; the exchange then fails with
    /// `CommError`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.session, self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            key: (self.session, peer, self.rank, tag),
            len: buf.len(),
            timeout: self.timeout,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        if let Some(b) = &self.barrier {
            b.wait();
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::CommunicatorCollectives;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// MPI communicator over `MPI_COMM_WORLD`.
    ///
    /// Point-to-point calls are blocking. [`Communicator::exchange`] is
    /// overridden with a pairwise schedule (peers visited in ascending order,
    /// lower rank sends first) that cannot deadlock.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        pub world: SimpleCommunicator,
        pub rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialise MPI. Returns `None` if MPI was already initialised.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    pub struct MpiHandle(Option<Vec<u8>>);

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
            MpiHandle(None)
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            let n = buf.len().min(data.len());
            buf[..n].copy_from_slice(&data[..n]);
            MpiHandle(Some(data))
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn exchange(
            &self,
            tag: CommTag,
            outgoing: &BTreeMap<usize, Vec<u8>>,
            incoming: &BTreeSet<usize>,
        ) -> Result<BTreeMap<usize, Vec<u8>>, GhostError> {
            let peers: BTreeSet<usize> = outgoing.keys().chain(incoming.iter()).copied().collect();
            let mut received = BTreeMap::new();
            let t = tag.as_u16() as i32;
            for peer in peers {
                if peer == self.rank {
                    return Err(GhostError::comm(peer, "self-message in MPI exchange"));
                }
                let proc = self.world.process_at_rank(peer as i32);
                let send = |buf: &Vec<u8>| proc.send_with_tag(&buf[..], t);
                let recv = || proc.receive_vec_with_tag::<u8>(t).0;
                if self.rank < peer {
                    if let Some(buf) = outgoing.get(&peer) {
                        send(buf);
                    }
                    if incoming.contains(&peer) {
                        received.insert(peer, recv());
                    }
                } else {
                    if incoming.contains(&peer) {
                        received.insert(peer, recv());
                    }
                    if let Some(buf) = outgoing.get(&peer) {
                        send(buf);
                    }
                }
            }
            Ok(received)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
