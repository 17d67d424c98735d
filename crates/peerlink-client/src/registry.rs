//! Peer session registry.
//!
//! Single source of truth for which remote peers we are negotiating with.
//! The map is guarded by one `RwLock`; each session has its own `Mutex`
//! that the negotiation engine holds for the length of one transition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use peerlink_common::IceCandidate;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::peer::{DataChannel, PeerConnection};

/// Cap on distinct peers with candidates waiting for a session to exist.
const MAX_ORPHAN_PEERS: usize = 64;

/// Per-peer negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    OfferSent,
    AnswerSent,
    Open,
    /// Connection failed, timed out or its channel closed. `connect` or a
    /// new offer starts over.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::OfferSent => "offer-sent",
            Self::AnswerSent => "answer-sent",
            Self::Open => "open",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Mutable part of a session. Only reachable through [`PeerSession::lock`].
pub struct SessionInner {
    pub state: SessionState,
    /// Generation of the installed connection. Events carrying any other
    /// generation belong to a discarded or never installed connection.
    pub generation: u64,
    last_reserved: u64,
    pub connection: Option<Arc<dyn PeerConnection>>,
    pub data_channel: Option<Arc<dyn DataChannel>>,
    pub remote_description_set: bool,
    pub pending_candidates: Vec<IceCandidate>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::New,
            generation: 0,
            last_reserved: 0,
            connection: None,
            data_channel: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.connection.is_some()
    }

    /// Reserve a generation number for a connection being built. It only
    /// becomes current once passed to [`install_connection`](Self::install_connection).
    pub fn reserve_generation(&mut self) -> u64 {
        self.last_reserved += 1;
        self.last_reserved
    }

    /// Install a fresh connection, returning the one it replaces.
    ///
    /// Channel, remote description flag and buffered candidates all belonged
    /// to the previous connection and are dropped.
    pub fn install_connection(
        &mut self,
        generation: u64,
        connection: Arc<dyn PeerConnection>,
    ) -> Option<Arc<dyn PeerConnection>> {
        self.generation = generation;
        self.data_channel = None;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.connection.replace(connection)
    }

    /// Drop the connection and channel and mark the session failed.
    pub fn fail(&mut self) -> Option<Arc<dyn PeerConnection>> {
        self.state = SessionState::Failed;
        self.data_channel = None;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.connection.take()
    }

    pub fn attach_data_channel(&mut self, channel: Arc<dyn DataChannel>) {
        self.data_channel = Some(channel);
        self.state = SessionState::Open;
    }

    pub fn open_channel(&self) -> Option<Arc<dyn DataChannel>> {
        match self.state {
            SessionState::Open => self.data_channel.clone(),
            _ => None,
        }
    }

    /// Queue a candidate until a remote description is applied. Returns
    /// false when the buffer is full and the candidate was dropped.
    pub fn buffer_candidate(&mut self, candidate: IceCandidate, limit: usize) -> bool {
        if self.pending_candidates.len() >= limit {
            return false;
        }
        self.pending_candidates.push(candidate);
        true
    }

    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }
}

pub struct PeerSession {
    peer_id: String,
    inner: Mutex<SessionInner>,
}

impl PeerSession {
    fn new(peer_id: String) -> Self {
        Self {
            peer_id,
            inner: Mutex::new(SessionInner::new()),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    orphans: Mutex<HashMap<String, Vec<IceCandidate>>>,
    max_pending_candidates: usize,
}

impl Registry {
    pub fn new(max_pending_candidates: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            orphans: Mutex::new(HashMap::new()),
            max_pending_candidates,
        }
    }

    pub fn max_pending_candidates(&self) -> usize {
        self.max_pending_candidates
    }

    /// Return the session for `peer_id`, creating it in `New` if absent.
    pub async fn get_or_create(&self, peer_id: &str) -> Arc<PeerSession> {
        if let Some(session) = self.sessions.read().await.get(peer_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(peer_id.to_string())
            .or_insert_with(|| {
                debug!(peer_id, "creating peer session");
                Arc::new(PeerSession::new(peer_id.to_string()))
            });
        Arc::clone(session)
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(peer_id).cloned()
    }

    /// Store an opened channel and move the session to `Open`.
    ///
    /// Ignored (returns false) when the session is gone or `generation` no
    /// longer matches its connection.
    pub async fn attach_data_channel(
        &self,
        peer_id: &str,
        generation: u64,
        channel: Arc<dyn DataChannel>,
    ) -> bool {
        let Some(session) = self.get(peer_id).await else {
            return false;
        };
        let mut inner = session.lock().await;
        if !inner.is_current(generation) {
            return false;
        }
        inner.attach_data_channel(channel);
        true
    }

    /// Hold a candidate for a peer we have no session with yet.
    pub async fn buffer_orphan_candidate(&self, peer_id: &str, candidate: IceCandidate) -> bool {
        let mut orphans = self.orphans.lock().await;
        if !orphans.contains_key(peer_id) && orphans.len() >= MAX_ORPHAN_PEERS {
            return false;
        }
        let queue = orphans.entry(peer_id.to_string()).or_default();
        if queue.len() >= self.max_pending_candidates {
            return false;
        }
        queue.push(candidate);
        true
    }

    pub async fn take_orphan_candidates(&self, peer_id: &str) -> Vec<IceCandidate> {
        self.orphans
            .lock()
            .await
            .remove(peer_id)
            .unwrap_or_default()
    }

    /// Peer ids and states, sorted by peer id.
    pub async fn snapshot(&self) -> Vec<(String, SessionState)> {
        let sessions: Vec<Arc<PeerSession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            out.push((session.peer_id().to_string(), session.state().await));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
