use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::PsFileSession;
use crate::error::{Result, StreamError};

/// A session shared between its owner and the streamer thread.
///
/// The mutex keeps `tick` from running on two threads at once.
pub type SharedSession = Arc<Mutex<PsFileSession>>;

/// Thread-safe registry of streaming sessions, one per client.
///
/// Ids are 16 hex digits drawn from a per-manager counter.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a session and return its id with the shared handle.
    pub fn create(&self, session: PsFileSession) -> (String, SharedSession) {
        let id = format!("{:016X}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let ssrc = session.ssrc();
        let shared = Arc::new(Mutex::new(session));

        let mut sessions = self.sessions.write();
        sessions.insert(id.clone(), shared.clone());
        tracing::debug!(session_id = %id, ssrc, total_sessions = sessions.len(), "session created");

        (id, shared)
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session and return it.
    pub fn remove(&self, id: &str) -> Result<SharedSession> {
        let mut sessions = self.sessions.write();
        let removed = sessions
            .remove(id)
            .ok_or_else(|| StreamError::SessionNotFound(id.to_string()))?;
        tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session removed");
        Ok(removed)
    }

    /// Remove several sessions, returning how many existed.
    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let removed = ids.iter().filter(|id| sessions.remove(*id).is_some()).count();
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "batch session cleanup");
        }
        removed
    }

    /// Session ids in ascending order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of all sessions, ordered by id.
    pub fn sessions(&self) -> Vec<(String, SharedSession)> {
        let mut all: Vec<(String, SharedSession)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{Endpoints, SessionConfig};
    use crate::source::H264FileSource;
    use crate::transport::{Channel, TransportSink};
    use std::net::SocketAddr;
    use std::time::Duration;

    struct NullTransport;

    impl TransportSink for NullTransport {
        fn send(&mut self, _channel: Channel, payload: &[u8], _dest: SocketAddr) -> Result<usize> {
            Ok(payload.len())
        }

        fn recv_feedback(&mut self, _buf: &mut [u8]) -> Result<Option<usize>> {
            Ok(None)
        }
    }

    fn session() -> PsFileSession {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        PsFileSession::new(
            Box::new(H264FileSource::from_bytes(&[], Duration::from_millis(40))),
            Box::new(NullTransport),
            Endpoints::new(addr, addr),
            Arc::new(ManualClock::new(0)),
            SessionConfig::default(),
        )
    }

    #[test]
    fn ids_are_unique_per_manager() {
        let manager = SessionManager::new();
        let (a, _) = manager.create(session());
        let (b, _) = manager.create(session());
        assert_eq!(a, "0000000000000001");
        assert_eq!(b, "0000000000000002");
        assert_eq!(manager.ids(), vec![a.clone(), b.clone()]);

        let other = SessionManager::new();
        assert_eq!(other.create(session()).0, "0000000000000001");
    }

    #[test]
    fn get_and_remove() {
        let manager = SessionManager::new();
        let (id, shared) = manager.create(session());
        assert!(Arc::ptr_eq(&manager.get(&id).unwrap(), &shared));
        assert_eq!(manager.len(), 1);

        manager.remove(&id).unwrap();
        assert!(manager.is_empty());
        assert!(matches!(manager.remove(&id), Err(StreamError::SessionNotFound(_))));
    }

    #[test]
    fn batch_remove_counts_existing() {
        let manager = SessionManager::new();
        let (a, _) = manager.create(session());
        let removed = manager.remove_sessions(&[a, "FFFFFFFFFFFFFFFF".to_string()]);
        assert_eq!(removed, 1);
    }
}
