/// SessionRegistry: process-wide `session id -> SessionState` map
///
/// `Arc<RwLock<HashMap<..>>>` plus a `tokio::spawn`'d periodic sweep,
/// following `other_examples/c206be7d_..._transcription.rs.rs`'s
/// `RealTimeTranscriptionManager` (background `interval` loop performing
/// maintenance over the session map).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::session::SessionState;

pub type SharedSession = Arc<Mutex<SessionState>>;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
        })
    }

    /// Spawn the background idle-eviction sweep. Call once after
    /// constructing the registry; the returned handle may be aborted on
    /// process shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    pub async fn create(&self, session: SessionState) -> (Uuid, SharedSession) {
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, Arc::clone(&handle));
        debug!("registered session {id}");
        (id, handle)
    }

    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Destroy is atomic with respect to in-flight holders: callers that
    /// already took a reference via `get` keep a valid `Arc` until they
    /// drop it; removal here only affects new lookups (spec §4.5).
    pub async fn destroy(&self, id: Uuid) {
        if self.sessions.write().await.remove(&id).is_some() {
            debug!("destroyed session {id}");
        }
    }

    /// Idempotent: removes entries whose last activity predates `idle_ttl`.
    pub async fn sweep(&self) {
        let expired: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            let mut expired = Vec::new();
            for (id, handle) in sessions.iter() {
                let idle_for = handle.lock().await.idle_for();
                if idle_for >= self.idle_ttl {
                    expired.push(*id);
                }
            }
            expired
        };

        if expired.is_empty() {
            return;
        }

        let mut sessions = self.sessions.write().await;
        for id in &expired {
            sessions.remove(id);
        }
        info!("swept {} idle session(s)", expired.len());
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> SessionState {
        SessionState::new(30 * 16_000 * 2, 5 * 16_000 * 2, 224)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = SessionRegistry::new(Duration::from_secs(1800));
        let (id, _) = registry.create(new_session()).await;
        assert!(registry.get(id).await.is_some());
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_none() {
        let registry = SessionRegistry::new(Duration::from_secs(1800));
        assert!(registry.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_destroy_removes_session() {
        let registry = SessionRegistry::new(Duration::from_secs(1800));
        let (id, _) = registry.create(new_session()).await;
        registry.destroy(id).await;
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_millis(10));
        let (id, _) = registry.create(new_session()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.sweep().await;
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(1800));
        let (id, _) = registry.create(new_session()).await;
        registry.sweep().await;
        assert!(registry.get(id).await.is_some());
    }
}
