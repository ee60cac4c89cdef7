use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{PersistenceError, PersistenceResult};
use crate::traits::CheckpointStore;
use crate::types::{SessionId, SessionState};

/// In-memory checkpoint store with a failure switch.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<SessionId, SessionState>>>,
    failing: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &SessionState) -> PersistenceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("store switched to failing".into()));
        }
        self.checkpoints
            .write()
            .await
            .insert(state.session_id, state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, session_id: SessionId) -> PersistenceResult<Option<SessionState>> {
        Ok(self.checkpoints.read().await.get(&session_id).cloned())
    }

    async fn delete(&self, session_id: SessionId) -> PersistenceResult<()> {
        self.checkpoints.write().await.remove(&session_id);
        Ok(())
    }

    async fn list(&self) -> PersistenceResult<Vec<SessionId>> {
        Ok(self.checkpoints.read().await.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::new_session_state;

    #[test]
    fn test_failure_switch() {
        let store = MemoryCheckpointStore::new();
        let state = new_session_state("https://example.com", SessionConfig::default()).unwrap();

        store.set_failing(true);
        assert!(tokio_test::block_on(store.save(&state)).is_err());
        assert!(tokio_test::block_on(store.load(state.session_id)).unwrap().is_none());

        store.set_failing(false);
        tokio_test::block_on(store.save(&state)).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(tokio_test::block_on(store.list()).unwrap(), vec![state.session_id]);
    }
}
