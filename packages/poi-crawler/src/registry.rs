//! Named sessions running as background tasks.
//!
//! Each running session is driven by its own tokio task that owns the
//! controller; the registry only keeps a pause token, the task handle and a
//! watch channel with the latest snapshot. Paused or finished controllers are
//! parked in the registry until resumed or removed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::session::{SessionController, SessionDeps, StepOutcome};
use crate::types::{PoiRecord, SessionId, SessionStatus, SessionSummary};

/// Point-in-time view of a session, published after every step.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub summary: SessionSummary,
    pub results: Vec<PoiRecord>,
}

impl SessionSnapshot {
    fn of(controller: &SessionController) -> Self {
        Self {
            summary: controller.summary(),
            results: controller.results(),
        }
    }
}

struct SessionEntry {
    snapshot: watch::Receiver<SessionSnapshot>,
    pause: CancellationToken,
    task: Option<JoinHandle<SessionController>>,
    /// Present while the session is not running
    parked: Option<SessionController>,
}

impl SessionEntry {
    fn current(&self) -> SessionSnapshot {
        match &self.parked {
            Some(controller) => SessionSnapshot::of(controller),
            None => self.snapshot.borrow().clone(),
        }
    }
}

pub struct SessionRegistry {
    deps: SessionDeps,
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a new session in the background.
    pub async fn start(&self, seed_url: &str, config: SessionConfig) -> Result<SessionId> {
        let controller = SessionController::start(seed_url, config, self.deps.clone()).await?;
        let id = controller.session_id();

        self.sessions.lock().await.insert(id, spawn(controller));
        Ok(id)
    }

    /// Pause a running session and wait until its current step is done and
    /// checkpointed.
    pub async fn pause(&self, id: SessionId) -> Result<SessionSummary> {
        let task = {
            let mut sessions = self.sessions.lock().await;
            let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
            entry.pause.cancel();
            entry.task.take()
        };

        let Some(task) = task else {
            // Parked: pause directly so the transition is validated
            let mut sessions = self.sessions.lock().await;
            let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
            let controller = entry.parked.as_mut().ok_or(SessionError::NotFound(id))?;
            controller.pause().await?;
            return Ok(controller.summary());
        };

        let controller = join(task).await?;
        let status = controller.status();
        let summary = controller.summary();
        self.park(id, controller).await;

        if status != SessionStatus::Paused {
            return Err(SessionError::InvalidTransition {
                from: status,
                to: SessionStatus::Paused,
            });
        }
        tracing::info!(session_id = %id, pages_visited = summary.pages_visited, "Session paused");
        Ok(summary)
    }

    /// Resume a paused session. Sessions unknown to this registry are
    /// loaded from the checkpoint store.
    pub async fn resume(&self, id: SessionId) -> Result<()> {
        let mut sessions = self.sessions.lock().await;

        let mut controller = match sessions.get_mut(&id) {
            Some(entry) if entry.task.is_some() => return Err(SessionError::AlreadyRunning(id)),
            Some(entry) => entry.parked.take().ok_or(SessionError::NotFound(id))?,
            None => {
                let state = self
                    .deps
                    .store
                    .load(id)
                    .await?
                    .ok_or(SessionError::NotFound(id))?;
                SessionController::restore(state, self.deps.clone())?
            }
        };

        // A checkpoint taken mid-run (crash) is still `Running` and just
        // continues.
        if controller.status() != SessionStatus::Running {
            if let Err(e) = controller.resume() {
                let entry = sessions.entry(id).or_insert_with(|| parked_entry(&controller));
                entry.parked = Some(controller);
                return Err(e);
            }
        }

        tracing::info!(session_id = %id, "Session resumed");
        sessions.insert(id, spawn(controller));
        Ok(())
    }

    /// Latest status of a session, from memory or its checkpoint.
    pub async fn status(&self, id: SessionId) -> Result<SessionSummary> {
        if let Some(entry) = self.sessions.lock().await.get(&id) {
            return Ok(entry.current().summary);
        }
        self.load_snapshot(id).await.map(|s| s.summary)
    }

    /// POIs accumulated so far. Partial results are returned for sessions
    /// in any state.
    pub async fn results(&self, id: SessionId) -> Result<Vec<PoiRecord>> {
        if let Some(entry) = self.sessions.lock().await.get(&id) {
            return Ok(entry.current().results);
        }
        self.load_snapshot(id).await.map(|s| s.results)
    }

    /// Wait until the session pauses or reaches a terminal state.
    pub async fn wait(&self, id: SessionId) -> Result<SessionSummary> {
        let task = {
            let mut sessions = self.sessions.lock().await;
            let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
            match entry.task.take() {
                Some(task) => task,
                None => return Ok(entry.current().summary),
            }
        };

        let controller = join(task).await?;
        let summary = controller.summary();
        self.park(id, controller).await;
        Ok(summary)
    }

    /// Stop the session if running, forget it and delete its checkpoint.
    pub async fn remove(&self, id: SessionId) -> Result<()> {
        let entry = self.sessions.lock().await.remove(&id);
        if let Some(mut entry) = entry {
            entry.pause.cancel();
            if let Some(task) = entry.task.take() {
                join(task).await?;
            }
        }

        self.deps.store.delete(id).await?;
        tracing::info!(session_id = %id, "Session removed");
        Ok(())
    }

    /// Summaries of all sessions held in memory.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|entry| entry.current().summary)
            .collect()
    }

    async fn park(&self, id: SessionId, controller: SessionController) {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(id).or_insert_with(|| parked_entry(&controller));
        entry.parked = Some(controller);
    }

    async fn load_snapshot(&self, id: SessionId) -> Result<SessionSnapshot> {
        let state = self
            .deps
            .store
            .load(id)
            .await?
            .ok_or(SessionError::NotFound(id))?;
        let controller = SessionController::restore(state, self.deps.clone())?;
        Ok(SessionSnapshot::of(&controller))
    }
}

fn parked_entry(controller: &SessionController) -> SessionEntry {
    let (_, snapshot) = watch::channel(SessionSnapshot::of(controller));
    SessionEntry {
        snapshot,
        pause: controller.pause_handle(),
        task: None,
        parked: None,
    }
}

fn spawn(mut controller: SessionController) -> SessionEntry {
    let (tx, snapshot) = watch::channel(SessionSnapshot::of(&controller));
    let pause = controller.pause_handle();

    let task = tokio::spawn(async move {
        loop {
            let outcome = controller.step().await;
            tx.send_replace(SessionSnapshot::of(&controller));
            if matches!(outcome, StepOutcome::Paused | StepOutcome::Finished(_)) {
                break;
            }
        }
        controller
    });

    SessionEntry {
        snapshot,
        pause,
        task: Some(task),
        parked: None,
    }
}

async fn join(task: JoinHandle<SessionController>) -> Result<SessionController> {
    task.await.map_err(|e| SessionError::Task(e.to_string()))
}
