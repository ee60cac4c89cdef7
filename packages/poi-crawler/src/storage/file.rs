use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{PersistenceError, PersistenceResult};
use crate::traits::CheckpointStore;
use crate::types::{SessionId, SessionState};

/// One JSON file per session under a directory.
///
/// Saves go through `<file>.tmp`, are fsynced, then renamed over the previous
/// checkpoint, so a crash mid-write leaves the last good checkpoint in place.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &SessionState) -> PersistenceResult<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(state.session_id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;

        tracing::debug!(
            session_id = %state.session_id,
            path = %path.display(),
            bytes = json.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, session_id: SessionId) -> PersistenceResult<Option<SessionState>> {
        let path = self.path_for(session_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    async fn delete(&self, session_id: SessionId) -> PersistenceResult<()> {
        match fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    async fn list(&self) -> PersistenceResult<Vec<SessionId>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::Io(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<SessionId>() {
                ids.push(id);
            }
        }
        ids.sort_by_key(|id| id.0);
        Ok(ids)
    }
}
