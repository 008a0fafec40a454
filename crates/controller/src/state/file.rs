//! Single-node JSON file backend.
//!
//! The file is replaced atomically (write to a temp file, then rename) so
//! readers never see a partial write. Locks are no-ops since only one
//! process writes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

use sitefleet_common::NodeState;

use super::store::{LockLease, StateStore};
use super::StateError;

/// JSON file state store
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist_error(&self, source: std::io::Error) -> StateError {
        StateError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self) -> Result<Option<NodeState>, StateError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file found, starting empty");
                return Ok(None);
            }
            Err(e) => return Err(self.persist_error(e)),
        };

        if content.trim().is_empty() {
            info!(path = %self.path.display(), "State file is empty, starting empty");
            return Ok(None);
        }

        let state: NodeState = serde_json::from_str(&content)?;
        debug!(
            path = %self.path.display(),
            sites = state.sites.len(),
            certificates = state.certificates.len(),
            "Loaded state file"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &NodeState) -> Result<(), StateError> {
        let content = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.persist_error(e))?;
            }
        }

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| self.persist_error(e))?;

        // The state holds private keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| self.persist_error(e))?;
        }

        file.write_all(&content)
            .await
            .map_err(|e| self.persist_error(e))?;
        file.sync_all().await.map_err(|e| self.persist_error(e))?;
        drop(file);

        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.persist_error(e))?;

        trace!(path = %self.path.display(), bytes = content.len(), "Wrote state file");
        Ok(())
    }

    async fn acquire_lock(&self, name: &str, _timeout: Duration) -> Result<LockLease, StateError> {
        Ok(LockLease::noop(name))
    }

    async fn release_lock(&self, _lease: LockLease) -> Result<(), StateError> {
        Ok(())
    }

    async fn is_leader(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitefleet_common::SiteState;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "  \n").unwrap();

        let store = FileStore::new(path);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("state.json"));

        let mut state = NodeState::new();
        state.sites.push(SiteState::new("a.example"));
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        store.save(&NodeState::new()).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(StateError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_locks_are_noops() {
        let store = FileStore::new("/unused");
        let first = store.acquire_lock("state", Duration::ZERO).await.unwrap();
        let second = store.acquire_lock("state", Duration::ZERO).await.unwrap();
        assert_eq!(first, second);
        store.release_lock(first).await.unwrap();
        assert!(store.is_leader().await);
    }
}
