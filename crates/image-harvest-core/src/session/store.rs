use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio::fs;

use super::models::SessionState;
use crate::error::{Error, Result};
use crate::logging::{log_file_error, log_fs_modification};

/// Name of the session file inside the target directory
pub const SESSION_FILE_NAME: &str = "download_session.json";

/// JSON file holding one [`SessionState`]
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store used for downloads into `target_dir`
    pub fn for_dir(target_dir: &Path) -> Self {
        Self::new(target_dir.join(SESSION_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read a prior session; `Ok(None)` when there is no session file
    pub async fn load(&self) -> Result<Option<SessionState>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                log_file_error(&self.path, "read session", &e);
                return Err(e.into());
            }
        };

        let state: SessionState = serde_json::from_str(&content).map_err(|e| {
            Error::Configuration(format!(
                "Corrupt session file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        info!(
            "Loaded session {} from {}",
            state.session_id,
            self.path.display()
        );
        Ok(Some(state))
    }

    /// Write the state through a temporary file so a crash never leaves half a file
    pub async fn save(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await.map_err(|e| {
            log_file_error(&tmp, "write session", &e);
            e
        })?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            "Session {} saved ({} of {} done)",
            state.session_id,
            state.cursor,
            state.urls.len()
        );
        Ok(())
    }

    /// Delete the session file; a missing file is not an error
    pub async fn cleanup(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                log_fs_modification("remove", &self.path, Some("session finished"));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                log_file_error(&self.path, "remove session", &e);
                Err(e.into())
            }
        }
    }
}
