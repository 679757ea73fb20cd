//! On-disk session metadata store.
//!
//! Layout: `<root>/<session-id>/session.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::session::{Codec, SessionMetadata};

/// A session metadata record as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    /// Schema version.
    pub version: String,

    /// Session identifier.
    pub id: String,

    /// When the record was written (RFC 3339).
    pub saved_at: String,

    /// Codec the artifact was encoded with, if recording finished.
    #[serde(default)]
    pub codec: Option<Codec>,

    /// Recorded duration in seconds, excluding pauses.
    #[serde(default)]
    pub duration_secs: f64,

    pub metadata: SessionMetadata,
}

impl SavedSession {
    pub fn new(id: impl Into<String>, metadata: SessionMetadata) -> Self {
        Self {
            version: "1.0".to_string(),
            id: id.into(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            codec: None,
            duration_secs: 0.0,
            metadata,
        }
    }
}

/// Directory-backed store for [`SavedSession`] records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId { id: id.to_string() });
        }
        Ok(self.root.join(id).join("session.json"))
    }

    /// Write a session record, replacing any previous one with the same id.
    pub fn save(&self, session: &SavedSession) -> Result<PathBuf, StoreError> {
        let path = self.session_path(&session.id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(session).map_err(|e| StoreError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| StoreError::IoError {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(id = %session.id, path = %path.display(), "Session metadata saved");
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<SavedSession, StoreError> {
        let path = self.session_path(id)?;
        if !path.exists() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        let json = std::fs::read_to_string(&path).map_err(|e| StoreError::IoError {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| StoreError::ParseError { path, source: e })
    }

    /// Ids of every stored session, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::IoError {
            path: self.root.clone(),
            source: e,
        })?;
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join("session.json").exists())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Errors that can occur when reading or writing session records.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Invalid session id: {id:?}")]
    InvalidId { id: String },
}

impl From<StoreError> for lectern_common::LecternError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IoError { source, .. } => lectern_common::LecternError::Io(source),
            StoreError::ParseError { source, .. } => lectern_common::LecternError::Json(source),
            other => lectern_common::LecternError::session(other.to_string()),
        }
    }
}
