//! Project persistence
//!
//! A project is one [`DocumentState`] wrapped in a versioned JSON envelope.
//! [`Storage`] keeps projects under a data directory keyed by document id;
//! [`read_project`] and [`write_project`] work on explicit paths.

use directories::ProjectDirs;
use doc_model::{DocumentId, DocumentState};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const PROJECT_SCHEMA_VERSION: u32 = 1;

const PROJECT_EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("project schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("project {0} not found")]
    NotFound(DocumentId),
}

/// Confirmation of a completed save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveAck {
    pub id: DocumentId,
    pub path: PathBuf,
    pub bytes_written: usize,
}

/// Durable storage of document snapshots
pub trait PersistenceService {
    fn save(&self, state: &DocumentState) -> Result<SaveAck, StorageError>;
    fn load(&self, id: &DocumentId) -> Result<DocumentState, StorageError>;
}

#[derive(Debug, Clone, Serialize)]
struct ProjectEnvelope<'a> {
    version: u32,
    document: &'a DocumentState,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Debug, Deserialize)]
struct OwnedEnvelope {
    document: DocumentState,
}

/// Serialize a snapshot into its envelope.
pub fn encode_project(state: &DocumentState) -> Result<Vec<u8>, StorageError> {
    let envelope = ProjectEnvelope { version: PROJECT_SCHEMA_VERSION, document: state };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Parse an envelope, rejecting versions this build does not know.
pub fn decode_project(bytes: &[u8]) -> Result<DocumentState, StorageError> {
    let probe: VersionProbe = serde_json::from_slice(bytes)?;
    if probe.version > PROJECT_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedVersion {
            found: probe.version,
            supported: PROJECT_SCHEMA_VERSION,
        });
    }
    let envelope: OwnedEnvelope = serde_json::from_slice(bytes)?;
    Ok(envelope.document)
}

pub fn read_project(path: &Path) -> Result<DocumentState, StorageError> {
    decode_project(&fs::read(path)?)
}

/// Write through a sibling temp file so a failed write never truncates an
/// existing project.
pub fn write_project(path: &Path, state: &DocumentState) -> Result<usize, StorageError> {
    let bytes = encode_project(state)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, &bytes)?;
    fs::rename(&temp, path)?;
    Ok(bytes.len())
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("dev", "Pagemark", "Pagemark").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().join("projects") })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!("{id}.{PROJECT_EXTENSION}"))
    }

    /// Ids of all stored projects, sorted.
    pub fn list(&self) -> Result<Vec<DocumentId>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PROJECT_EXTENSION) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| uuid::Uuid::parse_str(stem).ok());
            if let Some(uuid) = parsed {
                ids.push(DocumentId(uuid));
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn delete(&self, id: &DocumentId) -> Result<(), StorageError> {
        let path = self.project_path(id);
        if !path.exists() {
            return Err(StorageError::NotFound(*id));
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

impl PersistenceService for Storage {
    fn save(&self, state: &DocumentState) -> Result<SaveAck, StorageError> {
        let path = self.project_path(&state.id);
        let bytes_written = write_project(&path, state)?;
        log::debug!("saved project {} ({bytes_written} bytes)", state.id);
        Ok(SaveAck { id: state.id, path, bytes_written })
    }

    fn load(&self, id: &DocumentId) -> Result<DocumentState, StorageError> {
        let path = self.project_path(id);
        if !path.exists() {
            return Err(StorageError::NotFound(*id));
        }
        read_project(&path)
    }
}
