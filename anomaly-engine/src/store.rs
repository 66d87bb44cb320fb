// Model Store
//
// Persists a trained forest as a versioned JSON artifact at a single path.
// Saves go through a temporary sibling file and a rename, so a failed save
// leaves the previous artifact untouched. There is no schema migration: a
// version mismatch means the model has to be retrained.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::forest::IsolationForest;

/// Version of the on-disk artifact layout
pub const SCHEMA_VERSION: u32 = 1;

/// File name used when the store sits next to the executable
pub const DEFAULT_MODEL_FILE: &str = "isolation_forest_model.json";

#[derive(Serialize)]
struct ArtifactOut<'a> {
    schema_version: u32,
    #[serde(flatten)]
    forest: &'a IsolationForest,
}

#[derive(Deserialize)]
struct ArtifactIn {
    #[serde(flatten)]
    forest: IsolationForest,
}

#[derive(Deserialize)]
struct ArtifactHeader {
    schema_version: u32,
}

/// File-backed store for a single trained forest
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store located next to the running executable
    pub fn default_location() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory")
        })?;
        Ok(Self::new(dir.join(DEFAULT_MODEL_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace any stored artifact with `forest`
    pub fn save(&self, forest: &IsolationForest) -> Result<()> {
        let artifact = ArtifactOut {
            schema_version: SCHEMA_VERSION,
            forest,
        };
        let bytes = serde_json::to_vec(&artifact)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.temp_path();
        if let Err(e) = write_synced(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(
            "💾 Model saved to {} ({} bytes, {} trees)",
            self.path.display(),
            bytes.len(),
            forest.trees().len()
        );
        Ok(())
    }

    /// Load the stored forest; `Ok(None)` when nothing has been saved yet
    pub fn load(&self) -> Result<Option<IsolationForest>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No model artifact at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let header: ArtifactHeader = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::CorruptModel(e.to_string()))?;
        if header.schema_version != SCHEMA_VERSION {
            warn!(
                "Model at {} uses schema {}, expected {}",
                self.path.display(),
                header.schema_version,
                SCHEMA_VERSION
            );
            return Err(EngineError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: header.schema_version,
            });
        }

        let artifact: ArtifactIn = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::CorruptModel(e.to_string()))?;
        artifact.forest.validate()?;

        debug!(
            "Model loaded from {} ({} trees)",
            self.path.display(),
            artifact.forest.trees().len()
        );
        Ok(Some(artifact.forest))
    }

    /// Delete the stored artifact; returns whether one existed
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string());
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
