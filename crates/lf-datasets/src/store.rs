//! Content-addressed dataset storage.
//!
//! Layout under a project's data root:
//!
//! ```text
//! lf_data/datasets/<dataset>/
//!   raw/<hash>                          content-addressed blob
//!   meta/<hash>.json                    sidecar metadata
//!   index/by_name/<resolved_filename>   symlink to ../../raw/<hash>
//!   stores/                             vector store state
//! ```
//!
//! Filename collisions are resolved by appending an epoch timestamp to the
//! stem, e.g. `report.pdf` → `report_1719852800.pdf`.  The blob write uses
//! a temp file plus atomic rename; writes across the three files are not
//! transactional.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use lf_domain::paths::{safe_join, upload_basename};
use lf_domain::{Error, Result};

pub const DATA_DIR_NAME: &str = "lf_data";

/// Sidecar metadata stored next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    pub original_filename: String,
    pub resolved_filename: String,
    /// Upload time, seconds since the epoch.
    pub timestamp: i64,
    pub size: usize,
    pub mime_type: String,
    pub hash: String,
}

/// An incoming upload: name, declared MIME type, bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Content-addressed blob store for one project.
pub struct DatasetStore {
    project_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Root of all datasets for this project.
    pub fn datasets_dir(&self) -> PathBuf {
        self.project_dir.join(DATA_DIR_NAME).join("datasets")
    }

    /// Validated directory for one dataset, with the standard subtree
    /// created.  The dataset name is user input and goes through
    /// `safe_join`.
    pub fn ensure_dataset_dir(&self, dataset: &str) -> Result<PathBuf> {
        let dir = safe_join(&self.datasets_dir(), dataset)?;
        std::fs::create_dir_all(dir.join("raw"))?;
        std::fs::create_dir_all(dir.join("meta"))?;
        std::fs::create_dir_all(dir.join("stores"))?;
        std::fs::create_dir_all(dir.join("index").join("by_name"))?;
        Ok(dir)
    }

    pub fn raw_dir(&self, dataset: &str) -> Result<PathBuf> {
        Ok(self.ensure_dataset_dir(dataset)?.join("raw"))
    }

    pub fn stores_dir(&self, dataset: &str) -> Result<PathBuf> {
        Ok(self.ensure_dataset_dir(dataset)?.join("stores"))
    }

    /// SHA-256 content hash, hex encoded.
    pub fn hash_data(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Append an epoch suffix to a filename's stem.
    fn resolved_filename(filename: &str) -> String {
        let epoch = Utc::now().timestamp();
        match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{epoch}.{ext}"),
            _ => format!("{filename}_{epoch}"),
        }
    }

    // ── put ─────────────────────────────────────────────────────────

    /// Store an upload: hash the bytes, write the blob (atomic rename),
    /// write the sidecar, link the resolved name into the index.
    pub fn put(&self, dataset: &str, upload: &Upload) -> Result<FileMetadata> {
        let dir = self.ensure_dataset_dir(dataset)?;

        let hash = Self::hash_data(&upload.data);

        // Folder uploads arrive with embedded directories; keep only the
        // basename so the index stays flat.
        let base_filename = upload_basename(&upload.filename);
        safe_join(&dir.join("index").join("by_name"), &base_filename)?;
        let resolved = Self::resolved_filename(&base_filename);

        let mime_type = match upload.content_type.as_deref() {
            Some(ct) if ct != "application/octet-stream" => ct.to_owned(),
            _ => guess_mime_type(&base_filename).to_owned(),
        };

        let metadata = FileMetadata {
            original_filename: base_filename,
            resolved_filename: resolved.clone(),
            timestamp: Utc::now().timestamp(),
            size: upload.data.len(),
            mime_type,
            hash: hash.clone(),
        };

        // Blob first, atomically: a temp file in the same directory so the
        // rename stays on one filesystem.
        let raw_path = dir.join("raw").join(&hash);
        let mut tmp = tempfile::NamedTempFile::new_in(dir.join("raw"))?;
        tmp.write_all(&upload.data)?;
        tmp.flush()?;
        tmp.persist(&raw_path)
            .map_err(|e| Error::Internal(format!("persisting blob: {e}")))?;

        // Sidecar.
        let meta_path = dir.join("meta").join(format!("{hash}.json"));
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&metadata)?)?;

        // Name index: a relative symlink so the dataset directory stays
        // relocatable.
        let index_path = dir.join("index").join("by_name").join(&resolved);
        let target = Path::new("..").join("..").join("raw").join(&hash);
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &index_path)?;
        #[cfg(not(unix))]
        std::fs::write(&index_path, target.to_string_lossy().as_bytes())?;

        tracing::info!(
            dataset,
            hash = %metadata.hash,
            original = %metadata.original_filename,
            resolved = %metadata.resolved_filename,
            size = metadata.size,
            "stored dataset file"
        );
        Ok(metadata)
    }

    // ── get ─────────────────────────────────────────────────────────

    /// Read the sidecar for a hash.  `None` when the file is unknown.
    pub fn get_metadata(&self, dataset: &str, hash: &str) -> Result<Option<FileMetadata>> {
        let dir = self.ensure_dataset_dir(dataset)?;
        let meta_path = safe_join(&dir.join("meta"), &format!("{hash}.json"))?;
        match std::fs::read_to_string(&meta_path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute path of a blob, validated against the raw directory.
    pub fn raw_path(&self, dataset: &str, hash: &str) -> Result<PathBuf> {
        let dir = self.ensure_dataset_dir(dataset)?;
        safe_join(&dir.join("raw"), hash)
    }

    /// Read blob contents by hash.
    pub fn read(&self, dataset: &str, hash: &str) -> Result<Vec<u8>> {
        let path = self.raw_path(dataset, hash)?;
        std::fs::read(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("file {hash} in dataset {dataset}"))
                }
                _ => e.into(),
            })
    }

    /// All file metadata in a dataset, newest first.
    pub fn list(&self, dataset: &str) -> Result<Vec<FileMetadata>> {
        let dir = self.ensure_dataset_dir(dataset)?;
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir.join("meta"))? {
            let entry = entry?;
            let raw = std::fs::read_to_string(entry.path())?;
            match serde_json::from_str::<FileMetadata>(&raw) {
                Ok(meta) => out.push(meta),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e,
                        "skipping malformed sidecar");
                }
            }
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    // ── delete ──────────────────────────────────────────────────────

    /// Delete a file: symlink first, then blob, then sidecar.  A failure
    /// after the symlink is removed leaves a known-inconsistent state that
    /// is surfaced, not rolled back.
    pub fn delete(&self, dataset: &str, hash: &str) -> Result<FileMetadata> {
        let dir = self.ensure_dataset_dir(dataset)?;
        let metadata = self
            .get_metadata(dataset, hash)?
            .ok_or_else(|| Error::NotFound(format!("file {hash} in dataset {dataset}")))?;

        let index_path = safe_join(
            &dir.join("index").join("by_name"),
            &metadata.resolved_filename,
        )?;
        remove_if_exists(&index_path)?;

        let raw_path = safe_join(&dir.join("raw"), hash)?;
        std::fs::remove_file(&raw_path)?;

        let meta_path = safe_join(&dir.join("meta"), &format!("{hash}.json"))?;
        std::fs::remove_file(&meta_path)?;

        tracing::info!(dataset, hash, "deleted dataset file");
        Ok(metadata)
    }

    /// Treat a path as hash-addressed iff it is inside this project's
    /// `raw/` tree for the given dataset.  Containment is component-wise,
    /// never a substring check.
    pub fn is_hash_addressed(&self, dataset: &str, path: &Path) -> bool {
        let raw = self.datasets_dir().join(dataset).join("raw");
        lf_domain::paths::is_within(&raw, path)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Minimal extension-based MIME guess for the formats the pipeline parses.
pub fn guess_mime_type(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) => match ext.as_str() {
            "txt" => "text/plain",
            "md" | "markdown" => "text/markdown",
            "csv" => "text/csv",
            "json" => "application/json",
            "pdf" => "application/pdf",
            "docx" => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            "html" | "htm" => "text/html",
            _ => "application/octet-stream",
        },
        None => "application/octet-stream",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
