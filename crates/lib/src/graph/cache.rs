//! Persistent task cache.
//!
//! Maps task fingerprints to the outputs they produced, each with a validity
//! signature captured right after the task ran. A task whose fingerprint has a
//! record and whose outputs all still match their signatures is skipped.
//!
//! The store is a single versioned JSON file. Loading never fails: a missing
//! file is an empty cache, and an unreadable, corrupt or version-mismatched
//! file is logged and treated as empty. Saving writes a temporary file and
//! renames it over the store.
//!
//! Each task keeps at most one record: inserting a record drops older ones
//! for the same task key or for any of the same output paths.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::hash::{ContentHash, DirHashError, ObjectHash, hash_path};

use super::fingerprint::Fingerprint;

/// Current schema version. Bump when the store format changes.
pub const CACHE_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache io error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("failed to hash output: {0}")]
  Hash(#[from] DirHashError),
}

/// How output validity is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureMode {
  /// SHA-256 of the file or directory tree.
  #[default]
  Content,
  /// File size and modification time. Directories still hash content.
  Metadata,
}

impl FromStr for SignatureMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "content" => Ok(SignatureMode::Content),
      "metadata" => Ok(SignatureMode::Metadata),
      other => Err(format!("unknown signature mode '{other}'")),
    }
  }
}

/// Validity signature of one output path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputSignature {
  Content {
    hash: ContentHash,
  },
  Metadata {
    size: u64,
    modified_secs: u64,
    modified_nanos: u32,
  },
}

impl OutputSignature {
  /// Capture the signature of whatever is at `path`, or `None` if nothing is.
  pub fn capture(path: &Path, mode: SignatureMode) -> Result<Option<Self>, CacheError> {
    let meta = match fs::metadata(path) {
      Ok(meta) => meta,
      Err(_) => return Ok(None),
    };

    if mode == SignatureMode::Metadata && meta.is_file() {
      let modified = meta.modified().map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
      })?;
      let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
      return Ok(Some(OutputSignature::Metadata {
        size: meta.len(),
        modified_secs: since_epoch.as_secs(),
        modified_nanos: since_epoch.subsec_nanos(),
      }));
    }

    Ok(hash_path(path)?.map(|hash| OutputSignature::Content { hash }))
  }

  /// Check the signature against the current state of `path`.
  pub fn matches(&self, path: &Path) -> bool {
    let mode = match self {
      OutputSignature::Content { .. } => SignatureMode::Content,
      OutputSignature::Metadata { .. } => SignatureMode::Metadata,
    };
    match OutputSignature::capture(path, mode) {
      Ok(Some(current)) => &current == self,
      Ok(None) => false,
      Err(e) => {
        debug!(path = %path.display(), error = %e, "cannot check output signature");
        false
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
  pub path: PathBuf,
  pub signature: OutputSignature,
}

/// Outputs recorded for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
  /// Identity key of the task that produced the outputs.
  pub key: ObjectHash,
  /// Task name at the time of recording, for diagnostics only.
  pub task: String,
  pub outputs: Vec<OutputRecord>,
}

impl CacheRecord {
  /// Every recorded output still exists and matches its signature.
  pub fn is_valid(&self) -> bool {
    self.outputs.iter().all(|o| o.signature.matches(&o.path))
  }

  pub fn covers(&self, outputs: &[PathBuf]) -> bool {
    outputs.iter().all(|p| self.outputs.iter().any(|o| &o.path == p))
  }

  /// Same task, or at least one output path in common.
  fn supersedes(&self, older: &CacheRecord) -> bool {
    self.key == older.key || self.outputs.iter().any(|o| older.outputs.iter().any(|p| p.path == o.path))
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
  version: u32,
  records: BTreeMap<Fingerprint, CacheRecord>,
}

/// In-memory cache store bound to a file.
#[derive(Debug, Clone)]
pub struct CacheStore {
  path: PathBuf,
  records: BTreeMap<Fingerprint, CacheRecord>,
  dirty: bool,
}

impl CacheStore {
  /// An empty store that will save to `path`.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      records: BTreeMap::new(),
      dirty: false,
    }
  }

  /// Load the store at `path`, falling back to an empty store.
  pub fn load(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let data = match fs::read_to_string(&path) {
      Ok(data) => data,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no cache store, starting empty");
        return Self::new(path);
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "cannot read cache store, starting empty");
        return Self::new(path);
      }
    };

    let file: CacheFile = match serde_json::from_str(&data) {
      Ok(file) => file,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "cache store is corrupt, starting empty");
        return Self::new(path);
      }
    };

    if file.version != CACHE_VERSION {
      warn!(
        path = %path.display(),
        found = file.version,
        expected = CACHE_VERSION,
        "cache store version mismatch, starting empty"
      );
      return Self::new(path);
    }

    debug!(path = %path.display(), records = file.records.len(), "loaded cache store");
    Self {
      path,
      records: file.records,
      dirty: false,
    }
  }

  /// Write the store atomically (write to tmp, then rename).
  pub fn save(&mut self) -> Result<(), CacheError> {
    let io_err = |path: &Path| {
      let path = path.to_path_buf();
      move |source| CacheError::Io { path, source }
    };

    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let file = CacheFile {
      version: CACHE_VERSION,
      records: self.records.clone(),
    };
    let json = serde_json::to_string_pretty(&file)?;

    let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = self.path.with_file_name(tmp_name);

    fs::write(&tmp_path, json).map_err(io_err(&tmp_path))?;
    fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;

    self.dirty = false;
    debug!(path = %self.path.display(), records = self.records.len(), "saved cache store");
    Ok(())
  }

  /// Delete the store file. Missing files are fine.
  pub fn delete(&mut self) -> Result<(), CacheError> {
    self.records.clear();
    self.dirty = false;
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheError::Io {
        path: self.path.clone(),
        source,
      }),
    }
  }

  pub fn get(&self, fingerprint: &Fingerprint) -> Option<&CacheRecord> {
    self.records.get(fingerprint)
  }

  /// Record outputs for `fingerprint`, dropping records it supersedes.
  pub fn insert(&mut self, fingerprint: Fingerprint, record: CacheRecord) {
    let before = self.records.len();
    self.records.retain(|_, older| !record.supersedes(older));
    let dropped = before - self.records.len();
    if dropped > 0 {
      debug!(task = %record.task, dropped, "dropped superseded cache records");
    }
    self.records.insert(fingerprint, record);
    self.dirty = true;
  }

  pub fn records(&self) -> &BTreeMap<Fingerprint, CacheRecord> {
    &self.records
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Modified since the last load or save.
  pub fn is_dirty(&self) -> bool {
    self.dirty
  }
}
