//! Task fingerprints.
//!
//! A fingerprint covers a task's identity key, the current content of its
//! declared inputs and the fingerprints of its predecessors, so a change
//! anywhere upstream changes every fingerprint below it.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::hash::{ContentHash, ObjectHash};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl Fingerprint {
  /// Combine a task key with its input state and predecessor fingerprints.
  ///
  /// Inputs are hashed in path order and predecessors in fingerprint order,
  /// so declaration order does not matter. A missing input hashes as
  /// `missing`, which differs from any content hash.
  pub fn compute(key: &ObjectHash, inputs: &[(PathBuf, Option<ContentHash>)], deps: &[Fingerprint]) -> Self {
    let mut inputs: Vec<_> = inputs.iter().collect();
    inputs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut deps: Vec<_> = deps.iter().collect();
    deps.sort();

    let mut hasher = Sha256::new();
    hasher.update(b"key:");
    hasher.update(key.0.as_bytes());
    for (path, hash) in inputs {
      hasher.update(b"\nin:");
      hasher.update(path.to_string_lossy().as_bytes());
      hasher.update(b"=");
      match hash {
        Some(hash) => hasher.update(hash.0.as_bytes()),
        None => hasher.update(b"missing"),
      }
    }
    for dep in deps {
      hasher.update(b"\ndep:");
      hasher.update(dep.0.as_bytes());
    }

    Fingerprint(format!("{:x}", hasher.finalize()))
  }

  /// Abbreviated form for logs.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;

  fn key() -> ObjectHash {
    ObjectHash("0123456789abcdef0123".to_string())
  }

  #[test]
  fn order_independent() {
    let a = (PathBuf::from("a.c"), Some(hash_bytes(b"a")));
    let b = (PathBuf::from("b.c"), Some(hash_bytes(b"b")));
    let d1 = Fingerprint("d1".to_string());
    let d2 = Fingerprint("d2".to_string());

    assert_eq!(
      Fingerprint::compute(&key(), &[a.clone(), b.clone()], &[d1.clone(), d2.clone()]),
      Fingerprint::compute(&key(), &[b, a], &[d2, d1])
    );
  }

  #[test]
  fn changes_with_input_content_and_deps() {
    let v1 = (PathBuf::from("a.c"), Some(hash_bytes(b"v1")));
    let v2 = (PathBuf::from("a.c"), Some(hash_bytes(b"v2")));
    let missing = (PathBuf::from("a.c"), None);

    let base = Fingerprint::compute(&key(), std::slice::from_ref(&v1), &[]);
    assert_ne!(base, Fingerprint::compute(&key(), &[v2], &[]));
    assert_ne!(base, Fingerprint::compute(&key(), &[missing], &[]));
    assert_ne!(
      base,
      Fingerprint::compute(&key(), &[v1], &[Fingerprint("upstream".to_string())])
    );
  }

  #[test]
  fn full_length_hex() {
    let fp = Fingerprint::compute(&key(), &[], &[]);
    assert_eq!(fp.0.len(), 64);
    assert_eq!(fp.short().len(), 12);
  }
}
