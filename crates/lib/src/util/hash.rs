//! Hashing utilities for content addressing and fingerprints.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `Hashable`: canonical-JSON hashing for serializable values
//! - `FieldHasher`: length-prefixed hashing of labelled fields
//! - `hash_file()` / `hash_bytes()`

use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A full 64-character SHA-256 hash identifying content.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Abbreviated form for display.
  pub fn short(&self) -> &str {
    &self.0[..HASH_PREFIX_LEN]
  }

  /// Whether `s` is a well-formed hash (64 lowercase hex characters).
  pub fn is_valid(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
  }

  fn from_digest(digest: impl AsRef<[u8]>) -> Self {
    ContentHash(hex::encode(digest))
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash: {0:?}")]
pub struct InvalidHash(pub String);

impl FromStr for ContentHash {
  type Err = InvalidHash;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if Self::is_valid(s) {
      Ok(ContentHash(s.to_string()))
    } else {
      Err(InvalidHash(s.to_string()))
    }
  }
}

impl TryFrom<String> for ContentHash {
  type Error = InvalidHash;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    if Self::is_valid(&value) {
      Ok(ContentHash(value))
    } else {
      Err(InvalidHash(value))
    }
  }
}

impl From<ContentHash> for String {
  fn from(hash: ContentHash) -> Self {
    hash.0
  }
}

/// Canonical-JSON hashing.
///
/// Every map in this crate's serialized types is a `BTreeMap`, so the JSON
/// produced by `serde_json` has a stable key order and equal values hash
/// equally.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ContentHash, HashError> {
    let serialized = serde_json::to_vec(self)?;
    Ok(hash_bytes(&serialized))
  }
}

impl Hashable for serde_json::Value {}

/// Hashes a sequence of labelled fields.
///
/// Each field is written as `label`, its byte length, and its bytes, so no two
/// distinct field sequences share an encoding.
#[derive(Default)]
pub struct FieldHasher {
  inner: Sha256,
}

impl FieldHasher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn field(mut self, label: &str, value: impl AsRef<[u8]>) -> Self {
    let value = value.as_ref();
    self.inner.update(label.as_bytes());
    self.inner.update(b"\0");
    self.inner.update((value.len() as u64).to_le_bytes());
    self.inner.update(value);
    self
  }

  pub fn finish(self) -> ContentHash {
    ContentHash::from_digest(self.inner.finalize())
  }
}

/// Error reading a file for hashing.
#[derive(Debug, thiserror::Error)]
#[error("failed to read file {path}: {source}")]
pub struct FileHashError {
  pub path: String,
  #[source]
  pub source: std::io::Error,
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, FileHashError> {
  let wrap = |source| FileHashError {
    path: path.display().to_string(),
    source,
  };
  let mut file = fs::File::open(path).map_err(wrap)?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(wrap)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash::from_digest(hasher.finalize()))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::from_digest(Sha256::digest(data))
}
