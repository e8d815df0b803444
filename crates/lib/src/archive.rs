//! Portable archives of deployment bundles.
//!
//! An archive is a gzip stream of one JSON envelope:
//!
//! ```json
//! { "format": "chainbuild-archive", "version": 1, "contentHash": "...", "bundle": { ... } }
//! ```
//!
//! The embedded hash is the bundle's content hash, so a restored bundle is
//! checked bit for bit against the one that was exported.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::bundle::DeploymentBundle;
use crate::consts::MAX_IMPORT_DEPTH;
use crate::util::hash::ContentHash;

pub const ARCHIVE_FORMAT: &str = "chainbuild-archive";
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("unsupported archive version {0} (this build reads version {ARCHIVE_VERSION})")]
  UnsupportedArchiveVersion(u64),

  #[error("corrupt archive: {0}")]
  CorruptArchive(String),

  #[error("failed to encode archive: {0}")]
  Encode(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
  format: &'static str,
  version: u32,
  content_hash: ContentHash,
  bundle: &'a DeploymentBundle,
}

/// Serialize `bundle` into a compressed archive.
pub fn export(bundle: &DeploymentBundle) -> Result<Vec<u8>, ArchiveError> {
  let envelope = Envelope {
    format: ARCHIVE_FORMAT,
    version: ARCHIVE_VERSION,
    content_hash: bundle.content_hash().map_err(|e| ArchiveError::Encode(e.to_string()))?,
    bundle,
  };
  let json = serde_json::to_vec(&envelope).map_err(|e| ArchiveError::Encode(e.to_string()))?;

  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder
    .write_all(&json)
    .map_err(|e| ArchiveError::Encode(e.to_string()))?;
  encoder.finish().map_err(|e| ArchiveError::Encode(e.to_string()))
}

/// Restore a bundle from an archive produced by [`export`].
pub fn import(bytes: &[u8]) -> Result<DeploymentBundle, ArchiveError> {
  let corrupt = |message: String| ArchiveError::CorruptArchive(message);

  let mut json = Vec::new();
  GzDecoder::new(bytes)
    .read_to_end(&mut json)
    .map_err(|e| corrupt(format!("not a gzip stream: {}", e)))?;

  let envelope: Value = serde_json::from_slice(&json).map_err(|e| corrupt(format!("invalid JSON: {}", e)))?;
  let Value::Object(mut envelope) = envelope else {
    return Err(corrupt("envelope is not an object".into()));
  };

  match envelope.get("format") {
    Some(Value::String(format)) if format == ARCHIVE_FORMAT => {}
    Some(other) => return Err(corrupt(format!("unexpected format tag {}", other))),
    None => return Err(corrupt("missing format".into())),
  }

  let version = envelope
    .get("version")
    .and_then(Value::as_u64)
    .ok_or_else(|| corrupt("missing version".into()))?;
  if version != u64::from(ARCHIVE_VERSION) {
    return Err(ArchiveError::UnsupportedArchiveVersion(version));
  }

  let expected: ContentHash = envelope
    .get("contentHash")
    .and_then(Value::as_str)
    .ok_or_else(|| corrupt("missing contentHash".into()))?
    .parse()
    .map_err(|e| corrupt(format!("{}", e)))?;

  let bundle = envelope.remove("bundle").ok_or_else(|| corrupt("missing bundle".into()))?;
  let bundle: DeploymentBundle =
    serde_json::from_value(bundle).map_err(|e| corrupt(format!("invalid bundle: {}", e)))?;

  let actual = bundle
    .content_hash()
    .map_err(|e| corrupt(format!("bundle cannot be hashed: {}", e)))?;
  if actual != expected {
    return Err(corrupt(format!("content hash mismatch: expected {}, got {}", expected, actual)));
  }

  let depth = bundle.artifacts().import_depth();
  if depth > MAX_IMPORT_DEPTH {
    return Err(corrupt(format!(
      "imports nest {} levels deep, at most {} are allowed",
      depth, MAX_IMPORT_DEPTH
    )));
  }

  Ok(bundle)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::nested_bundle;
  use serde_json::json;

  fn gzip(value: &Value) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(value.to_string().as_bytes()).unwrap();
    encoder.finish().unwrap()
  }

  fn envelope_of(bundle: &DeploymentBundle) -> Value {
    json!({
      "format": ARCHIVE_FORMAT,
      "version": ARCHIVE_VERSION,
      "contentHash": bundle.content_hash().unwrap(),
      "bundle": bundle,
    })
  }

  #[test]
  fn round_trip_is_exact() {
    let bundle = nested_bundle("pkg", 3);
    let restored = import(&export(&bundle).unwrap()).unwrap();
    assert_eq!(restored, bundle);
    assert_eq!(restored.to_bytes().unwrap(), bundle.to_bytes().unwrap());
  }

  #[test]
  fn empty_bundle_round_trips() {
    let mut bundle = nested_bundle("pkg", 0);
    bundle.state.clear();
    bundle.definition.nodes.clear();
    assert_eq!(import(&export(&bundle).unwrap()).unwrap(), bundle);
  }

  #[test]
  fn maximum_nesting_is_accepted_and_beyond_rejected() {
    // The root step's own artifacts add no level; imports do.
    let deepest = nested_bundle("pkg", MAX_IMPORT_DEPTH);
    assert!(import(&export(&deepest).unwrap()).is_ok());

    let too_deep = nested_bundle("pkg", MAX_IMPORT_DEPTH + 1);
    let err = import(&export(&too_deep).unwrap()).unwrap_err();
    assert!(matches!(err, ArchiveError::CorruptArchive(msg) if msg.contains("levels deep")));
  }

  #[test]
  fn rejects_unknown_versions() {
    let bundle = nested_bundle("pkg", 0);
    let mut envelope = envelope_of(&bundle);
    envelope["version"] = json!(2);
    assert!(matches!(
      import(&gzip(&envelope)),
      Err(ArchiveError::UnsupportedArchiveVersion(2))
    ));
  }

  #[test]
  fn rejects_damaged_archives() {
    let bundle = nested_bundle("pkg", 0);

    assert!(matches!(import(b"plain text"), Err(ArchiveError::CorruptArchive(_))));

    let mut truncated = export(&bundle).unwrap();
    truncated.truncate(truncated.len() / 2);
    assert!(matches!(import(&truncated), Err(ArchiveError::CorruptArchive(_))));

    let mut wrong_format = envelope_of(&bundle);
    wrong_format["format"] = json!("tarball");
    assert!(matches!(import(&gzip(&wrong_format)), Err(ArchiveError::CorruptArchive(_))));

    let mut missing = envelope_of(&bundle);
    missing.as_object_mut().unwrap().remove("bundle");
    assert!(matches!(import(&gzip(&missing)), Err(ArchiveError::CorruptArchive(msg)) if msg.contains("missing bundle")));

    let mut tampered = envelope_of(&bundle);
    tampered["bundle"]["meta"]["timestamp"] = json!(1);
    assert!(matches!(import(&gzip(&tampered)), Err(ArchiveError::CorruptArchive(msg)) if msg.contains("mismatch")));
  }
}
