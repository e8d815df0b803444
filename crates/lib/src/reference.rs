//! Package references.
//!
//! A package is addressed as `name[:version][@preset][/chainId]`:
//!
//! ```text
//! greeter                    -> greeter:latest@main/<default chain>
//! greeter:1.2.0@canary/10    -> greeter:1.2.0@canary/10
//! ```
//!
//! Parsing is pure. `Display` renders the normalized form with every part
//! present, so `parse(r.to_string()) == r` for every parsed `r`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CHAIN_ID, DEFAULT_PRESET, DEFAULT_VERSION};

const MAX_NAME_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
  #[error("malformed reference {input:?}: {reason}")]
  MalformedReference { input: String, reason: String },
}

impl ReferenceError {
  fn malformed(input: &str, reason: impl Into<String>) -> Self {
    ReferenceError::MalformedReference {
      input: input.to_string(),
      reason: reason.into(),
    }
  }
}

/// Structured identity of a published package on one chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageReference {
  pub name: String,
  pub version: String,
  pub preset: String,
  pub chain_id: u64,
}

impl PackageReference {
  /// Build a reference from already-validated parts.
  pub fn new(
    name: impl Into<String>,
    version: impl Into<String>,
    preset: impl Into<String>,
    chain_id: u64,
  ) -> Result<Self, ReferenceError> {
    let reference = Self {
      name: name.into(),
      version: version.into(),
      preset: preset.into(),
      chain_id,
    };
    let rendered = reference.to_string();
    validate_name(&reference.name).map_err(|r| ReferenceError::malformed(&rendered, r))?;
    validate_version(&reference.version).map_err(|r| ReferenceError::malformed(&rendered, r))?;
    validate_preset(&reference.preset).map_err(|r| ReferenceError::malformed(&rendered, r))?;
    Ok(reference)
  }

  /// Parse with [`DEFAULT_CHAIN_ID`] as the contextual chain id.
  pub fn parse(input: &str) -> Result<Self, ReferenceError> {
    Self::parse_with_chain_id(input, DEFAULT_CHAIN_ID)
  }

  /// Parse, using `default_chain_id` when the reference has no `/chainId` suffix.
  pub fn parse_with_chain_id(input: &str, default_chain_id: u64) -> Result<Self, ReferenceError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
      return Err(ReferenceError::malformed(input, "empty reference"));
    }

    let (body, chain_id) = match trimmed.rsplit_once('/') {
      Some((body, chain)) => (body, parse_chain_id(chain).map_err(|r| ReferenceError::malformed(input, r))?),
      None => (trimmed, default_chain_id),
    };

    let (body, preset) = match body.split_once('@') {
      Some((body, preset)) => (body, preset),
      None => (body, DEFAULT_PRESET),
    };

    let (name, version) = match body.split_once(':') {
      Some((name, version)) => (name, version),
      None => (body, DEFAULT_VERSION),
    };

    validate_name(name).map_err(|r| ReferenceError::malformed(input, r))?;
    validate_version(version).map_err(|r| ReferenceError::malformed(input, r))?;
    validate_preset(preset).map_err(|r| ReferenceError::malformed(input, r))?;

    Ok(Self {
      name: name.to_string(),
      version: version.to_string(),
      preset: preset.to_string(),
      chain_id,
    })
  }

  /// `name:version@preset` without the chain id.
  pub fn package_ref(&self) -> String {
    format!("{}:{}@{}", self.name, self.version, self.preset)
  }

  /// Registry key: presets belong to the bundle, not the registry entry.
  pub fn registry_key(&self) -> String {
    format!("{}:{}/{}", self.name, self.version, self.chain_id)
  }

  /// Whether the version is the mutable `latest` tag.
  pub fn is_mutable(&self) -> bool {
    self.version == DEFAULT_VERSION
  }

  /// Same package and preset on another chain.
  pub fn on_chain(&self, chain_id: u64) -> Self {
    Self {
      chain_id,
      ..self.clone()
    }
  }
}

impl fmt::Display for PackageReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}@{}/{}", self.name, self.version, self.preset, self.chain_id)
  }
}

impl FromStr for PackageReference {
  type Err = ReferenceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

/// Split a `chainId-preset` or `chainId/preset` variant token.
pub fn parse_variant(variant: &str) -> Result<(u64, String), ReferenceError> {
  let Some(split) = variant.find(['-', '/']) else {
    return Err(ReferenceError::malformed(variant, "expected chainId-preset or chainId/preset"));
  };
  let (chain, preset) = (&variant[..split], &variant[split + 1..]);
  let chain_id = parse_chain_id(chain).map_err(|r| ReferenceError::malformed(variant, r))?;
  validate_preset(preset).map_err(|r| ReferenceError::malformed(variant, r))?;
  Ok((chain_id, preset.to_string()))
}

/// Render a `chainId-preset` variant token.
pub fn format_variant(chain_id: u64, preset: &str) -> String {
  format!("{}-{}", chain_id, preset)
}

fn parse_chain_id(s: &str) -> Result<u64, String> {
  if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
    return Err(format!("chain id {:?} is not numeric", s));
  }
  s.parse::<u64>().map_err(|_| format!("chain id {:?} is out of range", s))
}

/// `[a-z0-9][a-z0-9-]*`, at most 32 bytes.
pub fn validate_name(name: &str) -> Result<(), String> {
  if name.is_empty() {
    return Err("package name is empty".to_string());
  }
  if name.len() > MAX_NAME_LEN {
    return Err(format!("package name is longer than {} bytes", MAX_NAME_LEN));
  }
  if name.starts_with('-') {
    return Err("package name must start with a letter or digit".to_string());
  }
  if !name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-') {
    return Err(format!("package name {:?} may only contain a-z, 0-9 and '-'", name));
  }
  Ok(())
}

/// `[A-Za-z0-9._+-]+`, at most 32 bytes.
pub fn validate_version(version: &str) -> Result<(), String> {
  if version.is_empty() {
    return Err("version is empty".to_string());
  }
  if version.len() > MAX_VERSION_LEN {
    return Err(format!("version is longer than {} bytes", MAX_VERSION_LEN));
  }
  if !version
    .bytes()
    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'-'))
  {
    return Err(format!("version {:?} contains invalid characters", version));
  }
  Ok(())
}

/// `[a-z0-9_-]+`.
pub fn validate_preset(preset: &str) -> Result<(), String> {
  if preset.is_empty() {
    return Err("preset is empty".to_string());
  }
  if !preset
    .bytes()
    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
  {
    return Err(format!("preset {:?} may only contain a-z, 0-9, '_' and '-'", preset));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn parse_full_reference() {
    let r = PackageReference::parse("foo:1.0.0@bar/10").unwrap();
    assert_eq!(r.name, "foo");
    assert_eq!(r.version, "1.0.0");
    assert_eq!(r.preset, "bar");
    assert_eq!(r.chain_id, 10);
  }

  #[test]
  fn parse_applies_defaults() {
    let r = PackageReference::parse("foo").unwrap();
    assert_eq!(r.version, "latest");
    assert_eq!(r.preset, "main");
    assert_eq!(r.chain_id, DEFAULT_CHAIN_ID);

    let r = PackageReference::parse_with_chain_id("foo@canary", 5).unwrap();
    assert_eq!(r.version, "latest");
    assert_eq!(r.preset, "canary");
    assert_eq!(r.chain_id, 5);
  }

  #[test]
  fn parse_rejects_malformed_input() {
    for input in [
      "",
      "Foo",
      "-foo",
      "foo:",
      "foo@",
      "foo/",
      "foo/abc",
      "foo/-1",
      "foo/99999999999999999999999",
      "foo:1.0@bar@baz",
      "foo:1:2",
      "foo bar",
      "foo:1.0/10/11",
      "a-very-long-package-name-exceeding-limits",
    ] {
      let err = PackageReference::parse(input);
      assert!(
        matches!(err, Err(ReferenceError::MalformedReference { .. })),
        "{input:?} should be rejected"
      );
    }
  }

  #[test]
  fn display_is_normalized() {
    let r = PackageReference::parse("foo@bar").unwrap();
    assert_eq!(r.to_string(), format!("foo:latest@bar/{}", DEFAULT_CHAIN_ID));
    assert_eq!(r.package_ref(), "foo:latest@bar");
    assert_eq!(r.registry_key(), format!("foo:latest/{}", DEFAULT_CHAIN_ID));
    assert!(r.is_mutable());
  }

  #[test]
  fn parse_variant_accepts_both_separators() {
    assert_eq!(parse_variant("10-main").unwrap(), (10, "main".to_string()));
    assert_eq!(parse_variant("10/canary-2").unwrap(), (10, "canary-2".to_string()));
    assert_eq!(format_variant(10, "main"), "10-main");
  }

  #[test]
  fn parse_variant_rejects_malformed_input() {
    for input in ["main", "x-main", "10-", "-main", "10-Main"] {
      assert!(parse_variant(input).is_err(), "{input:?} should be rejected");
    }
  }

  #[test]
  fn new_validates_parts() {
    assert!(PackageReference::new("foo", "1.0.0", "main", 1).is_ok());
    assert!(PackageReference::new("Foo", "1.0.0", "main", 1).is_err());
    assert!(PackageReference::new("foo", "", "main", 1).is_err());
  }

  fn reference_strategy() -> impl Strategy<Value = PackageReference> {
    (
      "[a-z0-9][a-z0-9-]{0,20}",
      "[A-Za-z0-9._+-]{1,16}",
      "[a-z0-9_-]{1,12}",
      any::<u64>(),
    )
      .prop_map(|(name, version, preset, chain_id)| PackageReference {
        name,
        version,
        preset,
        chain_id,
      })
  }

  proptest! {
    #[test]
    fn display_then_parse_round_trips(r in reference_strategy()) {
      let parsed = PackageReference::parse(&r.to_string()).unwrap();
      prop_assert_eq!(parsed, r);
    }

    #[test]
    fn parse_output_is_normalized(
      name in "[a-z0-9][a-z0-9-]{0,20}",
      version in proptest::option::of("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}"),
      preset in proptest::option::of("[a-z0-9_-]{1,8}"),
      chain in proptest::option::of(any::<u32>()),
    ) {
      let mut input = name.clone();
      if let Some(v) = &version { input.push(':'); input.push_str(v); }
      if let Some(p) = &preset { input.push('@'); input.push_str(p); }
      if let Some(c) = chain { input.push('/'); input.push_str(&c.to_string()); }

      let parsed = PackageReference::parse(&input).unwrap();
      let expected = format!(
        "{}:{}@{}/{}",
        name,
        version.as_deref().unwrap_or(DEFAULT_VERSION),
        preset.as_deref().unwrap_or(DEFAULT_PRESET),
        chain.map(u64::from).unwrap_or(DEFAULT_CHAIN_ID),
      );
      prop_assert_eq!(parsed.to_string(), expected);
    }
  }
}
