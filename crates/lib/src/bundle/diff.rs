//! Differences between two bundles of the same package.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{ChainArtifacts, DeploymentBundle};

/// A contract whose address differs between the two bundles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressChange {
  pub contract: String,
  pub old: Option<String>,
  pub new: Option<String>,
}

/// Step-level difference from `old` to `new`.
///
/// Steps are compared by fingerprint: a step is `changed` when it exists in
/// both bundles with different fingerprints, even if its artifacts happen to
/// be equal.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BundleDiff {
  /// Steps only in the new bundle.
  pub added: Vec<String>,
  /// Steps only in the old bundle.
  pub removed: Vec<String>,
  pub changed: Vec<String>,
  pub unchanged: Vec<String>,
  /// Contracts (including those of imported packages, as `import.Name`)
  /// whose address moved, appeared or disappeared.
  pub addresses: Vec<AddressChange>,
  pub meta_changed: bool,
}

impl BundleDiff {
  /// Returns true if the bundles deploy the same thing.
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty() && self.addresses.is_empty()
  }
}

/// Compute the diff from `old` to `new`.
pub fn diff_bundles(old: &DeploymentBundle, new: &DeploymentBundle) -> BundleDiff {
  let mut diff = BundleDiff::default();

  for (key, state) in &new.state {
    match old.state.get(key) {
      None => diff.added.push(key.clone()),
      Some(prior) if prior.fingerprint == state.fingerprint => diff.unchanged.push(key.clone()),
      Some(_) => diff.changed.push(key.clone()),
    }
  }
  diff.removed = old
    .state
    .keys()
    .filter(|key| !new.state.contains_key(*key))
    .cloned()
    .collect();

  let old_addresses = contract_addresses(&old.artifacts());
  let new_addresses = contract_addresses(&new.artifacts());
  let mut names: Vec<&String> = old_addresses.keys().chain(new_addresses.keys()).collect();
  names.sort();
  names.dedup();
  for name in names {
    let old = old_addresses.get(name);
    let new = new_addresses.get(name);
    if old != new {
      diff.addresses.push(AddressChange {
        contract: name.clone(),
        old: old.cloned(),
        new: new.cloned(),
      });
    }
  }

  diff.meta_changed = old.meta != new.meta;
  diff
}

/// Contract name to address, with imported contracts under `import.Name`.
fn contract_addresses(artifacts: &ChainArtifacts) -> BTreeMap<String, String> {
  let mut addresses: BTreeMap<String, String> = artifacts
    .contracts
    .iter()
    .map(|(name, contract)| (name.clone(), contract.address.to_lowercase()))
    .collect();
  for (label, import) in &artifacts.imports {
    for (name, address) in contract_addresses(&import.artifacts) {
      addresses.insert(format!("{}.{}", label, name), address);
    }
  }
  addresses
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::{contract_data, nested_bundle};

  #[test]
  fn identical_bundles_have_no_diff() {
    let bundle = nested_bundle("pkg", 1);
    let diff = diff_bundles(&bundle, &bundle);
    assert!(diff.is_empty());
    assert!(!diff.meta_changed);
    assert_eq!(diff.unchanged, vec!["contract.Root"]);
  }

  #[test]
  fn reports_steps_and_moved_addresses() {
    let old = nested_bundle("pkg", 1);
    let mut new = old.clone();

    let root = new.state.get_mut("contract.Root").unwrap();
    root.fingerprint = hash_bytes(b"changed");
    root.artifacts.contracts.insert(
      "Root".into(),
      contract_data("Root", "0x00000000000000000000000000000000000000F1"),
    );
    root.artifacts.imports.clear();

    let mut added = new.state["contract.Root"].clone();
    added.node_key = "contract.Extra".into();
    added.artifacts = ChainArtifacts::default();
    added
      .artifacts
      .contracts
      .insert("Extra".into(), contract_data("Extra", "0x00000000000000000000000000000000000000e2"));
    new.state.insert("contract.Extra".into(), added);

    let diff = diff_bundles(&old, &new);
    assert_eq!(diff.added, vec!["contract.Extra"]);
    assert_eq!(diff.changed, vec!["contract.Root"]);
    assert!(diff.removed.is_empty());

    let moved: Vec<_> = diff.addresses.iter().map(|c| c.contract.as_str()).collect();
    assert_eq!(moved, vec!["Extra", "Root"]);
    assert_eq!(
      diff.addresses[1].new.as_deref(),
      Some("0x00000000000000000000000000000000000000f1")
    );
  }

  #[test]
  fn removed_steps_are_listed() {
    let old = nested_bundle("pkg", 0);
    let mut new = old.clone();
    new.state.clear();

    let diff = diff_bundles(&old, &new);
    assert_eq!(diff.removed, vec!["contract.Root"]);
    assert_eq!(diff.addresses[0].new, None);
  }
}
