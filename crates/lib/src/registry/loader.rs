use thiserror::Error;
use tracing::info;

use super::{PublishOutcome, RegistryError, RegistryResolver};
use crate::bundle::DeploymentBundle;
use crate::reference::{PackageReference, ReferenceError};
use crate::storage::{Storage, StorageError, StoragePointer};

#[derive(Debug, Error)]
pub enum LoadError {
  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Reference(#[from] ReferenceError),

  #[error("bundle {pointer} was built for chain {found}, expected {expected}")]
  ChainMismatch {
    pointer: String,
    expected: u64,
    found: u64,
  },
}

/// Resolves package references to bundles: registry lookup, then storage.
pub struct PackageLoader {
  resolver: RegistryResolver,
  storage: Storage,
}

impl PackageLoader {
  pub fn new(resolver: RegistryResolver, storage: Storage) -> Self {
    Self { resolver, storage }
  }

  pub fn resolver(&self) -> &RegistryResolver {
    &self.resolver
  }

  pub fn storage(&self) -> &Storage {
    &self.storage
  }

  pub async fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, LoadError> {
    Ok(self.resolver.resolve(reference).await?)
  }

  /// Resolve and fetch a published bundle.
  pub async fn load(&self, reference: &PackageReference) -> Result<(StoragePointer, DeploymentBundle), LoadError> {
    let pointer = self.resolve(reference).await?;
    let bytes = self.storage.get_pointer(&pointer).await?;
    let bundle = DeploymentBundle::from_bytes(&bytes).map_err(StorageError::Encode)?;

    if bundle.meta.chain_id != reference.chain_id {
      return Err(LoadError::ChainMismatch {
        pointer: pointer.to_string(),
        expected: reference.chain_id,
        found: bundle.meta.chain_id,
      });
    }
    Ok((pointer, bundle))
  }

  /// Store a bundle and publish it under its own reference.
  pub async fn publish(
    &self,
    bundle: &DeploymentBundle,
    publisher: &str,
  ) -> Result<(StoragePointer, PublishOutcome), LoadError> {
    let reference = bundle.reference()?;
    self.publish_as(bundle, &reference, publisher).await
  }

  /// Store a bundle and publish it under `reference`.
  pub async fn publish_as(
    &self,
    bundle: &DeploymentBundle,
    reference: &PackageReference,
    publisher: &str,
  ) -> Result<(StoragePointer, PublishOutcome), LoadError> {
    let pointer = self.storage.put_bundle(bundle).await?;
    let outcome = self.resolver.publish(reference, &pointer, publisher).await?;
    info!(package = %reference, hash = %pointer.content_hash.short(), outcome = ?outcome, "bundle published");
    Ok((pointer, outcome))
  }
}
