//! Registry contract read and written through a [`Provider`].
//!
//! The contract exposes:
//!
//! - `getPackageUrl(name, version, chainId) -> string` (empty when unset)
//! - `getPackageOwner(name) -> address` (zero when unclaimed)
//! - `publish(name, version, chainId, url)`
//!
//! The contract enforces ownership itself; the checks here only avoid
//! sending a transaction that would revert.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{PublishOutcome, Registry, RegistryError, check_publish};
use crate::provider::{CallRequest, Provider, ProviderError, TxRequest, ZERO_ADDRESS};
use crate::reference::PackageReference;
use crate::storage::StoragePointer;

pub struct OnChainRegistry {
  provider: Arc<dyn Provider>,
  address: String,
}

impl OnChainRegistry {
  pub fn new(provider: Arc<dyn Provider>, address: impl Into<String>) -> Self {
    Self {
      provider,
      address: address.into(),
    }
  }

  pub fn address(&self) -> &str {
    &self.address
  }

  fn provider_error(&self, err: ProviderError) -> RegistryError {
    match err {
      ProviderError::Network(message) | ProviderError::Timeout(message) => RegistryError::Unavailable {
        registry: self.name(),
        message,
      },
      other => RegistryError::Provider(other),
    }
  }

  async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RegistryError> {
    let request = CallRequest {
      to: self.address.clone(),
      method: method.to_string(),
      args,
      from: None,
    };
    self.provider.call(&request).await.map_err(|e| self.provider_error(e))
  }

  async fn lookup(&self, reference: &PackageReference) -> Result<Option<StoragePointer>, RegistryError> {
    let value = self
      .call(
        "getPackageUrl",
        vec![json!(reference.name), json!(reference.version), json!(reference.chain_id)],
      )
      .await?;
    match value {
      Value::Null => Ok(None),
      Value::String(url) if url.is_empty() => Ok(None),
      Value::String(url) => url.parse().map(Some).map_err(|_| RegistryError::InvalidEntry {
        registry: self.name(),
        reference: reference.registry_key(),
        value: url,
      }),
      other => Err(RegistryError::InvalidEntry {
        registry: self.name(),
        reference: reference.registry_key(),
        value: other.to_string(),
      }),
    }
  }
}

#[async_trait]
impl Registry for OnChainRegistry {
  fn name(&self) -> String {
    format!("onchain:{}", self.address)
  }

  async fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, RegistryError> {
    self
      .lookup(reference)
      .await?
      .ok_or_else(|| RegistryError::PackageNotFound(reference.registry_key()))
  }

  async fn publish(
    &self,
    reference: &PackageReference,
    pointer: &StoragePointer,
    publisher: &str,
  ) -> Result<PublishOutcome, RegistryError> {
    let owner = self.owner(&reference.name).await?;
    let existing = self.lookup(reference).await?;
    check_publish(reference, pointer, publisher, owner.as_deref(), existing.as_ref())?;
    if existing.is_some_and(|e| e.content_hash == pointer.content_hash) {
      return Ok(PublishOutcome::Unchanged);
    }

    let request = TxRequest::invoke(
      self.address.clone(),
      "publish",
      vec![
        json!(reference.name),
        json!(reference.version),
        json!(reference.chain_id),
        json!(pointer.to_string()),
      ],
    )
    .with_from(Some(publisher.to_string()));
    let receipt = self
      .provider
      .send_transaction(&request)
      .await
      .map_err(|e| self.provider_error(e))?;

    info!(package = %reference, tx = %receipt.tx_hash, registry = %self.address, "published on chain");
    Ok(PublishOutcome::Published)
  }

  async fn owner(&self, name: &str) -> Result<Option<String>, RegistryError> {
    match self.call("getPackageOwner", vec![json!(name)]).await? {
      Value::String(owner) if !owner.is_empty() && !owner.eq_ignore_ascii_case(ZERO_ADDRESS) => Ok(Some(owner)),
      _ => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::{MemoryChain, TxPayload};
  use crate::util::hash::hash_bytes;

  const REGISTRY: &str = "0x00000000000000000000000000000000000000e1";
  const ALICE: &str = "0x00000000000000000000000000000000000000a1";

  fn pointer(content: &[u8]) -> StoragePointer {
    StoragePointer::new("https://pin.example", hash_bytes(content))
  }

  #[tokio::test]
  async fn resolves_published_url() {
    let chain = Arc::new(MemoryChain::new(10));
    chain.respond_at(REGISTRY, "getPackageUrl", json!(pointer(b"a").to_string()));
    let registry = OnChainRegistry::new(chain, REGISTRY);

    let reference = PackageReference::parse("pkg:1.0.0/10").unwrap();
    assert_eq!(registry.resolve(&reference).await.unwrap(), pointer(b"a"));
  }

  #[tokio::test]
  async fn empty_url_is_not_found() {
    let chain = Arc::new(MemoryChain::new(10));
    chain.respond_at(REGISTRY, "getPackageUrl", json!(""));
    let registry = OnChainRegistry::new(chain, REGISTRY);

    let err = registry.resolve(&PackageReference::parse("pkg").unwrap()).await.unwrap_err();
    assert!(matches!(err, RegistryError::PackageNotFound(_)));
  }

  #[tokio::test]
  async fn publish_sends_transaction() {
    let chain = Arc::new(MemoryChain::new(10));
    chain.respond_at(REGISTRY, "getPackageUrl", json!(""));
    chain.respond_at(REGISTRY, "getPackageOwner", json!(ZERO_ADDRESS));
    let registry = OnChainRegistry::new(chain.clone(), REGISTRY);

    let reference = PackageReference::parse("pkg:1.0.0/10").unwrap();
    let outcome = registry.publish(&reference, &pointer(b"a"), ALICE).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Published);

    let tx = &chain.transactions()[0];
    assert_eq!(tx.from.as_deref(), Some(ALICE));
    let TxPayload::Invoke { method, args } = &tx.payload else {
      panic!("expected invoke");
    };
    assert_eq!(method, "publish");
    assert_eq!(args[3], json!(pointer(b"a").to_string()));
  }

  #[tokio::test]
  async fn publish_checks_owner_and_conflicts() {
    let chain = Arc::new(MemoryChain::new(10));
    chain.respond_at(REGISTRY, "getPackageUrl", json!(pointer(b"a").to_string()));
    chain.respond_at(REGISTRY, "getPackageOwner", json!(ALICE));
    let registry = OnChainRegistry::new(chain.clone(), REGISTRY);
    let reference = PackageReference::parse("pkg:1.0.0/10").unwrap();

    let err = registry.publish(&reference, &pointer(b"a"), "0xbob").await.unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    let err = registry.publish(&reference, &pointer(b"b"), ALICE).await.unwrap_err();
    assert!(matches!(err, RegistryError::PointerConflict { .. }));

    let outcome = registry.publish(&reference, &pointer(b"a"), ALICE).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Unchanged);
    assert_eq!(chain.transaction_count(), 0);
  }

  #[tokio::test]
  async fn offline_chain_is_unavailable() {
    let chain = Arc::new(MemoryChain::new(10));
    chain.set_offline(true);
    let registry = OnChainRegistry::new(chain, REGISTRY);

    let err = registry.resolve(&PackageReference::parse("pkg").unwrap()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Unavailable { .. }));
  }
}
