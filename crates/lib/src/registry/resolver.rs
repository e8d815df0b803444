//! Ordered lookup across registries with a write-back cache.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{PublishOutcome, Registry, RegistryError};
use crate::reference::PackageReference;
use crate::storage::StoragePointer;
use crate::util::retry::RetryPolicy;

/// Resolves references against registries in order; the first hit wins.
///
/// Hits from a non-cache registry are written back into the cache. The
/// cache is consulted first for immutable versions and last for `latest`,
/// whose pointer may have moved since it was cached.
#[derive(Clone, Default)]
pub struct RegistryResolver {
  registries: Vec<Arc<dyn Registry>>,
  cache: Option<Arc<dyn Registry>>,
  retry: RetryPolicy,
}

impl RegistryResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
    self.registries.push(registry);
    self
  }

  pub fn with_cache(mut self, cache: Arc<dyn Registry>) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn lookup_order(&self, reference: &PackageReference) -> Vec<&Arc<dyn Registry>> {
    let mut order: Vec<&Arc<dyn Registry>> = self.registries.iter().collect();
    if let Some(cache) = &self.cache {
      if reference.is_mutable() {
        order.push(cache);
      } else {
        order.insert(0, cache);
      }
    }
    order
  }

  fn is_cache(&self, registry: &Arc<dyn Registry>) -> bool {
    self.cache.as_ref().is_some_and(|cache| Arc::ptr_eq(cache, registry))
  }

  pub async fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, RegistryError> {
    let mut failure = None;

    for registry in self.lookup_order(reference) {
      match self.retry.run("registry resolve", || registry.resolve(reference)).await {
        Ok(pointer) => {
          debug!(package = %reference, registry = %registry.name(), hash = %pointer.content_hash.short(), "package resolved");
          if !self.is_cache(registry) {
            self.write_back(registry, reference, &pointer).await;
          }
          return Ok(pointer);
        }
        Err(RegistryError::PackageNotFound(_)) => continue,
        Err(err) => {
          warn!(package = %reference, registry = %registry.name(), error = %err, "registry lookup failed, trying next");
          failure = Some(err);
        }
      }
    }

    Err(failure.unwrap_or_else(|| RegistryError::PackageNotFound(reference.registry_key())))
  }

  /// Publish to the first registry (the cache when there is no other), then
  /// record the pointer in the cache.
  pub async fn publish(
    &self,
    reference: &PackageReference,
    pointer: &StoragePointer,
    publisher: &str,
  ) -> Result<PublishOutcome, RegistryError> {
    let Some(target) = self.registries.first().or(self.cache.as_ref()) else {
      return Err(RegistryError::Unavailable {
        registry: "none".to_string(),
        message: "no registry configured".to_string(),
      });
    };

    let outcome = self
      .retry
      .run("registry publish", || target.publish(reference, pointer, publisher))
      .await?;

    if let Some(cache) = &self.cache
      && !Arc::ptr_eq(cache, target)
      && let Err(err) = cache.publish(reference, pointer, publisher).await
    {
      warn!(package = %reference, error = %err, "failed to record publish in cache");
    }
    Ok(outcome)
  }

  async fn write_back(&self, source: &Arc<dyn Registry>, reference: &PackageReference, pointer: &StoragePointer) {
    let Some(cache) = &self.cache else {
      return;
    };
    let owner = match source.owner(&reference.name).await {
      Ok(Some(owner)) => owner,
      Ok(None) => source.name(),
      Err(err) => {
        debug!(package = %reference, error = %err, "owner lookup failed, skipping cache write-back");
        return;
      }
    };
    if let Err(err) = cache.publish(reference, pointer, &owner).await {
      warn!(package = %reference, error = %err, "cache write-back failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::MemoryRegistry;
  use crate::util::hash::hash_bytes;

  fn reference(s: &str) -> PackageReference {
    PackageReference::parse(s).unwrap()
  }

  fn pointer(content: &[u8]) -> StoragePointer {
    StoragePointer::new("memory://default", hash_bytes(content))
  }

  #[tokio::test]
  async fn first_hit_wins_and_is_cached() {
    let remote = Arc::new(MemoryRegistry::new());
    let cache = Arc::new(MemoryRegistry::new());
    remote.publish(&reference("pkg:1.0.0"), &pointer(b"a"), "alice").await.unwrap();

    let resolver = RegistryResolver::new()
      .with_registry(remote.clone())
      .with_cache(cache.clone())
      .with_retry(RetryPolicy::none());

    assert_eq!(resolver.resolve(&reference("pkg:1.0.0")).await.unwrap(), pointer(b"a"));
    assert_eq!(cache.resolve(&reference("pkg:1.0.0")).await.unwrap(), pointer(b"a"));
    assert_eq!(cache.owner("pkg").await.unwrap().as_deref(), Some("alice"));
  }

  #[tokio::test]
  async fn cache_answers_immutable_versions_first() {
    let remote = Arc::new(MemoryRegistry::new());
    let cache = Arc::new(MemoryRegistry::new());
    remote.publish(&reference("pkg"), &pointer(b"new"), "alice").await.unwrap();
    cache.publish(&reference("pkg"), &pointer(b"old"), "alice").await.unwrap();
    cache.publish(&reference("pkg:1.0.0"), &pointer(b"pinned"), "alice").await.unwrap();

    let resolver = RegistryResolver::new().with_registry(remote).with_cache(cache);
    assert_eq!(resolver.resolve(&reference("pkg")).await.unwrap(), pointer(b"new"));
    assert_eq!(resolver.resolve(&reference("pkg:1.0.0")).await.unwrap(), pointer(b"pinned"));
  }

  #[tokio::test]
  async fn not_found_everywhere() {
    let resolver = RegistryResolver::new().with_registry(Arc::new(MemoryRegistry::new()));
    let err = resolver.resolve(&reference("ghost")).await.unwrap_err();
    assert!(matches!(err, RegistryError::PackageNotFound(key) if key == "ghost:latest/13370"));
  }

  #[tokio::test]
  async fn publish_goes_to_primary_and_cache() {
    let primary = Arc::new(MemoryRegistry::new());
    let cache = Arc::new(MemoryRegistry::new());
    let resolver = RegistryResolver::new()
      .with_registry(primary.clone())
      .with_cache(cache.clone());

    let outcome = resolver
      .publish(&reference("pkg:1.0.0"), &pointer(b"a"), "alice")
      .await
      .unwrap();
    assert_eq!(outcome, PublishOutcome::Published);
    assert!(primary.resolve(&reference("pkg:1.0.0")).await.is_ok());
    assert!(cache.resolve(&reference("pkg:1.0.0")).await.is_ok());

    let err = resolver
      .publish(&reference("pkg:1.0.0"), &pointer(b"b"), "alice")
      .await
      .unwrap_err();
    assert!(matches!(err, RegistryError::PointerConflict { .. }));
  }

  #[tokio::test]
  async fn publish_without_registries_fails() {
    let err = RegistryResolver::new()
      .publish(&reference("pkg"), &pointer(b"a"), "alice")
      .await
      .unwrap_err();
    assert!(matches!(err, RegistryError::Unavailable { .. }));
  }
}
