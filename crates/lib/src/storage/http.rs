//! Objects behind an HTTP endpoint.
//!
//! The protocol is three verbs on `{base}/{hash}`:
//!
//! - `PUT` stores the request body; any 2xx is success
//! - `GET` returns the body, `404` when absent
//! - `HEAD` answers `200` or `404`
//!
//! Server errors, timeouts and connection failures are reported as
//! `StorageUnavailable` so the caller can retry them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{StorageBackend, StorageError, verify};
use crate::util::hash::{ContentHash, hash_bytes};

pub struct HttpStore {
  base: String,
  client: reqwest::Client,
}

impl HttpStore {
  pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, StorageError> {
    let base = base.into().trim_end_matches('/').to_string();
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| StorageError::StorageUnavailable {
        locator: base.clone(),
        message: e.to_string(),
      })?;
    Ok(Self { base, client })
  }

  fn url(&self, hash: &ContentHash) -> String {
    format!("{}/{}", self.base, hash)
  }

  fn unavailable(&self, message: impl ToString) -> StorageError {
    StorageError::StorageUnavailable {
      locator: self.base.clone(),
      message: message.to_string(),
    }
  }

  fn status_error(&self, method: &str, status: StatusCode) -> StorageError {
    self.unavailable(format!("{} returned HTTP {}", method, status))
  }
}

#[async_trait]
impl StorageBackend for HttpStore {
  fn locator(&self) -> String {
    self.base.clone()
  }

  async fn put(&self, bytes: &[u8]) -> Result<ContentHash, StorageError> {
    let hash = hash_bytes(bytes);
    let response = self
      .client
      .put(self.url(&hash))
      .body(bytes.to_vec())
      .send()
      .await
      .map_err(|e| self.unavailable(e))?;
    if !response.status().is_success() {
      return Err(self.status_error("PUT", response.status()));
    }
    debug!(hash = %hash.short(), base = %self.base, "object uploaded");
    Ok(hash)
  }

  async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
    let response = self
      .client
      .get(self.url(hash))
      .send()
      .await
      .map_err(|e| self.unavailable(e))?;
    match response.status() {
      StatusCode::NOT_FOUND => Err(StorageError::NotFound(hash.clone())),
      status if status.is_success() => {
        let bytes = response.bytes().await.map_err(|e| self.unavailable(e))?;
        verify(hash, &bytes)?;
        Ok(bytes.to_vec())
      }
      status => Err(self.status_error("GET", status)),
    }
  }

  async fn has(&self, hash: &ContentHash) -> Result<bool, StorageError> {
    let response = self
      .client
      .head(self.url(hash))
      .send()
      .await
      .map_err(|e| self.unavailable(e))?;
    match response.status() {
      StatusCode::NOT_FOUND => Ok(false),
      status if status.is_success() => Ok(true),
      status => Err(self.status_error("HEAD", status)),
    }
  }
}
