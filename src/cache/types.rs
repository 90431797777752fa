//! Core types for the caching system.

use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use color_eyre::Result;
use thiserror::Error;
use url::Url;

use crate::fetch::{Headers, Method, Request, Response};

/// Snapshot of a response as it was written to a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Headers,
  pub body: Bytes,
  /// When the entry was written (second precision, as persisted)
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Headers, body: Bytes) -> Self {
    Self {
      status,
      headers,
      body,
      stored_at: Utc::now().trunc_subsecs(0),
    }
  }

  /// Read a response fully into a storable snapshot.
  pub async fn capture(response: Response) -> Result<Self> {
    let (status, headers, body) = response.into_parts();
    let body = body.bytes().await?;
    Ok(Self::new(status, headers, body))
  }

  pub fn into_response(self) -> Response {
    Response::new(self.status, self.headers, self.body)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cache hit, no network access happened.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed, serving a previously stored copy.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Navigation failed, serving the application shell instead.
  pub fn shell(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Shell,
      cached_at: Some(cached_at),
    }
  }

  /// Request was not intercepted and went straight to the network.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live response from network
  Network,
  /// Stored response, served without touching the network
  Cache,
  /// Network unavailable, serving stored response for the same key
  Offline,
  /// Network unavailable, serving the stored shell document
  Shell,
  /// Not intercepted
  Passthrough,
}

/// The request could be answered neither by the network nor by any fallback.
#[derive(Debug, Error)]
#[error("{method} {url} is unavailable: {reason}")]
pub struct Unavailable {
  pub method: Method,
  pub url: Url,
  pub reason: String,
}

impl Unavailable {
  pub fn new(request: &Request, reason: impl Into<String>) -> Self {
    Self {
      method: request.method(),
      url: request.url().clone(),
      reason: reason.into(),
    }
  }
}
