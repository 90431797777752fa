//! Maps each outgoing request to a strategy and a target partition.

use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

use crate::fetch::Request;

/// Fetch/cache algorithm applied to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Live data preferred; stored copy only when the network fails
  NetworkFirst,
  /// Stored copy preferred; network only on a miss
  CacheFirst,
}

/// Which current partition a response is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRole {
  Static,
  Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
  pub strategy: Strategy,
  pub partition: PartitionRole,
}

/// How a remote-service backend is recognised from a request URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePattern {
  /// Host equals the value exactly
  Host(String),
  /// Host equals the domain or is one of its subdomains
  HostSuffix(String),
  /// Full URL contains the value anywhere
  UrlContains(String),
}

impl ServicePattern {
  pub fn matches(&self, url: &Url) -> bool {
    match self {
      Self::Host(host) => url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(host)),
      Self::HostSuffix(domain) => url.host_str().is_some_and(|h| {
        let h = h.to_ascii_lowercase();
        let domain = domain.to_ascii_lowercase();
        h == domain || h.ends_with(&format!(".{}", domain))
      }),
      Self::UrlContains(needle) => url.as_str().contains(needle.as_str()),
    }
  }
}

/// Pure request classifier built from the service table and install manifest.
#[derive(Debug, Clone)]
pub struct Classifier {
  services: Vec<ServicePattern>,
  manifest: HashSet<String>,
}

impl Classifier {
  pub fn new(services: Vec<ServicePattern>, manifest: &[Url]) -> Self {
    Self {
      services,
      manifest: manifest.iter().map(|u| u.as_str().to_string()).collect(),
    }
  }

  pub fn is_remote_service(&self, url: &Url) -> bool {
    self.services.iter().any(|p| p.matches(url))
  }

  /// `None` means the request must not be intercepted at all.
  ///
  /// Remote-service matching runs first, so it wins over cache eligibility.
  pub fn classify(&self, request: &Request) -> Option<Classification> {
    if self.is_remote_service(request.url()) {
      return Some(Classification {
        strategy: Strategy::NetworkFirst,
        partition: PartitionRole::Dynamic,
      });
    }

    if !request.method().is_read() {
      return None;
    }

    let partition = if self.manifest.contains(request.cache_key()) {
      PartitionRole::Static
    } else {
      PartitionRole::Dynamic
    };

    Some(Classification {
      strategy: Strategy::CacheFirst,
      partition,
    })
  }
}
