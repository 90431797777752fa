//! Install / activate state machine for one deployment version.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{PartitionStore, StoredResponse, VersionRegistry};
use crate::fetch::{Fetcher, Request};

use super::clients::ClientRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed, waiting for older versions to let go of their clients
  Waiting,
  Activating,
  Active,
}

#[derive(Debug, Error)]
pub enum InstallError {
  #[error("install cannot start while {0:?}")]
  InvalidState(LifecycleState),
  #[error("failed to fetch manifest entry {url}: {reason}")]
  Fetch { url: Url, reason: String },
  #[error("manifest entry {url} returned status {status}")]
  Status { url: Url, status: u16 },
  #[error("failed to store static partition {partition}: {reason}")]
  Store { partition: String, reason: String },
}

#[derive(Debug)]
pub struct InstallOutcome {
  /// Manifest entries written to the static partition
  pub entries: usize,
  /// Set when activation followed the install directly
  pub activation: Option<ActivationReport>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stale partitions removed
  pub deleted: Vec<String>,
  /// Stale partitions whose deletion failed; retried on the next activation
  pub failed: Vec<String>,
  /// Clients newly taken over
  pub claimed: usize,
}

pub struct Lifecycle<S: PartitionStore> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  registry: VersionRegistry,
  clients: Arc<ClientRegistry>,
  manifest: Vec<Url>,
  state: Mutex<LifecycleState>,
  skip_waiting: AtomicBool,
}

impl<S: PartitionStore> Lifecycle<S> {
  pub fn new(
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    registry: VersionRegistry,
    clients: Arc<ClientRegistry>,
  ) -> Self {
    Self {
      storage,
      fetcher,
      registry,
      clients,
      manifest: Vec::new(),
      state: Mutex::new(LifecycleState::Uninstalled),
      skip_waiting: AtomicBool::new(false),
    }
  }

  pub fn with_manifest(mut self, manifest: Vec<Url>) -> Self {
    self.manifest = manifest;
    self
  }

  /// Take over as soon as install succeeds instead of waiting.
  pub fn with_skip_waiting(self, skip: bool) -> Self {
    self.skip_waiting.store(skip, Ordering::SeqCst);
    self
  }

  pub fn registry(&self) -> &VersionRegistry {
    &self.registry
  }

  pub async fn state(&self) -> LifecycleState {
    *self.state.lock().await
  }

  /// Pick up an install completed by an earlier run.
  ///
  /// Only the install marker counts; cache-first writes into the static
  /// partition do not.
  pub async fn restore(&self) -> Result<LifecycleState> {
    let mut state = self.state.lock().await;
    if *state == LifecycleState::Uninstalled {
      let partition = self.registry.static_partition();
      if self.storage.installed(partition)? {
        *state = LifecycleState::Waiting;
      }
    }
    Ok(*state)
  }

  /// Populate the static partition from the manifest.
  ///
  /// All entries are fetched before anything is written; a single failure
  /// leaves the store untouched and the lifecycle `Uninstalled`.
  pub async fn install(&self) -> Result<InstallOutcome, InstallError> {
    let entries = {
      let mut state = self.state.lock().await;
      if *state != LifecycleState::Uninstalled {
        return Err(InstallError::InvalidState(*state));
      }

      *state = LifecycleState::Installing;
      info!(
        partition = self.registry.static_partition(),
        entries = self.manifest.len(),
        "Installing"
      );

      match self.populate().await {
        Ok(entries) => {
          *state = LifecycleState::Waiting;
          info!(entries, "Installed");
          entries
        }
        Err(e) => {
          *state = LifecycleState::Uninstalled;
          error!(error = %e, "Installation failed");
          return Err(e);
        }
      }
    };

    let activation = match self.try_activate().await {
      Ok(report) => report,
      Err(e) => {
        warn!(error = %e, "Activation after install failed");
        None
      }
    };

    Ok(InstallOutcome {
      entries,
      activation,
    })
  }

  async fn populate(&self) -> Result<usize, InstallError> {
    let entries =
      futures::future::try_join_all(self.manifest.iter().map(|url| self.fetch_entry(url))).await?;

    let partition = self.registry.static_partition();
    self
      .storage
      .install(partition, &entries)
      .map_err(|e| InstallError::Store {
        partition: partition.to_string(),
        reason: e.to_string(),
      })?;

    Ok(entries.len())
  }

  async fn fetch_entry(&self, url: &Url) -> Result<(String, StoredResponse), InstallError> {
    let request = Request::get(url.clone());
    let fetch_error = |e: color_eyre::Report| InstallError::Fetch {
      url: url.clone(),
      reason: e.to_string(),
    };

    let response = self.fetcher.fetch(&request).await.map_err(fetch_error)?;
    if !response.is_ok() {
      return Err(InstallError::Status {
        url: url.clone(),
        status: response.status(),
      });
    }

    let stored = StoredResponse::capture(response).await.map_err(fetch_error)?;
    Ok((request.cache_key().to_string(), stored))
  }

  /// Request forced takeover. Idempotent; if install has not finished yet
  /// the request is remembered and honoured when it does.
  pub async fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
    self.skip_waiting.store(true, Ordering::SeqCst);
    self.try_activate().await
  }

  /// Activate if waiting and takeover was requested. Without the skip-waiting
  /// flag the version stays `Waiting` until `skip_waiting` or `activate`.
  async fn try_activate(&self) -> Result<Option<ActivationReport>> {
    let mut state = self.state.lock().await;
    if *state != LifecycleState::Waiting {
      return Ok(None);
    }

    if !self.skip_waiting.load(Ordering::SeqCst) {
      let held = self.clients.controlled_by_other(self.registry.version())?;
      info!(old_clients = held, "Installed, waiting for skip-waiting");
      return Ok(None);
    }

    self.run_activation(&mut state).map(Some)
  }

  /// Delete stale partitions and claim clients. Re-running it once active
  /// is a no-op garbage collection.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let mut state = self.state.lock().await;
    match *state {
      LifecycleState::Waiting | LifecycleState::Active => self.run_activation(&mut state),
      other => Err(eyre!("Cannot activate while {:?}", other)),
    }
  }

  fn run_activation(&self, state: &mut LifecycleState) -> Result<ActivationReport> {
    let previous = *state;
    *state = LifecycleState::Activating;
    info!(version = self.registry.version(), "Activating");

    let existing = match self.storage.partitions() {
      Ok(existing) => existing,
      Err(e) => {
        *state = previous;
        return Err(e);
      }
    };

    let mut report = ActivationReport::default();
    for name in self.registry.stale(&existing) {
      match self.storage.delete_partition(name) {
        Ok(_) => {
          info!(partition = name, "Deleted stale partition");
          report.deleted.push(name.to_string());
        }
        Err(e) => {
          warn!(partition = name, error = %e, "Failed to delete stale partition");
          report.failed.push(name.to_string());
        }
      }
    }

    report.claimed = self
      .clients
      .claim(self.registry.version())
      .unwrap_or_else(|e| {
        warn!(error = %e, "Failed to claim clients");
        0
      });

    *state = LifecycleState::Active;
    info!(
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      claimed = report.claimed,
      "Activated"
    );

    Ok(report)
  }
}
