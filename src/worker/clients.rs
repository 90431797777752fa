//! Open application instances and which worker version serves them.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A single open application instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
  pub id: u64,
  pub url: String,
  /// Version currently serving this client, if any
  pub controller: Option<String>,
}

#[derive(Default)]
struct Clients {
  next_id: u64,
  contexts: BTreeMap<u64, ClientContext>,
}

/// Registry of client contexts, used for takeover on activation.
#[derive(Default)]
pub struct ClientRegistry {
  inner: Mutex<Clients>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Clients>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Register a client and return its id.
  pub fn connect(&self, url: &str, controller: Option<&str>) -> Result<u64> {
    let mut clients = self.lock()?;
    clients.next_id += 1;
    let id = clients.next_id;
    clients.contexts.insert(
      id,
      ClientContext {
        id,
        url: url.to_string(),
        controller: controller.map(String::from),
      },
    );
    Ok(id)
  }

  #[allow(dead_code)]
  pub fn disconnect(&self, id: u64) -> Result<bool> {
    Ok(self.lock()?.contexts.remove(&id).is_some())
  }

  /// Whether any client is still served by a version other than `version`.
  pub fn controlled_by_other(&self, version: &str) -> Result<bool> {
    Ok(
      self
        .lock()?
        .contexts
        .values()
        .any(|c| c.controller.as_deref().is_some_and(|v| v != version)),
    )
  }

  /// Make `version` the controller of every client. Returns how many changed.
  pub fn claim(&self, version: &str) -> Result<usize> {
    let mut clients = self.lock()?;
    let mut claimed = 0;
    for context in clients.contexts.values_mut() {
      if context.controller.as_deref() != Some(version) {
        context.controller = Some(version.to_string());
        claimed += 1;
      }
    }
    Ok(claimed)
  }

  /// Open a new client on `url`, served by `version`.
  pub fn open_window(&self, url: &str, version: &str) -> Result<u64> {
    self.connect(url, Some(version))
  }

  #[allow(dead_code)]
  pub fn list(&self) -> Result<Vec<ClientContext>> {
    Ok(self.lock()?.contexts.values().cloned().collect())
  }
}
