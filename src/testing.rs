//! Test doubles shared across modules.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cache::StoredResponse;
use crate::fetch::{Body, Fetcher, Request, Response};

/// Scripted network: known URLs answer with a fixed status and body, unknown
/// URLs fail like an unreachable host, and the whole thing can go offline.
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, (u16, Bytes)>>,
  offline: AtomicBool,
  calls: AtomicUsize,
  last: Mutex<Option<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      offline: AtomicBool::new(false),
      calls: AtomicUsize::new(0),
      last: Mutex::new(None),
    }
  }

  pub fn route(self, url: &str, status: u16, body: &'static str) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, Bytes::from_static(body.as_bytes())));
    self
  }

  pub fn offline(self) -> Self {
    self.set_offline(true);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Number of fetches attempted so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// The most recent request handed to the network.
  pub fn last_request(&self) -> Option<Request> {
    self.last.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    *self.last.lock().unwrap() = Some(request.clone());
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }

    let route = self.routes.lock().unwrap().get(request.url().as_str()).cloned();
    match route {
      Some((status, body)) => {
        // Streamed so every caller has to go through the single-read path
        let chunks: Vec<Result<Bytes>> = vec![Ok(body)];
        Ok(Response::new(status, Vec::new(), Body::from_stream(futures::stream::iter(chunks))))
      }
      None => Err(eyre!("connection refused: {}", request.url())),
    }
  }
}

pub fn stored(body: &'static str) -> StoredResponse {
  StoredResponse::new(200, Vec::new(), Bytes::from_static(body.as_bytes()))
}
