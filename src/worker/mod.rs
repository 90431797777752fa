//! The worker: lifecycle, request interception, and the auxiliary hooks,
//! wired into an [`EventLoop`].

mod clients;
mod hooks;
mod interceptor;
mod lifecycle;

pub use clients::ClientRegistry;
pub use hooks::{click_target, BackgroundSync, NotificationSink, Notifier, StdoutSink, SyncAck};
pub use interceptor::Interceptor;
pub use lifecycle::{ActivationReport, InstallError, InstallOutcome, Lifecycle, LifecycleState};

use color_eyre::Result;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheLayer, Classifier, PartitionStore, VersionRegistry};
use crate::config::Config;
use crate::event::{Event, EventKind, EventLoop};
use crate::fetch::Fetcher;

/// Messages a client may post to the worker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
}

pub struct ServiceWorker<S: PartitionStore> {
  lifecycle: Lifecycle<S>,
  interceptor: Interceptor<S>,
  clients: Arc<ClientRegistry>,
  sync: BackgroundSync,
  notifier: Notifier,
}

impl<S: PartitionStore + 'static> ServiceWorker<S> {
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn NotificationSink>,
  ) -> Result<Self> {
    let registry = VersionRegistry::new(&config.cache.prefix, &config.cache.version);
    let manifest = config.manifest_urls()?;
    let shell = config.shell_url()?;
    let clients = Arc::new(ClientRegistry::new());

    let classifier = Classifier::new(config.services.clone(), &manifest);
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&fetcher),
      registry.clone(),
      shell.as_str(),
    );
    let lifecycle = Lifecycle::new(storage, fetcher, registry, Arc::clone(&clients))
      .with_manifest(manifest)
      .with_skip_waiting(config.lifecycle.skip_waiting);

    Ok(Self {
      lifecycle,
      interceptor: Interceptor::new(classifier, layer),
      clients,
      sync: BackgroundSync::new(&config.sync),
      notifier: Notifier::new(&config.notifications, sink),
    })
  }

  pub fn lifecycle(&self) -> &Lifecycle<S> {
    &self.lifecycle
  }

  #[cfg(test)]
  pub fn clients(&self) -> &ClientRegistry {
    &self.clients
  }

  /// Apply a client message. Unknown message types are ignored.
  pub async fn handle_message(&self, data: serde_json::Value) -> Result<()> {
    match serde_json::from_value::<ControlMessage>(data) {
      Ok(ControlMessage::SkipWaiting) => {
        info!("Skip waiting requested");
        self.lifecycle.skip_waiting().await?;
      }
      Err(e) => debug!(error = %e, "Ignoring unrecognised message"),
    }
    Ok(())
  }

  /// Route a notification click; returns the id of any window opened.
  pub fn notification_click(&self, action: Option<&str>) -> Result<Option<u64>> {
    match click_target(action) {
      Some(url) => {
        let id = self
          .clients
          .open_window(url, self.lifecycle.registry().version())?;
        Ok(Some(id))
      }
      None => Ok(None),
    }
  }

  fn bind<F, Fut>(self: &Arc<Self>, handler: F) -> impl Fn(Event) -> Fut + Send + Sync + 'static
  where
    F: Fn(Arc<Self>, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let worker = Arc::clone(self);
    move |event| handler(Arc::clone(&worker), event)
  }

  /// Register a handler for every event kind.
  pub fn register(self: &Arc<Self>, events: &mut EventLoop) {
    events.on(
      EventKind::Install,
      self.bind(|worker, event| async move {
        if let Event::Install { reply } = event {
          let _ = reply.send(worker.lifecycle.install().await);
        }
      }),
    );

    events.on(
      EventKind::Activate,
      self.bind(|worker, event| async move {
        if let Event::Activate { reply } = event {
          let _ = reply.send(worker.lifecycle.activate().await);
        }
      }),
    );

    events.on(
      EventKind::Fetch,
      self.bind(|worker, event| async move {
        if let Event::Fetch { request, reply } = event {
          let _ = reply.send(worker.interceptor.handle(&request).await);
        }
      }),
    );

    events.on(
      EventKind::Message,
      self.bind(|worker, event| async move {
        if let Event::Message { data, reply } = event {
          let _ = reply.send(worker.handle_message(data).await);
        }
      }),
    );

    events.on(
      EventKind::Sync,
      self.bind(|worker, event| async move {
        if let Event::Sync { tag, reply } = event {
          let _ = reply.send(worker.sync.handle(&tag).await);
        }
      }),
    );

    events.on(
      EventKind::Push,
      self.bind(|worker, event| async move {
        if let Event::Push { payload, reply } = event {
          let _ = reply.send(worker.notifier.push(payload.as_deref()));
        }
      }),
    );

    events.on(
      EventKind::NotificationClick,
      self.bind(|worker, event| async move {
        if let Event::NotificationClick { action, reply } = event {
          let _ = reply.send(worker.notification_click(action.as_deref()));
        }
      }),
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStore, Unavailable};
  use crate::event::WorkerHandle;
  use crate::fetch::{Destination, Method, Request};
  use crate::testing::{stored, FakeNetwork};

  fn config() -> Config {
    Config::from_yaml(
      r#"
origin: https://app.example.com/
cache:
  prefix: app
  version: v2
manifest:
  - /
  - /index.html
lifecycle:
  skip_waiting: false
"#,
    )
    .unwrap()
  }

  fn network() -> Arc<FakeNetwork> {
    Arc::new(
      FakeNetwork::new()
        .route("https://app.example.com/", 200, "<root>")
        .route("https://app.example.com/index.html", 200, "<shell>")
        .route("https://firestore.googleapis.com/v1/lines", 200, "[]"),
    )
  }

  fn start(
    storage: Arc<SqliteStore>,
    network: Arc<FakeNetwork>,
  ) -> (Arc<ServiceWorker<SqliteStore>>, WorkerHandle) {
    let worker = Arc::new(ServiceWorker::new(&config(), storage, network, Arc::new(StdoutSink)).unwrap());
    let mut events = EventLoop::new();
    worker.register(&mut events);
    let handle = events.handle();
    tokio::spawn(events.run());
    (worker, handle)
  }

  fn url(s: &str) -> url::Url {
    url::Url::parse(s).unwrap()
  }

  #[tokio::test]
  async fn test_deploy_then_serve_offline() {
    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    storage.put("app-static-v1", "https://app.example.com/", &stored("v1")).unwrap();
    let network = network();
    let (worker, handle) = start(Arc::clone(&storage), Arc::clone(&network));

    // An old-version client holds activation back until told otherwise
    worker.clients().connect("https://app.example.com/", Some("v1")).unwrap();
    let outcome = handle.install().await.unwrap();
    assert!(outcome.activation.is_none());
    assert_eq!(worker.lifecycle().state().await, LifecycleState::Waiting);

    handle.message(serde_json::json!({ "type": "SKIP_WAITING" })).await.unwrap();
    assert_eq!(worker.lifecycle().state().await, LifecycleState::Active);
    assert_eq!(
      storage.partitions().unwrap(),
      vec!["app-static-v2".to_string()]
    );

    let live = handle
      .fetch(Request::get(url("https://firestore.googleapis.com/v1/lines")))
      .await
      .unwrap();
    assert_eq!(live.source, CacheSource::Network);

    network.set_offline(true);
    let offline = handle
      .fetch(Request::get(url("https://firestore.googleapis.com/v1/lines")))
      .await
      .unwrap();
    assert_eq!(offline.source, CacheSource::Offline);

    let page = handle
      .fetch(Request::get(url("https://app.example.com/lines/3")).with_destination(Destination::Document))
      .await
      .unwrap();
    assert_eq!(page.source, CacheSource::Shell);
    assert_eq!(&page.data.bytes().await.unwrap()[..], b"<shell>");
  }

  #[tokio::test]
  async fn test_install_without_skip_waiting_defers_takeover() {
    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    storage.put("app-static-v1", "https://app.example.com/", &stored("v1")).unwrap();
    let (worker, handle) = start(Arc::clone(&storage), network());

    // No open clients at all, still no takeover until asked
    let outcome = handle.install().await.unwrap();
    assert!(outcome.activation.is_none());
    assert_eq!(worker.lifecycle().state().await, LifecycleState::Waiting);
    assert!(storage.partitions().unwrap().contains(&"app-static-v1".to_string()));

    let report = handle.activate().await.unwrap();
    assert_eq!(report.deleted, vec!["app-static-v1".to_string()]);
    assert_eq!(worker.lifecycle().state().await, LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_unavailable_reaches_the_caller() {
    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = network();
    network.set_offline(true);
    let (_worker, handle) = start(storage, network);

    let err = handle
      .fetch(Request::new(Method::Delete, url("https://app.example.com/lines/3")))
      .await
      .unwrap_err();

    assert!(err.downcast_ref::<Unavailable>().is_some());
  }

  #[tokio::test]
  async fn test_unknown_message_is_ignored() {
    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    let (worker, handle) = start(storage, network());

    handle.message(serde_json::json!({ "type": "RELOAD" })).await.unwrap();
    handle.message(serde_json::json!("SKIP_WAITING")).await.unwrap();
    assert_eq!(worker.lifecycle().state().await, LifecycleState::Uninstalled);
  }

  #[tokio::test]
  async fn test_hooks_through_the_event_loop() {
    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    let (worker, handle) = start(storage, network());

    assert_eq!(handle.sync("sync-downtimes").await.unwrap(), SyncAck::Completed);
    assert_eq!(handle.sync("unknown").await.unwrap(), SyncAck::Ignored);
    assert!(handle.push(Some("Line 2 down".to_string())).await.unwrap());

    let opened = handle.notification_click(Some("open".to_string())).await.unwrap();
    assert!(opened.is_some());
    assert_eq!(handle.notification_click(Some("close".to_string())).await.unwrap(), None);
    assert_eq!(worker.clients().list().unwrap()[0].url, "/");
  }
}
