use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::{CacheResult, Unavailable};
use crate::fetch::{Request, Response};
use crate::worker::{ActivationReport, InstallError, InstallOutcome, SyncAck};

/// Worker events; each carries the channel its result is reported on
#[derive(Debug)]
pub enum Event {
  Install {
    reply: oneshot::Sender<Result<InstallOutcome, InstallError>>,
  },
  Activate {
    reply: oneshot::Sender<Result<ActivationReport>>,
  },
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<CacheResult<Response>, Unavailable>>,
  },
  /// Control message from a client, e.g. `{"type": "SKIP_WAITING"}`
  Message {
    data: serde_json::Value,
    reply: oneshot::Sender<Result<()>>,
  },
  Sync {
    tag: String,
    reply: oneshot::Sender<SyncAck>,
  },
  Push {
    payload: Option<String>,
    reply: oneshot::Sender<bool>,
  },
  NotificationClick {
    action: Option<String>,
    reply: oneshot::Sender<Result<Option<u64>>>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Message,
  Sync,
  Push,
  NotificationClick,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Install { .. } => EventKind::Install,
      Event::Activate { .. } => EventKind::Activate,
      Event::Fetch { .. } => EventKind::Fetch,
      Event::Message { .. } => EventKind::Message,
      Event::Sync { .. } => EventKind::Sync,
      Event::Push { .. } => EventKind::Push,
      Event::NotificationClick { .. } => EventKind::NotificationClick,
    }
  }
}

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Registration table plus the single loop dispatching into it.
///
/// Every event runs as its own task, so a slow fetch never holds up the
/// next event.
pub struct EventLoop {
  rx: mpsc::UnboundedReceiver<Event>,
  tx: mpsc::UnboundedSender<Event>,
  handlers: HashMap<EventKind, Handler>,
}

impl EventLoop {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      rx,
      tx,
      handlers: HashMap::new(),
    }
  }

  /// Handle for sending events into this loop.
  pub fn handle(&self) -> WorkerHandle {
    WorkerHandle {
      tx: self.tx.clone(),
    }
  }

  /// Register the handler for one kind of event, replacing any previous one.
  pub fn on<F, Fut>(&mut self, kind: EventKind, handler: F)
  where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self
      .handlers
      .insert(kind, Arc::new(move |event| handler(event).boxed()));
  }

  /// Dispatch until every handle has been dropped.
  pub async fn run(self) {
    let EventLoop {
      mut rx,
      tx,
      handlers,
    } = self;
    // Only outside handles keep the loop alive
    drop(tx);

    while let Some(event) = rx.recv().await {
      let kind = event.kind();
      match handlers.get(&kind) {
        Some(handler) => {
          tokio::spawn(handler(event));
        }
        None => debug!(?kind, "No handler registered, dropping event"),
      }
    }
  }
}

/// Sends events to a running [`EventLoop`] and waits for their replies
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl WorkerHandle {
  async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(make(reply))
      .map_err(|_| eyre!("Worker event loop has stopped"))?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the event without replying"))
  }

  pub async fn install(&self) -> Result<InstallOutcome> {
    Ok(self.request(|reply| Event::Install { reply }).await??)
  }

  pub async fn activate(&self) -> Result<ActivationReport> {
    self.request(|reply| Event::Activate { reply }).await?
  }

  /// The error carries an [`Unavailable`] when no response could be produced.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    Ok(self.request(|reply| Event::Fetch { request, reply }).await??)
  }

  pub async fn message(&self, data: serde_json::Value) -> Result<()> {
    self.request(|reply| Event::Message { data, reply }).await?
  }

  pub async fn sync(&self, tag: &str) -> Result<SyncAck> {
    let tag = tag.to_string();
    self.request(|reply| Event::Sync { tag, reply }).await
  }

  pub async fn push(&self, payload: Option<String>) -> Result<bool> {
    self.request(|reply| Event::Push { payload, reply }).await
  }

  pub async fn notification_click(&self, action: Option<String>) -> Result<Option<u64>> {
    self
      .request(|reply| Event::NotificationClick { action, reply })
      .await?
  }
}
