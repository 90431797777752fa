//! Background-sync and push-notification trigger points.
//!
//! Neither hook may fail a request: errors are logged here and reported back
//! to the trigger only.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{NotificationConfig, SyncConfig};

/// Acknowledgement returned to the sync scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAck {
  Completed,
  /// Tag is not one this worker handles
  Ignored,
  Failed(String),
}

pub struct BackgroundSync {
  tags: Vec<String>,
}

impl BackgroundSync {
  pub fn new(config: &SyncConfig) -> Self {
    Self {
      tags: config.tags.clone(),
    }
  }

  pub async fn handle(&self, tag: &str) -> SyncAck {
    info!(tag, "Background sync triggered");
    if !self.tags.iter().any(|t| t == tag) {
      return SyncAck::Ignored;
    }

    match self.reconcile(tag).await {
      Ok(()) => SyncAck::Completed,
      Err(e) => {
        error!(tag, error = %e, "Sync failed");
        SyncAck::Failed(e.to_string())
      }
    }
  }

  async fn reconcile(&self, tag: &str) -> Result<()> {
    info!(tag, "Syncing offline data");
    // No offline writes are queued yet, so there is nothing to replay.
    Ok(())
  }
}

pub const OPEN_ACTION: &str = "open";
pub const CLOSE_ACTION: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
  pub arrived_at: DateTime<Utc>,
  pub primary_key: u64,
}

/// Everything a notification renderer needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  pub data: NotificationData,
}

/// Renders notifications; display itself lives outside this crate.
pub trait NotificationSink: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Sink that prints each notification as a JSON line on stdout.
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "Showing notification");
    println!("{}", serde_json::to_string(notification)?);
    Ok(())
  }
}

pub struct Notifier {
  config: NotificationConfig,
  sink: Arc<dyn NotificationSink>,
}

impl Notifier {
  pub fn new(config: &NotificationConfig, sink: Arc<dyn NotificationSink>) -> Self {
    Self {
      config: config.clone(),
      sink,
    }
  }

  pub fn build(&self, payload: Option<&str>) -> Notification {
    let action = |id: &str, title: &str| NotificationAction {
      action: id.to_string(),
      title: title.to_string(),
      icon: self.config.icon.clone(),
    };

    Notification {
      title: self.config.title.clone(),
      body: payload.unwrap_or(self.config.fallback_body.as_str()).to_string(),
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: self.config.vibrate.clone(),
      actions: vec![
        action(OPEN_ACTION, &self.config.open_title),
        action(CLOSE_ACTION, &self.config.close_title),
      ],
      data: NotificationData {
        arrived_at: Utc::now(),
        primary_key: 1,
      },
    }
  }

  /// Build and show a notification for a push payload. Returns whether the
  /// sink accepted it.
  pub fn push(&self, payload: Option<&str>) -> bool {
    let notification = self.build(payload);
    match self.sink.show(&notification) {
      Ok(()) => true,
      Err(e) => {
        error!(error = %e, "Failed to show notification");
        false
      }
    }
  }
}

/// Where a notification click should take the user, if anywhere.
pub fn click_target(action: Option<&str>) -> Option<&'static str> {
  match action {
    Some(OPEN_ACTION) => Some("/"),
    _ => None,
  }
}
