//! # NotificationManager: fan-out over registered notifiers
//!
//! Delivers each [`Event`] to every registered [`Notifier`] in registration
//! order and owns their lifecycle (`start`, `stop`, `close`).
//!
//! ## Rules
//! - Per-producer order is preserved: events are delivered one at a time.
//! - Each delivery is bounded by the delivery timeout, so a stuck notifier
//!   delays the others by at most that long.
//! - Failures are logged and swallowed at this boundary.
//!
//! ```text
//!   notify(&Event)
//!       ├──► console   (bounded)
//!       ├──► webhook   (bounded)
//!       └──► ...
//! ```

use super::Notifier;
use crate::domain::Event;
use crate::error::NotifyError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Multiplexer delivering events to several notifiers
pub struct NotificationManager {
    notifiers: Vec<Arc<dyn Notifier>>,
    delivery_timeout: Duration,
}

impl NotificationManager {
    pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            notifiers,
            delivery_timeout: Self::DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Bring every transport up
    pub async fn start(&self) {
        for notifier in &self.notifiers {
            self.bounded(notifier.name(), "start", notifier.start()).await;
        }
    }

    /// Quiesce every transport
    pub async fn stop(&self) {
        for notifier in &self.notifiers {
            self.bounded(notifier.name(), "stop", notifier.stop()).await;
        }
    }

    /// Release every transport
    pub async fn close(&self) {
        for notifier in &self.notifiers {
            self.bounded(notifier.name(), "close", notifier.close()).await;
        }
    }

    /// Deliver one event to all registered notifiers
    pub async fn deliver(&self, event: &Event) {
        for notifier in &self.notifiers {
            self.bounded(notifier.name(), "notify", notifier.notify(event))
                .await;
        }
    }

    async fn bounded<F>(&self, name: &str, op: &str, fut: F)
    where
        F: Future<Output = Result<(), NotifyError>>,
    {
        let result = match tokio::time::timeout(self.delivery_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(name.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!(notifier = name, op, "Notifier failed: {}", e);
        }
    }
}

#[async_trait]
impl Notifier for NotificationManager {
    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        self.deliver(event).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "manager"
    }

    async fn start(&self) -> Result<(), NotifyError> {
        NotificationManager::start(self).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), NotifyError> {
        NotificationManager::stop(self).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), NotifyError> {
        NotificationManager::close(self).await;
        Ok(())
    }
}
