//! Transport seam between providers and the gatherer.
//!
//! The stats core does not care how bytes move. It needs:
//!
//! - on the gatherer side, a [`ProviderLink`] per inbound connection that can
//!   name the authenticated peer, call `get_stats` on it, and report the
//!   connection going away exactly once;
//! - on the provider side, a [`Dialer`] that can wait for the local transport
//!   to come up and connect to a gatherer, after which inbound polls are
//!   answered by a [`StatsService`].
//!
//! Two implementations live here: [`memory`] for in-process tests and
//! [`tcp`] for running the binaries against each other.
//!
//! ```text
//!   provider node                              gatherer
//!  ┌──────────────────┐   hello(nickname,key) ┌──────────────────────┐
//!  │ ProviderConnector│ ─────────────────────►│ Gatherer::handle_    │
//!  │   └─ Dialer      │                       │   provide(link)      │
//!  │                  │◄──── get_stats ────── │ PollScheduler        │
//!  │ StatsService     │ ───── stats ────────► │   └─ ResultSink      │
//!  └──────────────────┘                       └──────────────────────┘
//! ```

pub mod memory;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::identity::ProviderId;
use crate::stats::{StatsRegistry, StatsReport};

/// Callback run once when a connection is lost.
pub type DisconnectHandler = Box<dyn FnOnce() + Send + 'static>;

/// Gatherer-side handle on one provider connection.
#[async_trait]
pub trait ProviderLink: Send + Sync {
    /// Identity of the authenticated peer, if one can be derived.
    fn identity(&self) -> Option<ProviderId>;

    /// Ask the provider for its current stats.
    async fn get_stats(&self) -> Result<StatsReport, TransportError>;

    /// Run `handler` when this connection is lost. Runs immediately if it
    /// already has been.
    fn on_disconnect(&self, handler: DisconnectHandler);
}

/// Provider-side answer to a `get_stats` poll.
pub trait StatsService: Send + Sync {
    fn get_stats(&self) -> Result<StatsReport, String>;
}

impl StatsService for StatsRegistry {
    fn get_stats(&self) -> Result<StatsReport, String> {
        Ok(self.snapshot())
    }
}

/// Provider-side connection factory.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Resolve once the local transport can make outbound connections.
    async fn when_ready(&self) -> Result<(), TransportError>;

    /// Connect to the gatherer at `addr` and register as `nickname`. Polls
    /// arriving on the connection are answered by `service`.
    async fn connect(
        &self,
        addr: &str,
        nickname: &str,
        service: Arc<dyn StatsService>,
    ) -> Result<ProviderSession, TransportError>;
}

/// A provider's live registration with a gatherer.
#[derive(Debug)]
pub struct ProviderSession {
    identity: ProviderId,
    task: JoinHandle<Result<(), TransportError>>,
}

impl ProviderSession {
    pub(crate) fn new(identity: ProviderId, task: JoinHandle<Result<(), TransportError>>) -> Self {
        Self { identity, task }
    }

    /// Identity the gatherer registered this node under.
    #[must_use]
    pub fn identity(&self) -> &ProviderId {
        &self.identity
    }

    /// Wait until the gatherer connection ends.
    pub async fn closed(self) -> Result<(), TransportError> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Disconnected),
        }
    }

    /// Drop the connection.
    pub fn close(self) {
        self.task.abort();
    }
}

/// Once-only disconnect notification shared by the link implementations.
#[derive(Default)]
pub(crate) struct DisconnectNotifier {
    fired: bool,
    handlers: Vec<DisconnectHandler>,
}

impl DisconnectNotifier {
    /// Queue `handler`, or hand it back if the connection is already gone.
    pub(crate) fn register(&mut self, handler: DisconnectHandler) -> Option<DisconnectHandler> {
        if self.fired {
            return Some(handler);
        }
        self.handlers.push(handler);
        None
    }

    /// Mark the connection lost and take the queued handlers. Later calls
    /// return nothing.
    pub(crate) fn fire(&mut self) -> Vec<DisconnectHandler> {
        if self.fired {
            return Vec::new();
        }
        self.fired = true;
        std::mem::take(&mut self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notifier_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut notifier = DisconnectNotifier::default();

        let c = Arc::clone(&count);
        assert!(notifier
            .register(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .is_none());

        for handler in notifier.fire() {
            handler();
        }
        assert!(notifier.fire().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_is_returned() {
        let mut notifier = DisconnectNotifier::default();
        notifier.fire();
        let late = notifier.register(Box::new(|| {}));
        assert!(late.is_some());
    }
}
