//! In-process transport.
//!
//! [`MemoryLink`] stands in for a provider connection inside the gatherer,
//! answering polls straight from a [`StatsService`]. Its behaviour can be
//! scripted (fail every call, or hang until disconnected) so scheduler and
//! registry behaviour can be exercised without sockets. [`MemoryDialer`] is
//! the matching provider-side dialer: every successful connect delivers the
//! new link to a [`MemoryInbox`] for the test to hand to a gatherer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{DisconnectHandler, DisconnectNotifier, Dialer, ProviderLink, ProviderSession, StatsService};
use crate::error::TransportError;
use crate::identity::{NodeKey, ProviderId};
use crate::stats::StatsReport;

/// How a [`MemoryLink`] answers `get_stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkBehavior {
    /// Answer from the service.
    Healthy,
    /// Fail every call with a remote error.
    Fail(String),
    /// Never answer; the call resolves only when the link disconnects.
    Hang,
}

/// Gatherer-side link to an in-process provider.
pub struct MemoryLink {
    identity: Option<ProviderId>,
    service: Arc<dyn StatsService>,
    behavior: Mutex<LinkBehavior>,
    closed: watch::Sender<bool>,
    notifier: Mutex<DisconnectNotifier>,
    calls: AtomicUsize,
}

impl MemoryLink {
    pub fn new(identity: Option<ProviderId>, service: Arc<dyn StatsService>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            identity,
            service,
            behavior: Mutex::new(LinkBehavior::Healthy),
            closed,
            notifier: Mutex::new(DisconnectNotifier::default()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: LinkBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Number of `get_stats` calls received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Drop the connection: pending and future calls fail, and disconnect
    /// handlers run (once).
    pub fn disconnect(&self) {
        self.closed.send_replace(true);
        let handlers = self.notifier.lock().fire();
        for handler in handlers {
            handler();
        }
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

#[async_trait]
impl ProviderLink for MemoryLink {
    fn identity(&self) -> Option<ProviderId> {
        self.identity.clone()
    }

    async fn get_stats(&self) -> Result<StatsReport, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let behavior = self.behavior.lock().clone();
        match behavior {
            LinkBehavior::Healthy => self.service.get_stats().map_err(TransportError::Remote),
            LinkBehavior::Fail(message) => Err(TransportError::Remote(message)),
            LinkBehavior::Hang => {
                self.wait_closed().await;
                Err(TransportError::Disconnected)
            }
        }
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        let late = self.notifier.lock().register(handler);
        if let Some(handler) = late {
            handler();
        }
    }
}

/// A connection delivered by [`MemoryDialer`].
pub struct Delivered {
    pub link: Arc<MemoryLink>,
    pub nickname: String,
    pub addr: String,
}

/// Receiving end of a [`MemoryDialer`].
pub struct MemoryInbox {
    rx: mpsc::UnboundedReceiver<Delivered>,
}

impl MemoryInbox {
    pub async fn recv(&mut self) -> Option<Delivered> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivered> {
        self.rx.try_recv().ok()
    }
}

/// Provider-side dialer that connects to an in-process gatherer.
pub struct MemoryDialer {
    key: Option<NodeKey>,
    ready: watch::Sender<bool>,
    refuse: Mutex<Option<String>>,
    attempts: AtomicUsize,
    tx: mpsc::UnboundedSender<Delivered>,
}

impl MemoryDialer {
    /// Dialer that is ready immediately.
    #[must_use]
    pub fn new(key: Option<NodeKey>) -> (Self, MemoryInbox) {
        Self::build(key, true)
    }

    /// Dialer that stays not-ready until [`MemoryDialer::set_ready`].
    #[must_use]
    pub fn gated(key: Option<NodeKey>) -> (Self, MemoryInbox) {
        Self::build(key, false)
    }

    fn build(key: Option<NodeKey>, ready: bool) -> (Self, MemoryInbox) {
        let (ready, _) = watch::channel(ready);
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Self {
            key,
            ready,
            refuse: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            tx,
        };
        (dialer, MemoryInbox { rx })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    /// Make subsequent connects fail with `reason`.
    pub fn refuse(&self, reason: impl Into<String>) {
        *self.refuse.lock() = Some(reason.into());
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn when_ready(&self) -> Result<(), TransportError> {
        let mut ready = self.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::Disconnected)
    }

    async fn connect(
        &self,
        addr: &str,
        nickname: &str,
        service: Arc<dyn StatsService>,
    ) -> Result<ProviderSession, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.refuse.lock().clone() {
            return Err(TransportError::Rejected(reason));
        }

        let identity = self
            .key
            .as_ref()
            .map(NodeKey::fingerprint)
            .ok_or_else(|| TransportError::Rejected("no node key presented".to_string()))?;

        let link = Arc::new(MemoryLink::new(Some(identity.clone()), service));
        let watched = Arc::clone(&link);
        let task = tokio::spawn(async move {
            watched.wait_closed().await;
            Ok(())
        });

        self.tx
            .send(Delivered {
                link,
                nickname: nickname.to_string(),
                addr: addr.to_string(),
            })
            .map_err(|_| TransportError::Disconnected)?;

        Ok(ProviderSession::new(identity, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsRegistry;
    use std::sync::atomic::AtomicBool;

    fn link() -> MemoryLink {
        let registry = StatsRegistry::new();
        registry.increment_counter("x", 1);
        MemoryLink::new(Some(ProviderId::new("p1")), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_healthy_link_answers_from_service() {
        let link = link();
        let report = link.get_stats().await.unwrap();
        assert_eq!(report.counters["x"], 1);
        assert_eq!(link.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_link() {
        let link = link();
        link.set_behavior(LinkBehavior::Fail("boom".to_string()));
        let err = link.get_stats().await.unwrap_err();
        assert!(matches!(err, TransportError::Remote(m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_hanging_call_fails_on_disconnect() {
        let link = Arc::new(link());
        link.set_behavior(LinkBehavior::Hang);

        let caller = Arc::clone(&link);
        let call = tokio::spawn(async move { caller.get_stats().await });
        tokio::task::yield_now().await;
        link.disconnect();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(TransportError::Disconnected)));
    }

    #[tokio::test]
    async fn test_disconnect_handler_runs_once() {
        let link = link();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        link.on_disconnect(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        link.disconnect();
        link.disconnect();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(
            link.get_stats().await,
            Err(TransportError::Disconnected)
        ));

        let late = Arc::new(AtomicBool::new(false));
        let l = Arc::clone(&late);
        link.on_disconnect(Box::new(move || l.store(true, Ordering::SeqCst)));
        assert!(late.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dialer_delivers_link() {
        let key = NodeKey::generate();
        let (dialer, mut inbox) = MemoryDialer::new(Some(key.clone()));
        dialer.when_ready().await.unwrap();

        let session = dialer
            .connect("memory", "node-1", Arc::new(StatsRegistry::new()))
            .await
            .unwrap();
        assert_eq!(session.identity(), &key.fingerprint());

        let delivered = inbox.recv().await.unwrap();
        assert_eq!(delivered.nickname, "node-1");
        assert_eq!(delivered.link.identity(), Some(key.fingerprint()));

        delivered.link.disconnect();
        assert!(session.closed().await.is_ok());
    }
}
