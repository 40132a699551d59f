//! Gatherer side: accepts provider registrations and polls them.
//!
//! ```text
//!   transport (tcp::serve / memory)
//!        │ handle_provide(link, nickname)
//!        ▼
//!  ┌──────────────┐  snapshot  ┌───────────────┐ got_stats ┌────────────┐
//!  │ Provider     │ ─────────► │ PollScheduler │ ────────► │ ResultSink │
//!  │ Registry     │            │  (interval)   │           │ (store /   │
//!  └──────────────┘            └───────────────┘           │  console)  │
//!        ▲  remove(identity, handle)                       └────────────┘
//!        └── link disconnect
//! ```

pub mod publish;
pub mod registry;
pub mod scheduler;
pub mod sink;

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::GathererError;
use crate::transport::ProviderLink;

pub use publish::{ADDR_FILE, PORTNUM_FILE, publish_address, resolve_listen_addr};
pub use registry::{ConnectionHandle, ProviderRecord, ProviderRegistry};
pub use scheduler::{PollScheduler, SchedulerHandle, SweepReport};
pub use sink::{ConsoleSink, ResultSink};

/// Registration endpoint plus poll loop.
pub struct Gatherer {
    registry: Arc<ProviderRegistry>,
    sink: Arc<dyn ResultSink>,
    scheduler: Arc<PollScheduler>,
}

impl Gatherer {
    pub fn new(sink: Arc<dyn ResultSink>, poll_interval: Duration) -> Self {
        let registry = Arc::new(ProviderRegistry::new());
        let scheduler = Arc::new(PollScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
            poll_interval,
        ));
        Self {
            registry,
            sink,
            scheduler,
        }
    }

    /// Register the provider on `link`.
    ///
    /// Unauthenticated links are refused and left untouched; the caller
    /// decides whether to close them. On success the record is removed again
    /// when the link disconnects, unless the same identity has re-registered
    /// on a newer connection in the meantime.
    pub fn handle_provide(
        &self,
        link: Arc<dyn ProviderLink>,
        nickname: &str,
    ) -> Result<ProviderRecord, GathererError> {
        let record = match self.registry.register(Arc::clone(&link), nickname) {
            Ok(record) => record,
            Err(e) => {
                warn!(nickname, error = %e, "refusing provider registration");
                return Err(e);
            }
        };
        self.sink
            .provider_connected(&record.identity, &record.nickname);

        let registry: Weak<ProviderRegistry> = Arc::downgrade(&self.registry);
        let sink = Arc::clone(&self.sink);
        let identity = record.identity.clone();
        let nickname = record.nickname.clone();
        let handle = record.handle;
        link.on_disconnect(Box::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.remove(&identity, handle).is_some() {
                sink.provider_disconnected(&identity, &nickname);
            } else {
                debug!(%identity, %handle, "stale disconnect ignored");
            }
        }));

        Ok(record)
    }

    /// Start periodic polling.
    pub fn start(&self) -> SchedulerHandle {
        Arc::clone(&self.scheduler).start()
    }

    /// Run one poll sweep now.
    pub async fn sweep(&self) -> SweepReport {
        self.scheduler.sweep().await
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.scheduler.interval()
    }
}
