//! Provider side: the node's stats registry and its link to a gatherer.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LoadMonitorConfig;
use crate::error::{StatsError, TransportError};
use crate::load_monitor::LoadMonitor;
use crate::stats::{StatsProducer, StatsRegistry};
use crate::transport::{Dialer, ProviderSession, StatsService};

/// A node's stats registry with the load monitor registered as its first
/// producer.
pub struct StatsProvider {
    registry: Arc<StatsRegistry>,
    load_monitor: Arc<LoadMonitor>,
}

impl StatsProvider {
    pub fn new(load_monitor: &LoadMonitorConfig) -> Result<Self, StatsError> {
        let registry = Arc::new(StatsRegistry::new());
        let load_monitor = Arc::new(LoadMonitor::new(load_monitor.clone()));
        registry.register_producer(Arc::clone(&load_monitor) as Arc<dyn StatsProducer>)?;
        Ok(Self {
            registry,
            load_monitor,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<StatsRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn load_monitor(&self) -> &Arc<LoadMonitor> {
        &self.load_monitor
    }

    /// Start the load monitor. Must run inside a tokio runtime.
    pub fn start(&self) {
        self.load_monitor.start();
    }

    pub fn stop(&self) {
        self.load_monitor.stop();
    }
}

/// Registers a node with one gatherer.
///
/// There is a single connection attempt per call. Reconnecting after a
/// failure or a dropped connection is left to whatever supervises the
/// process.
pub struct ProviderConnector {
    dialer: Arc<dyn Dialer>,
    gatherer_addr: String,
    nickname: String,
    service: Arc<dyn StatsService>,
}

impl ProviderConnector {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        gatherer_addr: impl Into<String>,
        nickname: impl Into<String>,
        service: Arc<dyn StatsService>,
    ) -> Self {
        Self {
            dialer,
            gatherer_addr: gatherer_addr.into(),
            nickname: nickname.into(),
            service,
        }
    }

    /// Wait for the transport, then connect and register.
    pub async fn connect(&self) -> Result<ProviderSession, TransportError> {
        self.dialer.when_ready().await?;
        match self
            .dialer
            .connect(&self.gatherer_addr, &self.nickname, Arc::clone(&self.service))
            .await
        {
            Ok(session) => {
                info!(
                    gatherer = %self.gatherer_addr,
                    nickname = %self.nickname,
                    identity = %session.identity(),
                    "connected to stats gatherer"
                );
                Ok(session)
            }
            Err(e) => {
                warn!(
                    gatherer = %self.gatherer_addr,
                    nickname = %self.nickname,
                    error = %e,
                    "failed to connect to stats gatherer"
                );
                Err(e)
            }
        }
    }

    /// Connect and serve polls until the gatherer connection ends.
    pub async fn run(&self) -> Result<(), TransportError> {
        let session = self.connect().await?;
        let result = session.closed().await;
        info!(gatherer = %self.gatherer_addr, "stats gatherer connection closed");
        result
    }
}
