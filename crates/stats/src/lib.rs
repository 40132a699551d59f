//! Distributed stats gathering for Saorsa nodes.
//!
//! Every node runs a **provider**: a [`StatsRegistry`] of counters and stat
//! producers (a [`LoadMonitor`] measuring scheduler delay is always the
//! first), which registers with a **gatherer** under its nickname. The
//! gatherer polls every registered provider on a fixed interval and keeps
//! the latest answer from each in a durable JSON snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────┐            ┌──────────────────────────────────┐
//! │ provider node              │            │ gatherer                         │
//! │                            │  register  │                                  │
//! │  ProviderConnector ────────┼───────────►│  Gatherer::handle_provide        │
//! │    └─ Dialer (tcp/memory)  │            │    └─ ProviderRegistry           │
//! │                            │            │         (identity -> record)     │
//! │  StatsRegistry             │  get_stats │                                  │
//! │   ├─ counters              │◄───────────┼── PollScheduler (every 60s)      │
//! │   └─ producers             │───────────►│      └─ ResultSink               │
//! │       └─ LoadMonitor       │   report   │          ├─ SnapshotStore        │
//! │           └─ SlidingWindow │            │          │   stats.json          │
//! └────────────────────────────┘            │          └─ ConsoleSink          │
//!                                           └──────────────────────────────────┘
//! ```
//!
//! Providers are identified by a fingerprint of their node key
//! ([`ProviderId`]), not by nickname, so a reconnecting node replaces its
//! own entry and two nodes with the same nickname stay apart.
//!
//! # Usage
//!
//! ```bash
//! saorsa-stats gatherer --listen 0.0.0.0:7000 --data-dir ./gatherer
//! saorsa-stats provider --gatherer "$(cat ./gatherer/gatherer.addr)" --nickname node-1
//! ```

pub mod config;
pub mod error;
pub mod gatherer;
pub mod identity;
pub mod load_monitor;
pub mod logging;
pub mod provider;
pub mod sampler;
pub mod stats;
pub mod store;
pub mod transport;

pub use config::{GathererConfig, LoadMonitorConfig, ProviderConfig, StatsConfig};
pub use error::{ConfigError, GathererError, SinkError, StatsError, StoreError, TransportError};
pub use gatherer::{
    ConnectionHandle, ConsoleSink, Gatherer, PollScheduler, ProviderRecord, ProviderRegistry,
    ResultSink, SchedulerHandle, SweepReport,
};
pub use identity::{NodeKey, ProviderId};
pub use load_monitor::LoadMonitor;
pub use provider::{ProviderConnector, StatsProvider};
pub use sampler::{SlidingWindow, Summary};
pub use stats::{StatsMap, StatsProducer, StatsRegistry, StatsReport};
pub use store::{GatheredEntry, GatheredStats, SnapshotStore};
pub use transport::{Dialer, ProviderLink, ProviderSession, StatsService};
