//! Table of connected providers.
//!
//! Keyed by [`ProviderId`], so a node that reconnects replaces its own
//! record instead of adding a second one. Every record also carries the
//! [`ConnectionHandle`] of the connection that created it, and removal is
//! keyed by that handle: when an old connection's disconnect notification
//! arrives after the node has already reconnected, it finds a different
//! handle and leaves the live record alone.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::GathererError;
use crate::identity::ProviderId;
use crate::transport::ProviderLink;

/// Opaque per-connection handle, unique within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A registered provider.
#[derive(Clone)]
pub struct ProviderRecord {
    pub handle: ConnectionHandle,
    pub identity: ProviderId,
    pub nickname: String,
    pub link: Arc<dyn ProviderLink>,
}

impl fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .field("nickname", &self.nickname)
            .finish_non_exhaustive()
    }
}

/// Registry of live provider connections.
#[derive(Default)]
pub struct ProviderRegistry {
    records: Mutex<BTreeMap<ProviderId, ProviderRecord>>,
    next_handle: AtomicU64,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the provider behind `link`, replacing any earlier record for
    /// the same identity. Links without an identity are refused.
    pub fn register(
        &self,
        link: Arc<dyn ProviderLink>,
        nickname: &str,
    ) -> Result<ProviderRecord, GathererError> {
        let identity = link.identity().ok_or_else(|| GathererError::Unauthenticated {
            nickname: nickname.to_string(),
        })?;

        let record = ProviderRecord {
            handle: ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed)),
            identity: identity.clone(),
            nickname: nickname.to_string(),
            link,
        };

        let replaced = self.records.lock().insert(identity.clone(), record.clone());
        match replaced {
            Some(old) => info!(
                %identity,
                nickname,
                old = %old.handle,
                new = %record.handle,
                "provider reconnected"
            ),
            None => debug!(%identity, nickname, handle = %record.handle, "provider registered"),
        }
        Ok(record)
    }

    /// Remove the record for `identity` if it still belongs to `handle`.
    pub fn remove(&self, identity: &ProviderId, handle: ConnectionHandle) -> Option<ProviderRecord> {
        let mut records = self.records.lock();
        match records.get(identity) {
            Some(current) if current.handle == handle => records.remove(identity),
            Some(current) => {
                debug!(
                    %identity,
                    stale = %handle,
                    live = %current.handle,
                    "ignoring disconnect of replaced connection"
                );
                None
            }
            None => None,
        }
    }

    #[must_use]
    pub fn get(&self, identity: &ProviderId) -> Option<ProviderRecord> {
        self.records.lock().get(identity).cloned()
    }

    /// Point-in-time copy of all records, in identity order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProviderRecord> {
        self.records.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
