//! Durable snapshot of the latest stats per provider.
//!
//! The whole mapping is rewritten on every successful poll. Writes go to
//! `<path>.tmp`, are fsynced, and are then renamed over the canonical file,
//! so a reader (or a restarted gatherer) only ever sees a complete old or a
//! complete new snapshot. A leftover temp file from an interrupted write is
//! never read and is overwritten by the next persist.
//!
//! ```text
//!   record() ─► entries (in memory) ─► serialize ─► stats.json.tmp
//!                                                     │ sync_all
//!                                                     ▼
//!                                        rename ─► stats.json
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{SinkError, StoreError};
use crate::gatherer::ResultSink;
use crate::identity::ProviderId;
use crate::stats::StatsReport;

/// Latest successful poll of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatheredEntry {
    /// Unix time of the poll, in seconds.
    pub timestamp: f64,
    pub nickname: String,
    pub stats: StatsReport,
}

/// Identity to latest entry. Entries are never expired.
pub type GatheredStats = BTreeMap<ProviderId, GatheredEntry>;

/// File-backed [`GatheredStats`].
pub struct SnapshotStore {
    path: PathBuf,
    // Held across the persist so only one write is in flight.
    entries: Mutex<GatheredStats>,
}

impl SnapshotStore {
    /// Open the store at `path`, seeding it from the canonical file if one
    /// exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = Self::load(&path).await?;
        info!(path = %path.display(), providers = entries.len(), "snapshot store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Read the canonical file. A missing file is an empty snapshot.
    pub async fn load(path: &Path) -> Result<GatheredStats, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(GatheredStats::new()),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write `entries` to `path` through the temp file.
    pub async fn persist(path: &Path, entries: &GatheredStats) -> Result<(), StoreError> {
        let mut encoded = serde_json::to_vec_pretty(entries)?;
        encoded.push(b'\n');

        let tmp = Self::temp_path(path);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&encoded)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        debug!(path = %path.display(), providers = entries.len(), "snapshot persisted");
        Ok(())
    }

    /// `<path>.tmp`, next to the canonical file.
    #[must_use]
    pub fn temp_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Record a successful poll and persist the whole mapping.
    ///
    /// The in-memory entry is updated even when the write fails; the next
    /// successful persist catches the file up.
    pub async fn record(
        &self,
        identity: &ProviderId,
        nickname: &str,
        stats: StatsReport,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            identity.clone(),
            GatheredEntry {
                timestamp: unix_now(),
                nickname: nickname.to_string(),
                stats,
            },
        );
        Self::persist(&self.path, &entries).await
    }

    /// Copy of the in-memory mapping.
    pub async fn entries(&self) -> GatheredStats {
        self.entries.lock().await.clone()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[async_trait]
impl ResultSink for SnapshotStore {
    async fn got_stats(
        &self,
        identity: &ProviderId,
        nickname: &str,
        report: StatsReport,
    ) -> Result<(), SinkError> {
        self.record(identity, nickname, report).await?;
        Ok(())
    }

    fn provider_connected(&self, identity: &ProviderId, nickname: &str) {
        info!(%identity, nickname, "provider connected");
    }

    fn provider_disconnected(&self, identity: &ProviderId, nickname: &str) {
        info!(%identity, nickname, "provider disconnected");
    }
}
