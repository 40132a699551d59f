//! Error types for the stats provider/gatherer pair.
//!
//! Each concern gets its own enum so callers can tell a per-poll transport
//! failure (isolated, dropped) apart from a persistence failure (surfaced to
//! the operator) without string matching.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the local stats registry.
#[derive(Debug, Error)]
pub enum StatsError {
    /// A producer was registered without a usable name.
    #[error("stats producer must have a non-empty name")]
    UnnamedProducer,
}

/// Errors raised by a transport while talking to a remote peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was lost before or during the call.
    #[error("connection lost")]
    Disconnected,

    /// The remote side answered the call with an application error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The peer sent a frame that does not fit the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The gatherer refused the registration.
    #[error("registration rejected: {0}")]
    Rejected(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An I/O error from the underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the gatherer registry.
#[derive(Debug, Error)]
pub enum GathererError {
    /// The connection carries no authenticated identity, so nothing can be
    /// attributed to it.
    #[error("cannot derive an identity for provider {nickname:?}")]
    Unauthenticated { nickname: String },
}

/// Errors raised by the durable snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the snapshot file failed.
    #[error("snapshot io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The canonical snapshot file exists but does not parse.
    #[error("corrupt snapshot file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory mapping could not be serialized.
    #[error("cannot encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by a result sink while accepting a poll result.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Persisting the result failed; durability is lost until this clears.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the expected schema.
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value is present but unusable.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
