//! Node keys and the provider identities derived from them.
//!
//! Every provider node owns a random 32-byte key kept in a file next to its
//! other state. The gatherer never sees anything but a fingerprint of that
//! key, which is what the snapshot store and the registry are keyed by. The
//! same node therefore keeps the same identity across reconnects and
//! restarts, and two nodes never share one.

use std::fmt;
use std::io;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a node key in bytes.
pub const NODE_KEY_LEN: usize = 32;

/// Number of fingerprint bytes kept in a [`ProviderId`].
const FINGERPRINT_LEN: usize = 16;

/// Stable identity of a provider node: hex fingerprint of its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Wrap an identity string that was derived elsewhere.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fingerprint a public key.
    #[must_use]
    pub fn from_key_bytes(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        Self(hex::encode(&digest[..FINGERPRINT_LEN]))
    }

    /// Identity for a hex-encoded key as presented in a hello frame, or
    /// `None` when the key is missing or malformed.
    #[must_use]
    pub fn from_presented_key(node_key: Option<&str>) -> Option<Self> {
        node_key
            .and_then(NodeKey::from_hex)
            .map(|key| key.fingerprint())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node's persistent key.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeKey([u8; NODE_KEY_LEN]);

impl NodeKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; NODE_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; NODE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex key; anything but exactly [`NODE_KEY_LEN`] bytes is
    /// rejected.
    #[must_use]
    pub fn from_hex(encoded: &str) -> Option<Self> {
        let bytes = hex::decode(encoded.trim()).ok()?;
        let bytes: [u8; NODE_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn fingerprint(&self) -> ProviderId {
        ProviderId::from_key_bytes(&self.0)
    }

    /// Read the key stored at `path`, creating a fresh one if the file does
    /// not exist yet.
    pub fn load_or_generate(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_hex(&contents).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} does not contain a valid node key", path.display()),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let key = Self::generate();
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(path, format!("{}\n", key.to_hex()))?;
                tracing::info!(path = %path.display(), identity = %key.fingerprint(), "generated node key");
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeKey").field(&self.fingerprint()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_deterministic_and_unique() {
        let a = NodeKey::from_bytes([1; NODE_KEY_LEN]);
        let b = NodeKey::from_bytes([1; NODE_KEY_LEN]);
        let c = NodeKey::from_bytes([2; NODE_KEY_LEN]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), FINGERPRINT_LEN * 2);
    }

    #[test]
    fn test_presented_key_validation() {
        let key = NodeKey::generate();
        assert_eq!(
            ProviderId::from_presented_key(Some(&key.to_hex())),
            Some(key.fingerprint())
        );
        assert_eq!(ProviderId::from_presented_key(None), None);
        assert_eq!(ProviderId::from_presented_key(Some("not hex")), None);
        assert_eq!(ProviderId::from_presented_key(Some("abcd")), None);
    }

    #[test]
    fn test_load_or_generate_persists_key() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("keys").join("node.key");

        let first = NodeKey::load_or_generate(&path).unwrap();
        let second = NodeKey::load_or_generate(&path).unwrap();
        assert_eq!(first, second);
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_key_file_is_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("node.key");
        std::fs::write(&path, "garbage").unwrap();
        let err = NodeKey::load_or_generate(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = NodeKey::from_bytes([7; NODE_KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains(&key.to_hex()));
    }
}
