//! Sealed cluster configuration.
//!
//! Cluster access configs (kubeconfig-equivalents) are stored
//! age-encrypted. The orchestrator unseals a config at the activity
//! boundary and drops the plaintext when the activity returns; only the
//! sealed bytes and a fingerprint ever appear in rows or logs.

use std::io::{Read, Write};
use std::path::Path;

use age::secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::ClusterConfig;

#[derive(Debug, Error)]
pub enum SealedError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("invalid sealing key: {0}")]
    Key(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Seals and opens cluster configs with an age x25519 identity.
pub struct ConfigSealer {
    identity: age::x25519::Identity,
    recipient: age::x25519::Recipient,
}

impl ConfigSealer {
    /// Build a sealer from an existing identity.
    pub fn new(identity: age::x25519::Identity) -> Self {
        let recipient = identity.to_public();
        Self {
            identity,
            recipient,
        }
    }

    /// Generate a fresh identity (in-memory stores and tests).
    pub fn generate() -> Self {
        Self::new(age::x25519::Identity::generate())
    }

    /// Parse a sealer from an `AGE-SECRET-KEY-1...` string.
    pub fn from_key_str(key: &str) -> Result<Self, SealedError> {
        let identity = key
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| SealedError::Key(e.to_string()))?;
        Ok(Self::new(identity))
    }

    /// Load the identity from `path`, generating and persisting one if
    /// the file does not exist yet.
    pub fn load_or_generate(path: &Path) -> Result<Self, SealedError> {
        if path.exists() {
            let key = std::fs::read_to_string(path)?;
            return Self::from_key_str(&key);
        }
        let identity = age::x25519::Identity::generate();
        let key = identity.to_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, key.expose_secret().as_bytes())?;
        Ok(Self::new(identity))
    }

    /// Encrypt a cluster config for storage.
    pub fn seal(&self, config: &ClusterConfig) -> Result<Vec<u8>, SealedError> {
        let plaintext = serde_json::to_vec(config)?;

        let encryptor =
            age::Encryptor::with_recipients(vec![Box::new(self.recipient.clone())])
                .ok_or_else(|| SealedError::Encrypt("no valid recipients".to_string()))?;

        let mut sealed = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut sealed)
            .map_err(|e| SealedError::Encrypt(e.to_string()))?;
        writer
            .write_all(&plaintext)
            .map_err(|e| SealedError::Encrypt(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| SealedError::Encrypt(e.to_string()))?;

        Ok(sealed)
    }

    /// Decrypt a sealed cluster config. The caller owns the plaintext
    /// and is expected to drop it at the end of the current operation.
    pub fn open(&self, sealed: &[u8]) -> Result<ClusterConfig, SealedError> {
        let age::Decryptor::Recipients(decryptor) =
            age::Decryptor::new(sealed).map_err(|e| SealedError::Decrypt(e.to_string()))?
        else {
            return Err(SealedError::Decrypt(
                "unexpected decryptor type".to_string(),
            ));
        };

        let mut plaintext = Vec::new();
        let identity: &dyn age::Identity = &self.identity;
        let mut reader = decryptor
            .decrypt(std::iter::once(identity))
            .map_err(|e| SealedError::Decrypt(e.to_string()))?;
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| SealedError::Decrypt(e.to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Short hex fingerprint of sealed bytes, safe to log.
pub fn fingerprint(sealed: &[u8]) -> String {
    let digest = Sha256::digest(sealed);
    hex::encode(&digest[..6])
}
