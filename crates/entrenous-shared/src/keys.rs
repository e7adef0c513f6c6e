//! Session key material.
//!
//! One X25519 key pair lives for the duration of a session, next to the
//! table of peer public keys learned from announcement frames. The private
//! half never leaves this store; the whole store is discarded when the
//! session closes.

use std::collections::HashMap;

use rand::rngs::OsRng;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::PUBKEY_SIZE;
use crate::error::KeyError;

pub struct KeyStore {
    secret: StaticSecret,
    public: PublicKey,
    peers: HashMap<String, PublicKey>,
}

impl KeyStore {
    /// Generate a fresh session key pair from the OS generator.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            peers: HashMap::new(),
        }
    }

    /// Get the local public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The local public key, base64-encoded for the announcement frame.
    pub fn public_key_base64(&self) -> String {
        base64_encode(self.public.as_bytes())
    }

    /// Record a peer's announced public key (base64, 32 bytes).
    ///
    /// Idempotent upsert; a re-announcement overwrites the previous key.
    pub fn record_peer_key(&mut self, identity: &str, key_base64: &str) -> Result<(), KeyError> {
        let bytes = base64_decode(key_base64).map_err(|_| KeyError::InvalidEncoding)?;
        if bytes.len() != PUBKEY_SIZE {
            return Err(KeyError::InvalidLength {
                expected: PUBKEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut raw = [0u8; PUBKEY_SIZE];
        raw.copy_from_slice(&bytes);

        debug!(
            peer = %identity,
            key = %hex::encode(&raw[..4]),
            "Recording peer public key"
        );
        self.peers.insert(identity.to_string(), PublicKey::from(raw));
        Ok(())
    }

    /// Look up a peer's key. Checked before any encrypted send to them.
    pub fn peer_key(&self, identity: &str) -> Option<&PublicKey> {
        self.peers.get(identity)
    }

    /// Number of peers with a known key.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(s.trim())
}
