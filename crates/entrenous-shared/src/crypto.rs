use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use x25519_dalek::PublicKey;

use crate::constants::{KDF_CONTEXT_MESSAGE_KEY, NONCE_SIZE};
use crate::error::CryptoError;
use crate::keys::KeyStore;

pub type SymmetricKey = [u8; 32];

/// Ciphertext plus the nonce it was sealed under. Both travel base64-encoded
/// inside the encrypted content envelope.
#[derive(Debug, Clone)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seal a plaintext for one recipient.
///
/// A fresh nonce is drawn on every call, so sealing the same plaintext for
/// two recipients (or twice for the same one) never repeats ciphertext.
pub fn encrypt_for(
    keys: &KeyStore,
    recipient: &PublicKey,
    plaintext: &[u8],
) -> Result<SealedBox, CryptoError> {
    let key = message_key(keys, recipient);
    let cipher = XChaCha20Poly1305::new((&key).into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(SealedBox {
        ciphertext,
        nonce: nonce_bytes,
    })
}

/// Open a sealed payload from a known sender.
///
/// Fails when the ciphertext does not authenticate under the key pair, which
/// covers tampering, a wrong sender key, and stale local keys alike.
pub fn decrypt_from(
    keys: &KeyStore,
    sender: &PublicKey,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let key = message_key(keys, sender);
    let cipher = XChaCha20Poly1305::new((&key).into());

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// X25519 shared secret run through the BLAKE3 KDF with domain separation.
// Symmetric in the two parties, so either side derives the same key.
fn message_key(keys: &KeyStore, remote: &PublicKey) -> SymmetricKey {
    let shared = keys.secret().diffie_hellman(remote);
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_MESSAGE_KEY);
    hasher.update(shared.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}
