// Shared chat building blocks: content codec, session keys, crypto engine.

pub mod constants;
pub mod content;
pub mod crypto;
pub mod error;
pub mod keys;

pub use content::Content;
pub use crypto::{decrypt_from, encrypt_for, SealedBox};
pub use error::{CryptoError, KeyError};
pub use keys::KeyStore;
