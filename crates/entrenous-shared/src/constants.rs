/// Application name
pub const APP_NAME: &str = "Entre Nous";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Key derivation context (BLAKE3) for the per-pair message key
pub const KDF_CONTEXT_MESSAGE_KEY: &str = "entrenous-message-key-v1";

/// Sticker id the backend substitutes when it cannot resolve one.
/// Sends carrying this id are rejected client-side.
pub const STICKER_ID_UNKNOWN: &str = "unknown";

/// Transcript placeholder for content whose shape matches no known variant
pub const PLACEHOLDER_UNRECOGNIZED: &str = "[unrecognized]";

/// Transcript placeholder when a ciphertext fails authentication
pub const PLACEHOLDER_UNDECRYPTABLE: &str = "[undecryptable]";

/// Transcript placeholder when the sender never announced a public key
pub const PLACEHOLDER_MISSING_KEY: &str = "[missing key]";

/// How long a notice stays on the board, in milliseconds
pub const NOTICE_TTL_MS: u64 = 5000;
