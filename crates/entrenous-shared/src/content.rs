//! Wire content taxonomy.
//!
//! Chat payloads arrive as loosely shaped JSON: an object carrying one of
//! `sticker_id` / `emoji` / `text` / `encryptedContent`+`nonce`, or a bare
//! string from older history entries. [`Content::decode`] classifies a
//! payload by shape; malformed input degrades to a visible placeholder
//! instead of failing the pipeline.

use serde_json::{json, Value};

use crate::constants::PLACEHOLDER_UNRECOGNIZED;

/// A decoded chat payload. Exactly one variant is ever active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text { body: String },
    Sticker { sticker_id: String },
    Emoji { glyph: String },
    Encrypted { ciphertext: Vec<u8>, nonce: Vec<u8> },
}

impl Content {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Sentinel for payloads that match no known shape.
    pub fn unrecognized() -> Self {
        Self::text(PLACEHOLDER_UNRECOGNIZED)
    }

    /// Classify a wire payload by shape.
    ///
    /// The priority order is fixed: `sticker_id`, then `emoji`, then `text`,
    /// then the encrypted envelope, then the unrecognized sentinel. A
    /// well-formed producer never populates more than one of these, but a
    /// payload that does is still decoded deterministically.
    pub fn decode(payload: &Value) -> Self {
        if let Some(obj) = payload.as_object() {
            if let Some(sticker_id) = sticker_id_field(obj.get("sticker_id")) {
                return Self::Sticker { sticker_id };
            }
            if let Some(glyph) = obj.get("emoji").and_then(Value::as_str) {
                return Self::Emoji {
                    glyph: glyph.to_string(),
                };
            }
            if let Some(body) = obj.get("text").and_then(Value::as_str) {
                return Self::text(body);
            }
            if let (Some(ciphertext), Some(nonce)) = (
                obj.get("encryptedContent").and_then(Value::as_str),
                obj.get("nonce").and_then(Value::as_str),
            ) {
                if let (Ok(ciphertext), Ok(nonce)) =
                    (base64_decode(ciphertext), base64_decode(nonce))
                {
                    return Self::Encrypted { ciphertext, nonce };
                }
            }
        } else if let Some(body) = payload.as_str() {
            return Self::text(body);
        }

        Self::unrecognized()
    }

    /// Inverse of [`Content::decode`]. `Encrypted` re-emits the wire-ready
    /// envelope shape unchanged.
    pub fn encode(&self) -> Value {
        match self {
            Self::Text { body } => json!({ "text": body }),
            Self::Sticker { sticker_id } => json!({ "sticker_id": sticker_id }),
            Self::Emoji { glyph } => json!({ "emoji": glyph }),
            Self::Encrypted { ciphertext, nonce } => json!({
                "encryptedContent": base64_encode(ciphertext),
                "nonce": base64_encode(nonce),
            }),
        }
    }
}

// Early history entries stored sticker ids as integers.
fn sticker_id_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
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
    STANDARD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_object() {
        let content = Content::decode(&json!({ "text": "salut" }));
        assert_eq!(content, Content::text("salut"));
    }

    #[test]
    fn test_decode_bare_string() {
        let content = Content::decode(&json!("plain old string"));
        assert_eq!(content, Content::text("plain old string"));
    }

    #[test]
    fn test_decode_sticker() {
        let content = Content::decode(&json!({ "sticker_id": "cat_1" }));
        assert_eq!(
            content,
            Content::Sticker {
                sticker_id: "cat_1".to_string()
            }
        );
    }

    #[test]
    fn test_decode_legacy_integer_sticker_id() {
        let content = Content::decode(&json!({ "sticker_id": 7 }));
        assert_eq!(
            content,
            Content::Sticker {
                sticker_id: "7".to_string()
            }
        );
    }

    #[test]
    fn test_decode_emoji() {
        let content = Content::decode(&json!({ "emoji": "😀" }));
        assert_eq!(
            content,
            Content::Emoji {
                glyph: "😀".to_string()
            }
        );
    }

    #[test]
    fn test_sticker_takes_precedence_over_emoji() {
        let content = Content::decode(&json!({ "sticker_id": "x", "emoji": "😀" }));
        assert_eq!(
            content,
            Content::Sticker {
                sticker_id: "x".to_string()
            }
        );
    }

    #[test]
    fn test_emoji_takes_precedence_over_text() {
        let content = Content::decode(&json!({ "emoji": "🔥", "text": "hello" }));
        assert_eq!(
            content,
            Content::Emoji {
                glyph: "🔥".to_string()
            }
        );
    }

    #[test]
    fn test_decode_encrypted() {
        let payload = json!({
            "encryptedContent": base64_encode(b"ciphertext"),
            "nonce": base64_encode(&[7u8; 24]),
        });
        let content = Content::decode(&payload);
        assert_eq!(
            content,
            Content::Encrypted {
                ciphertext: b"ciphertext".to_vec(),
                nonce: vec![7u8; 24],
            }
        );
    }

    #[test]
    fn test_decode_encrypted_bad_base64_is_unrecognized() {
        let payload = json!({ "encryptedContent": "not!!base64", "nonce": "also bad" });
        assert_eq!(Content::decode(&payload), Content::unrecognized());
    }

    #[test]
    fn test_decode_unknown_shapes_are_unrecognized() {
        assert_eq!(Content::decode(&json!(42)), Content::unrecognized());
        assert_eq!(Content::decode(&json!(null)), Content::unrecognized());
        assert_eq!(Content::decode(&json!(["a", "b"])), Content::unrecognized());
        assert_eq!(
            Content::decode(&json!({ "unrelated": true })),
            Content::unrecognized()
        );
    }

    #[test]
    fn test_encode_wire_shapes() {
        assert_eq!(Content::text("hi").encode(), json!({ "text": "hi" }));
        assert_eq!(
            Content::Sticker {
                sticker_id: "cat_1".to_string()
            }
            .encode(),
            json!({ "sticker_id": "cat_1" })
        );
        assert_eq!(
            Content::Emoji {
                glyph: "😀".to_string()
            }
            .encode(),
            json!({ "emoji": "😀" })
        );
    }

    #[test]
    fn test_encode_encrypted_passes_through() {
        let original = Content::Encrypted {
            ciphertext: vec![1, 2, 3, 4],
            nonce: vec![9u8; 24],
        };
        let wire = original.encode();
        assert!(wire.get("encryptedContent").is_some());
        assert_eq!(Content::decode(&wire), original);
    }
}
