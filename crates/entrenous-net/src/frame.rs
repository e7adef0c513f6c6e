//! Wire frames for the realtime channel.
//!
//! Every frame is one JSON text message with a `type` tag and a sparse set
//! of optional fields. Unrecognized tags map to [`FrameKind::Unknown`] so a
//! newer server cannot break dispatch.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame `type` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameKind {
    Message,
    Sticker,
    Users,
    Notification,
    PublicKey,
    History,
    Session,
    #[serde(other)]
    Unknown,
}

/// One channel frame. Only the fields relevant to a given tag are present;
/// everything else stays off the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Addressee of a per-recipient encrypted copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<HistoryEntry>>,
}

/// One persisted message, as returned by the history endpoint or carried
/// inside a `history` frame. Stored extras such as the `type` tag are
/// ignored on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Frame {
    fn bare(kind: FrameKind) -> Self {
        Self {
            kind,
            username: None,
            recipient: None,
            content: None,
            room_id: None,
            timestamp: None,
            users: None,
            session_id: None,
            public_key: None,
            messages: None,
        }
    }

    /// Key announcement written as the first frame after the socket opens.
    pub fn public_key_announcement(username: &str, room_id: &str, public_key_base64: &str) -> Self {
        let mut frame = Self::bare(FrameKind::PublicKey);
        frame.username = Some(username.to_string());
        frame.room_id = Some(room_id.to_string());
        frame.public_key = Some(public_key_base64.to_string());
        frame
    }

    /// Outbound message frame. `recipient` names the addressee of an
    /// encrypted copy and stays `None` for plaintext payloads.
    pub fn message(username: &str, room_id: &str, content: Value, recipient: Option<&str>) -> Self {
        let mut frame = Self::outbound(FrameKind::Message, username, room_id, content);
        frame.recipient = recipient.map(str::to_string);
        frame
    }

    /// Outbound sticker frame. Stickers travel in the clear.
    pub fn sticker(username: &str, room_id: &str, content: Value) -> Self {
        Self::outbound(FrameKind::Sticker, username, room_id, content)
    }

    fn outbound(kind: FrameKind, username: &str, room_id: &str, content: Value) -> Self {
        let mut frame = Self::bare(kind);
        frame.username = Some(username.to_string());
        frame.room_id = Some(room_id.to_string());
        frame.content = Some(content);
        frame.timestamp = Some(Utc::now().to_rfc3339());
        frame
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Parse a wire timestamp. Accepts RFC 3339 and the naive ISO form some
/// backends emit (taken as UTC); anything else falls back to the arrival
/// instant.
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    match raw {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|parsed| parsed.and_utc())
            })
            .unwrap_or_else(|_| Utc::now()),
        None => Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::message("alice", "room-1", json!({"text": "hi"}), Some("bob"));
        let encoded = frame.to_json().unwrap();
        let decoded = Frame::from_json(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_unknown_tag_does_not_fail() {
        let frame = Frame::from_json(r#"{"type": "presence", "username": "bob"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Unknown);
        assert_eq!(frame.username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let frame = Frame::public_key_announcement("alice", "room-1", "QUJD");
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "publicKey");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["roomId"], "room-1");
        assert_eq!(value["publicKey"], "QUJD");
    }

    #[test]
    fn test_absent_fields_stay_off_the_wire() {
        let frame = Frame::sticker("alice", "room-1", json!({"sticker_id": "wave"}));
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert!(value.get("users").is_none());
        assert!(value.get("publicKey").is_none());
        assert!(value.get("recipient").is_none());
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn test_users_frame_parses() {
        let frame =
            Frame::from_json(r#"{"type": "users", "users": ["alice", "bob"], "roomId": "room-1"}"#)
                .unwrap();
        assert_eq!(frame.kind, FrameKind::Users);
        assert_eq!(
            frame.users,
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
    }

    #[test]
    fn test_notification_carries_bare_string_content() {
        let frame =
            Frame::from_json(r#"{"type": "notification", "content": "bob has joined the chat"}"#)
                .unwrap();
        assert_eq!(frame.kind, FrameKind::Notification);
        assert_eq!(frame.content, Some(json!("bob has joined the chat")));
    }

    #[test]
    fn test_history_entry_ignores_stored_extras() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "type": "message",
            "username": "bob",
            "content": {"text": "old"},
            "timestamp": "2024-05-01T12:00:00"
        }))
        .unwrap();
        assert_eq!(entry.username, "bob");
        assert_eq!(entry.content, json!({"text": "old"}));
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let parsed = parse_timestamp(Some("2024-05-01T12:00:00+02:00"));
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_timestamp_naive_iso_is_utc() {
        let parsed = parse_timestamp(Some("2024-05-01T12:00:00.250000"));
        assert_eq!(
            parsed.timestamp_millis(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
                .unwrap()
                .timestamp_millis()
                + 250
        );
    }

    #[test]
    fn test_parse_timestamp_garbage_falls_back_to_now() {
        let before = Utc::now();
        let parsed = parse_timestamp(Some("yesterday-ish"));
        assert!(parsed >= before);
        assert!(parsed <= Utc::now());
    }
}
