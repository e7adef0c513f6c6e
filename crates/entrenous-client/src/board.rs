//! Session-visible output state: the message transcript and the notice
//! board.

use chrono::{DateTime, Utc};

use entrenous_shared::constants::NOTICE_TTL_MS;
use entrenous_shared::Content;

/// One rendered chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: String,
    pub content: Content,
    pub sent_at: DateTime<Utc>,
}

/// Ordered message log for the current room. Replaced wholesale when a
/// history snapshot arrives, appended to as live frames come in.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A transient service notice.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: i64,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

/// Holds notices until their display deadline passes.
#[derive(Debug, Default)]
pub struct Noticeboard {
    notices: Vec<Notice>,
    last_id: i64,
}

impl Noticeboard {
    /// Post a notice and hand back its id. Ids stay strictly increasing
    /// even when two notices land in the same millisecond.
    pub fn post(&mut self, text: impl Into<String>) -> i64 {
        let now = Utc::now();
        let mut id = now.timestamp_millis();
        if id <= self.last_id {
            id = self.last_id + 1;
        }
        self.last_id = id;
        self.notices.push(Notice {
            id,
            text: text.into(),
            posted_at: now,
        });
        id
    }

    /// Drop every notice past its display deadline.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.notices.retain(|notice| {
            now.signed_duration_since(notice.posted_at)
                .num_milliseconds()
                < NOTICE_TTL_MS as i64
        });
    }

    /// Drop one notice by id. Unknown ids are fine.
    pub fn dismiss(&mut self, id: i64) {
        self.notices.retain(|notice| notice.id != id);
    }

    pub fn active(&self) -> &[Notice] {
        &self.notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_notice_ids_strictly_increase() {
        let mut board = Noticeboard::default();
        let first = board.post("one");
        let second = board.post("two");
        let third = board.post("three");
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn test_prune_drops_only_expired_notices() {
        let mut board = Noticeboard::default();
        board.post("short-lived");
        let posted = board.active()[0].posted_at;

        board.prune(posted + Duration::milliseconds(NOTICE_TTL_MS as i64 - 1));
        assert_eq!(board.active().len(), 1);

        board.prune(posted + Duration::milliseconds(NOTICE_TTL_MS as i64));
        assert!(board.active().is_empty());
    }

    #[test]
    fn test_dismiss_removes_one_notice() {
        let mut board = Noticeboard::default();
        let first = board.post("keep");
        let second = board.post("drop");

        board.dismiss(second);
        assert_eq!(board.active().len(), 1);
        assert_eq!(board.active()[0].id, first);

        board.dismiss(9999);
        assert_eq!(board.active().len(), 1);
    }

    #[test]
    fn test_transcript_replace_then_push() {
        let mut transcript = Transcript::default();
        let old = ChatMessage {
            sender: "bob".to_string(),
            content: Content::text("old"),
            sent_at: Utc::now(),
        };
        transcript.replace(vec![old.clone()]);
        transcript.push(ChatMessage {
            sender: "alice".to_string(),
            content: Content::text("new"),
            sent_at: Utc::now(),
        });

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0], old);
    }
}
