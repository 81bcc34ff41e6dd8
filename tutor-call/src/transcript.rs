use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::signaling::protocol::{ChatPayload, Sender};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
            timestamp: Utc::now(),
            audio_url: None,
            video_url: None,
        }
    }

    /// Build an entry from a relayed chat message. A missing or out of range
    /// timestamp falls back to the local receipt time.
    pub fn from_chat(chat: ChatPayload) -> Self {
        let timestamp = chat
            .timestamp
            .and_then(|secs| {
                let millis = (secs * 1000.0) as i64;
                Utc.timestamp_millis_opt(millis).single()
            })
            .unwrap_or_else(Utc::now);

        Self {
            text: chat.message,
            sender: chat.sender,
            timestamp,
            audio_url: chat.audio_url,
            video_url: chat.video_url,
        }
    }

    /// Seconds since the Unix epoch, as sent on the wire.
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp.timestamp_millis() as f64 / 1000.0
    }
}

/// Ordered, append-only conversation log. Order is local receipt order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) -> &TranscriptEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[TranscriptEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(timestamp: Option<f64>) -> ChatPayload {
        ChatPayload {
            room_id: "r".into(),
            message: "Let's look at fractions.".into(),
            sender: Sender::Ai,
            timestamp,
            audio_url: Some("/media/reply.mp3".into()),
            video_url: None,
            from: None,
        }
    }

    #[test]
    fn chat_timestamp_is_kept() {
        let entry = TranscriptEntry::from_chat(chat(Some(1_718_000_000.5)));
        assert_eq!(entry.timestamp.timestamp_millis(), 1_718_000_000_500);
        assert_eq!(entry.epoch_seconds(), 1_718_000_000.5);
        assert_eq!(entry.sender, Sender::Ai);
        assert_eq!(entry.audio_url.as_deref(), Some("/media/reply.mp3"));
    }

    #[test]
    fn missing_timestamp_uses_receipt_time() {
        let before = Utc::now();
        let entry = TranscriptEntry::from_chat(chat(None));
        assert!(entry.timestamp >= before);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut transcript = Transcript::new();
        for i in 0..7 {
            transcript.push(TranscriptEntry::user(format!("m{i}")));
        }
        let tail: Vec<_> = transcript.recent(5).iter().map(|e| e.text.as_str()).collect();
        assert_eq!(tail, ["m2", "m3", "m4", "m5", "m6"]);
        assert_eq!(transcript.recent(50).len(), 7);
    }
}
