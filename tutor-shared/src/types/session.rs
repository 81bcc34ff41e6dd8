use serde::{Deserialize, Serialize};

use super::CompanionRef;

/// One past tutoring session, as listed on the history page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub room_id: String,
    pub companion: CompanionRef,
    pub started_at: f64,
    #[serde(default)]
    pub ended_at: Option<f64>,
    pub duration_seconds: u64,
    pub message_count: u64,
    #[serde(default)]
    pub transcript_preview: String,
}

impl SessionSummary {
    /// `mm:ss` rendering of the duration.
    pub fn duration_label(&self) -> String {
        format!("{:02}:{:02}", self.duration_seconds / 60, self.duration_seconds % 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub sessions: Vec<SessionSummary>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTranscript {
    pub session_id: String,
    pub room_id: String,
    pub messages: Vec<TranscriptMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_parses_and_formats_duration() {
        let json = r#"{"sessions":[{
            "session_id":"s1","room_id":"r1",
            "companion":{"id":"tutor_math_ada","name":"Professor Ada Lovelace","avatar_url":"https://x"},
            "started_at":1700000000.0,"ended_at":1700000125.0,
            "duration_seconds":125,"message_count":6,"transcript_preview":"hi"
        }],"total":1}"#;
        let history: SessionHistory = serde_json::from_str(json).unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.sessions[0].duration_label(), "02:05");
        assert_eq!(history.sessions[0].companion.name, "Professor Ada Lovelace");
    }
}
