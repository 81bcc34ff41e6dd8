use serde::{Deserialize, Serialize};

use crate::transcript::{Transcript, TranscriptEntry};

const TOPIC_KEYWORDS: [&str; 5] = ["math", "science", "programming", "language", "history"];
const RECENT_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Course,
    Material,
    Exercise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub title: String,
    pub description: String,
}

/// Keywords mentioned in `entries`, each at most once, in discovery order.
/// `["general"]` when nothing matches.
pub fn extract_topics(entries: &[TranscriptEntry]) -> Vec<&'static str> {
    let mut found: Vec<&'static str> = Vec::new();
    for entry in entries {
        let text = entry.text.to_lowercase();
        for keyword in TOPIC_KEYWORDS {
            if text.contains(keyword) && !found.contains(&keyword) {
                found.push(keyword);
            }
        }
    }
    if found.is_empty() {
        found.push("general");
    }
    found
}

/// Study suggestions for the current transcript, produced every fifth entry
/// once the conversation is past three entries.
pub fn suggestions_for(transcript: &Transcript) -> Option<Vec<Suggestion>> {
    let len = transcript.len();
    if len <= 3 || len % 5 != 0 {
        return None;
    }

    let topics = extract_topics(transcript.recent(RECENT_WINDOW));
    let topic = topics.first().copied().unwrap_or("general");

    Some(vec![
        Suggestion {
            kind: SuggestionKind::Course,
            title: format!("Advanced {topic}"),
            description: "Deep dive into advanced concepts".into(),
        },
        Suggestion {
            kind: SuggestionKind::Material,
            title: "Practice Exercises".into(),
            description: "Hands-on problems to reinforce learning".into(),
        },
        Suggestion {
            kind: SuggestionKind::Exercise,
            title: "Quick Quiz".into(),
            description: "Test your understanding".into(),
        },
    ])
}
