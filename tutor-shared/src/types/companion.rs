use serde::{Deserialize, Serialize};

/// An AI tutor listed in the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub id: String,
    pub name: String,
    pub description: String,
    pub avatar_url: String,
    pub voice_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Subset of companion fields embedded in session summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}
