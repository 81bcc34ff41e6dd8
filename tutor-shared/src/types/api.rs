use serde::{Deserialize, Serialize};

/// Error body returned by the backend (`{"detail": "..."}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub detail: serde_json::Value,
}

impl ApiErrorBody {
    /// Human-readable message; validation errors carry a list instead of a
    /// string, which is rendered as compact JSON.
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Plain acknowledgment returned by mutating endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_detail() {
        let body: ApiErrorBody = serde_json::from_str(r#"{"detail":"Room not found"}"#).unwrap();
        assert_eq!(body.message(), "Room not found");
    }

    #[test]
    fn structured_detail() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"detail":[{"loc":["body","companion_id"]}]}"#).unwrap();
        assert!(body.message().contains("companion_id"));
    }
}
