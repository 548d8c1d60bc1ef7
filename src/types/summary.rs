//! Summary schema shared by the response parser, the orchestrator and the store
//!
//! `ImportantChanges` is decoded exactly once, at whichever boundary it enters
//! the process (service response or stored JSON column).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Thread,
    Daily,
    Weekly,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "thread" => Some(Self::Thread),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    /// Length of a digest window in days (`None` for per-thread summaries).
    pub fn period_days(&self) -> Option<i64> {
        match self {
            Self::Thread => None,
            Self::Daily => Some(1),
            Self::Weekly => Some(7),
        }
    }
}

/// Ordinal importance reported by the summarization service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Lenient parse; unknown labels fall back to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

fn lenient_importance<'de, D>(deserializer: D) -> Result<Importance, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Importance::parse_lenient(&s),
        _ => Importance::default(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImportantChanges {
    pub resolution: String,
    pub action_items: Vec<String>,
    pub discussion_summary: String,
    pub thread_type: String,
}

/// Accepts a nested object, a JSON-encoded string, or null.
fn flexible_changes<'de, D>(deserializer: D) -> Result<Option<ImportantChanges>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Structured body returned by the summarization service.
///
/// Older prompts put `resolution`, `action_items`, `discussion_summary` and
/// `thread_type` at the top level; [`SummaryPayload::important_changes`]
/// folds both layouts into one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SummaryPayload {
    pub tldr: String,
    pub key_points: Vec<String>,
    pub subsystems: Vec<String>,
    #[serde(deserialize_with = "flexible_changes", skip_serializing_if = "Option::is_none")]
    pub important_changes: Option<ImportantChanges>,
    #[serde(deserialize_with = "lenient_importance")]
    pub importance: Importance,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resolution: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub discussion_summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thread_type: String,
}

impl SummaryPayload {
    pub fn important_changes(&self) -> ImportantChanges {
        let mut changes = self.important_changes.clone().unwrap_or_default();
        if changes.resolution.is_empty() {
            changes.resolution = self.resolution.clone();
        }
        if changes.action_items.is_empty() {
            changes.action_items = self.action_items.clone();
        }
        if changes.discussion_summary.is_empty() {
            changes.discussion_summary = self.discussion_summary.clone();
        }
        if changes.thread_type.is_empty() {
            changes.thread_type = self.thread_type.clone();
        }
        changes
    }
}

/// Persisted summary row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub kind: SummaryKind,
    pub thread_id: Option<i64>,
    pub period_start: Option<NaiveDate>,
    pub tldr: String,
    pub key_points: Vec<String>,
    pub important_changes: ImportantChanges,
    pub subsystems: Vec<String>,
    pub importance: Importance,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

impl Summary {
    pub fn from_payload(
        kind: SummaryKind,
        thread_id: Option<i64>,
        period_start: Option<NaiveDate>,
        payload: &SummaryPayload,
        model: &str,
    ) -> Self {
        Self {
            kind,
            thread_id,
            period_start,
            tldr: payload.tldr.clone(),
            key_points: payload.key_points.clone(),
            important_changes: payload.important_changes(),
            subsystems: payload.subsystems.clone(),
            importance: payload.importance,
            model: model.to_string(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_changes() {
        let payload: SummaryPayload = serde_json::from_str(
            r#"{"tldr":"x","important_changes":{"resolution":"merged","action_items":["send v3"]}}"#,
        )
        .unwrap();
        let changes = payload.important_changes();
        assert_eq!(changes.resolution, "merged");
        assert_eq!(changes.action_items, vec!["send v3"]);
        assert_eq!(changes.thread_type, "");
    }

    #[test]
    fn test_changes_as_encoded_text() {
        let payload: SummaryPayload = serde_json::from_str(
            r#"{"important_changes":"{\"thread_type\":\"bug_fix\"}"}"#,
        )
        .unwrap();
        assert_eq!(payload.important_changes().thread_type, "bug_fix");
    }

    #[test]
    fn test_flat_changes_fold_in() {
        let payload: SummaryPayload = serde_json::from_str(
            r#"{"resolution":"ongoing","discussion_summary":"long debate","thread_type":"rfc"}"#,
        )
        .unwrap();
        let changes = payload.important_changes();
        assert_eq!(changes.resolution, "ongoing");
        assert_eq!(changes.discussion_summary, "long debate");
        assert_eq!(changes.thread_type, "rfc");
    }

    #[test]
    fn test_importance_lenient() {
        let payload: SummaryPayload = serde_json::from_str(r#"{"importance":"CRITICAL"}"#).unwrap();
        assert_eq!(payload.importance, Importance::Critical);
        let payload: SummaryPayload = serde_json::from_str(r#"{"importance":"urgent-ish"}"#).unwrap();
        assert_eq!(payload.importance, Importance::Medium);
        let payload: SummaryPayload = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(payload.importance, Importance::Medium);
        assert!(Importance::Critical > Importance::High);
    }
}
