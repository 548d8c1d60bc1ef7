pub mod summary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use summary::{ImportantChanges, Importance, Summary, SummaryKind, SummaryPayload};

/// Source format of an archive handed to the normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Sequential mailbox (`From ` separated)
    Mbox,
    /// Atom syndication feed
    Atom,
    /// Single document, possibly a multipart/digest of embedded messages
    Digest,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mbox => "mbox",
            Self::Atom => "atom",
            Self::Digest => "digest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mbox" => Some(Self::Mbox),
            "atom" => Some(Self::Atom),
            "digest" | "eml" => Some(Self::Digest),
            _ => None,
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "mbox" | "mbx" => Some(Self::Mbox),
            "atom" | "xml" => Some(Self::Atom),
            "eml" => Some(Self::Digest),
            _ => None,
        }
    }
}

/// Canonical message produced by the normalizer.
///
/// `ancestors` is oldest first; `parent_id` is the effective immediate parent
/// after the References / In-Reply-To tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub date: DateTime<Utc>,
    pub body: String,
    pub parent_id: Option<String>,
    pub ancestors: Vec<String>,
    pub in_reply_to: Option<String>,
    pub tags: Vec<String>,
    pub needs_review: bool,
    pub origin: ArchiveFormat,
}

impl Message {
    /// Whether the message carries a code change (patch tag or inline diff).
    pub fn is_patch(&self) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case("PATCH"))
            || self.body.contains("diff --git")
            || self.body.lines().any(|l| l.starts_with("+++ b/"))
    }
}

/// Materialised thread row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub root_message_id: String,
    pub subject: String,
    pub participant_count: u32,
    pub email_count: u32,
    pub first_post: Option<DateTime<Utc>>,
    pub last_post: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(subject_tags: &[&str], body: &str) -> Message {
        Message {
            message_id: "a@x".into(),
            subject: String::new(),
            sender: "a@x".into(),
            sender_name: None,
            date: Utc::now(),
            body: body.into(),
            parent_id: None,
            ancestors: vec![],
            in_reply_to: None,
            tags: subject_tags.iter().map(|s| s.to_string()).collect(),
            needs_review: false,
            origin: ArchiveFormat::Mbox,
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ArchiveFormat::from_path(Path::new("lkml-2024.mbox")), Some(ArchiveFormat::Mbox));
        assert_eq!(ArchiveFormat::from_path(Path::new("new.atom")), Some(ArchiveFormat::Atom));
        assert_eq!(ArchiveFormat::from_path(Path::new("digest.EML")), Some(ArchiveFormat::Digest));
        assert_eq!(ArchiveFormat::from_path(Path::new("notes.txt")), None);
    }

    #[test]
    fn test_patch_detection() {
        assert!(message(&["PATCH", "v2"], "").is_patch());
        assert!(message(&[], "some text\ndiff --git a/x b/x\n").is_patch());
        assert!(message(&[], "--- a/mm.c\n+++ b/mm.c\n").is_patch());
        assert!(!message(&["RFC"], "just talk").is_patch());
    }
}
