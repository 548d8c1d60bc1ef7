//! Header-level helpers: identifiers, ancestry, subject tags and addresses.

use mailparse::MailAddr;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

static ANGLE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>\s]+)>").unwrap());
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());

/// Strip whitespace and angle brackets from a Message-ID style value.
pub fn clean_message_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if let Some(caps) = ANGLE_ID.captures(trimmed) {
        return Some(caps[1].to_string());
    }
    let bare = trimmed.trim_matches(|c| c == '<' || c == '>').trim();
    if bare.is_empty() || bare.contains(char::is_whitespace) {
        None
    } else {
        Some(bare.to_string())
    }
}

/// Parse a References header into identifiers, oldest first.
///
/// Some list software omits the angle brackets; in that case the value is
/// split on whitespace instead.
pub fn parse_references(value: &str) -> Vec<String> {
    let ids: Vec<String> = ANGLE_ID
        .captures_iter(value)
        .map(|c| c[1].to_string())
        .collect();
    if !ids.is_empty() {
        return ids;
    }
    value
        .split_whitespace()
        .filter_map(clean_message_id)
        .collect()
}

/// Resolved ancestry of one message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ancestry {
    /// Oldest first, self references and cycles removed
    pub ancestors: Vec<String>,
    /// Effective immediate parent
    pub parent: Option<String>,
    /// In-Reply-To and References disagree on the immediate parent
    pub conflict: bool,
}

/// Combine In-Reply-To and References into one ancestor chain.
///
/// The walk starts at the nearest ancestor and moves towards the root,
/// tracking visited identifiers; the first repeat (or a reference back to the
/// message itself) ends the walk. When both headers are present and name
/// different immediate parents, References wins and `conflict` is set.
pub fn resolve_ancestry(message_id: &str, in_reply_to: Option<&str>, references: &[String]) -> Ancestry {
    let in_reply_to = in_reply_to.filter(|p| !p.is_empty());

    let chain: Vec<&str> = if references.is_empty() {
        in_reply_to.into_iter().collect()
    } else {
        references.iter().map(String::as_str).collect()
    };

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(message_id);

    let mut nearest_first: Vec<String> = Vec::new();
    for id in chain.iter().rev() {
        if !visited.insert(id) {
            break;
        }
        nearest_first.push(id.to_string());
    }
    nearest_first.reverse();

    let conflict = match (in_reply_to, references.last()) {
        (Some(irt), Some(last)) => irt != last.as_str() && irt != message_id,
        _ => false,
    };
    if conflict {
        warn!(
            message_id,
            in_reply_to = in_reply_to.unwrap_or_default(),
            references_parent = references.last().map(String::as_str).unwrap_or_default(),
            "In-Reply-To disagrees with References; using References and flagging for review"
        );
    }

    Ancestry {
        parent: nearest_first.last().cloned(),
        ancestors: nearest_first,
        conflict,
    }
}

/// Bracketed subject tokens in order of appearance, deduplicated.
///
/// `"[PATCH v2 net-next] tcp: fix"` yields `PATCH`, `v2`, `net-next`.
pub fn extract_tags(subject: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for caps in BRACKETED.captures_iter(subject) {
        for token in caps[1].split_whitespace() {
            let token = token.trim_matches(',');
            if !token.is_empty() && seen.insert(token.to_string()) {
                tags.push(token.to_string());
            }
        }
    }
    tags
}

/// Canonical sender address: trimmed and lowercased, nothing else.
///
/// Subaddresses and provider-specific aliases stay distinct senders.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Split a decoded From value into (normalized address, display name).
pub fn parse_sender(from: &str) -> Option<(String, Option<String>)> {
    if let Ok(list) = mailparse::addrparse(from) {
        for addr in list.iter() {
            let single = match addr {
                MailAddr::Single(info) => Some(info),
                MailAddr::Group(group) => group.addrs.first(),
            };
            if let Some(info) = single {
                let name = info
                    .display_name
                    .as_ref()
                    .map(|n| n.trim().trim_matches('"').trim().to_string())
                    .filter(|n| !n.is_empty());
                return Some((normalize_email(&info.addr), name));
            }
        }
    }

    // "Name <email>" that addrparse rejected
    let from = from.trim();
    if let (Some(open), Some(close)) = (from.rfind('<'), from.rfind('>')) {
        if close > open {
            let email = from[open + 1..close].trim();
            let name = from[..open].trim().trim_matches('"').trim();
            if !email.is_empty() {
                return Some((
                    normalize_email(email),
                    (!name.is_empty()).then(|| name.to_string()),
                ));
            }
        }
    }

    (!from.is_empty() && from.contains('@')).then(|| (normalize_email(from), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_id() {
        assert_eq!(clean_message_id(" <abc123@kernel.org> "), Some("abc123@kernel.org".into()));
        assert_eq!(clean_message_id("abc@x"), Some("abc@x".into()));
        assert_eq!(clean_message_id("   "), None);
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(
            parse_references("<id1@example.com>\n\t<id2@example.com>"),
            vec!["id1@example.com", "id2@example.com"]
        );
        assert_eq!(parse_references("id1@x id2@x"), vec!["id1@x", "id2@x"]);
        assert!(parse_references("").is_empty());
    }

    #[test]
    fn test_tag_extraction_preserves_order() {
        assert_eq!(extract_tags("[PATCH v2] mm: fix leak"), vec!["PATCH", "v2"]);
        assert_eq!(extract_tags("[PATCH] [v2] mm: fix leak"), vec!["PATCH", "v2"]);
        assert_eq!(
            extract_tags("Re: [RFC PATCH net-next 1/3] tcp: tweak"),
            vec!["RFC", "PATCH", "net-next", "1/3"]
        );
        assert!(extract_tags("plain subject").is_empty());
    }

    #[test]
    fn test_ancestry_references_only() {
        let refs = vec!["a".to_string(), "b".to_string()];
        let a = resolve_ancestry("c", None, &refs);
        assert_eq!(a.ancestors, vec!["a", "b"]);
        assert_eq!(a.parent.as_deref(), Some("b"));
        assert!(!a.conflict);
    }

    #[test]
    fn test_ancestry_in_reply_to_only() {
        let a = resolve_ancestry("c", Some("b"), &[]);
        assert_eq!(a.ancestors, vec!["b"]);
        assert_eq!(a.parent.as_deref(), Some("b"));
    }

    #[test]
    fn test_ancestry_conflict_prefers_references() {
        let refs = vec!["a".to_string(), "b".to_string()];
        let a = resolve_ancestry("c", Some("z"), &refs);
        assert_eq!(a.parent.as_deref(), Some("b"));
        assert!(a.conflict);
    }

    #[test]
    fn test_ancestry_self_reference_is_dropped() {
        let a = resolve_ancestry("m", Some("m"), &["m".to_string()]);
        assert!(a.ancestors.is_empty());
        assert_eq!(a.parent, None);
        assert!(!a.conflict);
    }

    #[test]
    fn test_ancestry_cycle_stops_walk() {
        let refs: Vec<String> = ["a", "m", "b", "a"].iter().map(|s| s.to_string()).collect();
        let a = resolve_ancestry("m", None, &refs);
        // a (nearest), b, then m (self) ends the walk
        assert_eq!(a.ancestors, vec!["b", "a"]);
        assert_eq!(a.parent.as_deref(), Some("a"));
    }

    #[test]
    fn test_parse_sender() {
        assert_eq!(
            parse_sender("Jane Doe <Jane@Example.com>"),
            Some(("jane@example.com".into(), Some("Jane Doe".into())))
        );
        assert_eq!(parse_sender("dev@kernel.org"), Some(("dev@kernel.org".into(), None)));
        assert_eq!(parse_sender(""), None);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  B.Rian+news@Gmail.com  "), "b.rian+news@gmail.com");
        assert_eq!(normalize_email("Dev@Kernel.org"), "dev@kernel.org");
        assert_ne!(normalize_email("dev+lkml@kernel.org"), normalize_email("dev@kernel.org"));
    }
}
