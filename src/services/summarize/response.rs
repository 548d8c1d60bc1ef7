use crate::error::{DigestError, Result};
use crate::types::SummaryPayload;

/// Outermost `{ ... }` span of a completion, skipping commentary and fences.
pub fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Decode a completion into the summary schema.
///
/// Fails with `InvalidResponse` when no JSON object is present, when it does
/// not decode, or when it carries neither a synopsis nor key points.
pub fn parse_summary(text: &str) -> Result<SummaryPayload> {
    let span = json_span(text).ok_or_else(|| {
        DigestError::InvalidResponse(format!(
            "no JSON object in response: {:?}",
            text.chars().take(120).collect::<String>()
        ))
    })?;

    let payload: SummaryPayload = serde_json::from_str(span)
        .map_err(|e| DigestError::InvalidResponse(format!("undecodable summary: {}", e)))?;

    if payload.tldr.trim().is_empty() && payload.key_points.is_empty() {
        return Err(DigestError::InvalidResponse("summary has no tldr or key points".into()));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Importance;

    #[test]
    fn test_fenced_response_with_commentary() {
        let text = "Sure! Here is the summary:\n```json\n{\"tldr\": \"Fixes a {leak}\", \
                    \"key_points\": [\"a\"], \"importance\": \"high\"}\n```\nLet me know.";
        let payload = parse_summary(text).unwrap();
        assert_eq!(payload.tldr, "Fixes a {leak}");
        assert_eq!(payload.importance, Importance::High);
    }

    #[test]
    fn test_important_changes_as_text_and_flat() {
        let nested = r#"{"tldr":"t","important_changes":"{\"resolution\":\"applied\"}"}"#;
        assert_eq!(parse_summary(nested).unwrap().important_changes().resolution, "applied");

        let flat = r#"{"tldr":"t","action_items":["rebase"],"thread_type":"patch"}"#;
        let changes = parse_summary(flat).unwrap().important_changes();
        assert_eq!(changes.action_items, vec!["rebase"]);
        assert_eq!(changes.thread_type, "patch");
    }

    #[test]
    fn test_invalid_responses() {
        assert!(matches!(parse_summary("no json here"), Err(DigestError::InvalidResponse(_))));
        assert!(matches!(parse_summary("{\"tldr\": "), Err(DigestError::InvalidResponse(_))));
        assert!(matches!(parse_summary("{}"), Err(DigestError::InvalidResponse(_))));
        assert!(matches!(
            parse_summary("{\"tldr\": 5}"),
            Err(DigestError::InvalidResponse(_))
        ));
    }
}
