//! One RFC 822 message to a canonical [`Message`]

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::headers::{clean_message_id, extract_tags, parse_references, parse_sender, resolve_ancestry};
use crate::error::{DigestError, Result};
use crate::types::{ArchiveFormat, Message};

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Parse raw message bytes.
///
/// `fallback_date` is used when the Date header is missing or unreadable
/// (the mbox separator line, or the enclosing digest's Date).
pub fn parse_message(
    raw: &[u8],
    origin: ArchiveFormat,
    fallback_date: Option<DateTime<Utc>>,
) -> Result<Message> {
    let parsed = mailparse::parse_mail(raw)?;
    let headers = &parsed.headers;

    let message_id = headers
        .get_first_value("Message-ID")
        .and_then(|v| clean_message_id(&v))
        .unwrap_or_else(|| synthetic_message_id(raw));

    let from = headers
        .get_first_value("From")
        .ok_or_else(|| DigestError::Malformed(format!("{}: missing From header", message_id)))?;
    let (sender, sender_name) = parse_sender(&from)
        .ok_or_else(|| DigestError::Malformed(format!("{}: unreadable From {:?}", message_id, from)))?;

    let date = headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or(fallback_date)
        .ok_or_else(|| DigestError::Malformed(format!("{}: missing or invalid Date", message_id)))?;

    let subject = headers
        .get_first_value("Subject")
        .map(|s| collapse_whitespace(&s))
        .unwrap_or_default();

    let in_reply_to = headers
        .get_first_value("In-Reply-To")
        .and_then(|v| parse_references(&v).into_iter().next());
    let references = headers
        .get_first_value("References")
        .map(|v| parse_references(&v))
        .unwrap_or_default();

    let ancestry = resolve_ancestry(&message_id, in_reply_to.as_deref(), &references);

    Ok(Message {
        tags: extract_tags(&subject),
        message_id,
        subject,
        sender,
        sender_name,
        date,
        body: extract_body(&parsed),
        parent_id: ancestry.parent,
        ancestors: ancestry.ancestors,
        in_reply_to,
        needs_review: ancestry.conflict,
        origin,
    })
}

/// Deterministic identifier for messages without a Message-ID header.
pub fn synthetic_message_id(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    let hash = format!("{:x}", hasher.finalize());
    format!("synthetic-{}@listdigest", &hash[..32])
}

/// First non-attachment text/plain part, else the first other text part.
fn extract_body(mail: &ParsedMail) -> String {
    if let Some(text) = find_part(mail, &|mime| mime == "text/plain") {
        return text.trim_end().to_string();
    }
    match find_part(mail, &|mime| mime.starts_with("text/")) {
        Some(text) => HTML_TAG.replace_all(&text, "").trim().to_string(),
        None => String::new(),
    }
}

fn find_part(mail: &ParsedMail, accept: &dyn Fn(&str) -> bool) -> Option<String> {
    if !mail.subparts.is_empty() {
        return mail.subparts.iter().find_map(|sub| find_part(sub, accept));
    }
    if mail.get_content_disposition().disposition == DispositionType::Attachment {
        return None;
    }
    if accept(&mail.ctype.mimetype) {
        mail.get_body().ok()
    } else {
        None
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "Message-ID: <reply@kernel.org>\r\n\
From: =?UTF-8?Q?J=C3=B6rg?= <Joerg@Kernel.org>\r\n\
Date: Tue, 15 Oct 2024 10:00:00 +0000\r\n\
Subject: Re: [PATCH v2] mm: fix\r\n\
\x20leak in slab\r\n\
In-Reply-To: <root@kernel.org>\r\n\
References: <root@kernel.org>\r\n\
\r\n\
Looks good to me.\r\n";

    #[test]
    fn test_parse_plain_reply() {
        let msg = parse_message(PLAIN.as_bytes(), ArchiveFormat::Mbox, None).unwrap();
        assert_eq!(msg.message_id, "reply@kernel.org");
        assert_eq!(msg.sender, "joerg@kernel.org");
        assert_eq!(msg.sender_name.as_deref(), Some("Jörg"));
        assert_eq!(msg.subject, "Re: [PATCH v2] mm: fix leak in slab");
        assert_eq!(msg.tags, vec!["PATCH", "v2"]);
        assert_eq!(msg.parent_id.as_deref(), Some("root@kernel.org"));
        assert_eq!(msg.body, "Looks good to me.");
        assert_eq!(msg.date.to_rfc3339(), "2024-10-15T10:00:00+00:00");
        assert!(!msg.needs_review);
    }

    #[test]
    fn test_missing_message_id_is_deterministic() {
        let raw = b"From: a@x.org\r\nDate: Tue, 15 Oct 2024 10:00:00 +0000\r\n\r\nhi\r\n";
        let a = parse_message(raw, ArchiveFormat::Mbox, None).unwrap();
        let b = parse_message(raw, ArchiveFormat::Mbox, None).unwrap();
        assert!(a.message_id.starts_with("synthetic-"));
        assert_eq!(a.message_id, b.message_id);
    }

    #[test]
    fn test_missing_date_uses_fallback_or_fails() {
        let raw = b"Message-ID: <x@y>\r\nFrom: a@x.org\r\n\r\nhi\r\n";
        assert!(matches!(
            parse_message(raw, ArchiveFormat::Mbox, None),
            Err(DigestError::Malformed(_))
        ));
        let fallback = DateTime::<Utc>::from_timestamp(1_700_000_000, 0);
        let msg = parse_message(raw, ArchiveFormat::Mbox, fallback).unwrap();
        assert_eq!(Some(msg.date), fallback);
    }

    #[test]
    fn test_disagreeing_ancestry_needs_review() {
        let raw = "Message-ID: <c@x>\r\n\
From: c@x.org\r\n\
Date: Tue, 15 Oct 2024 10:00:00 +0000\r\n\
Subject: Re: topic\r\n\
In-Reply-To: <elsewhere@x>\r\n\
References: <a@x> <b@x>\r\n\
\r\n\
body\r\n";
        let msg = parse_message(raw.as_bytes(), ArchiveFormat::Mbox, None).unwrap();
        assert!(msg.needs_review);
        assert_eq!(msg.parent_id.as_deref(), Some("b@x"));
        assert_eq!(msg.ancestors, vec!["a@x", "b@x"]);
        assert_eq!(msg.in_reply_to.as_deref(), Some("elsewhere@x"));
    }

    #[test]
    fn test_missing_from_is_malformed() {
        let raw = b"Message-ID: <x@y>\r\nDate: Tue, 15 Oct 2024 10:00:00 +0000\r\n\r\nhi\r\n";
        assert!(matches!(
            parse_message(raw, ArchiveFormat::Mbox, None),
            Err(DigestError::Malformed(_))
        ));
    }

    #[test]
    fn test_multipart_prefers_plain_and_skips_attachments() {
        let raw = "Message-ID: <m@x>\r\n\
From: a@x.org\r\n\
Date: Tue, 15 Oct 2024 10:00:00 +0000\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"config.txt\"\r\n\
\r\n\
CONFIG_FOO=y\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html body</p>\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain body\r\n\
--b1--\r\n";
        let msg = parse_message(raw.as_bytes(), ArchiveFormat::Mbox, None).unwrap();
        assert_eq!(msg.body, "plain body");
    }

    #[test]
    fn test_html_only_is_stripped() {
        let raw = "Message-ID: <h@x>\r\n\
From: a@x.org\r\n\
Date: Tue, 15 Oct 2024 10:00:00 +0000\r\n\
Content-Type: text/html\r\n\
\r\n\
<div><p>hello</p></div>\r\n";
        let msg = parse_message(raw.as_bytes(), ArchiveFormat::Mbox, None).unwrap();
        assert_eq!(msg.body, "hello");
    }
}
