//! Single-document archives, including MIME multipart/digest bundles

use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use tracing::debug;

use crate::error::Result;

/// Raw embedded messages of a digest, plus the digest's own date to use as a
/// fallback for parts that lack one.
///
/// Digests wrapped in other multipart containers (a Mailman masthead around
/// the multipart/digest, for instance) are searched recursively. A document
/// with no embedded messages is returned as a single message.
pub fn split_digest(raw: &[u8]) -> Result<(Vec<Vec<u8>>, Option<DateTime<Utc>>)> {
    let parsed = mailparse::parse_mail(raw)?;
    let outer_date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    let mut messages = Vec::new();
    if parsed.ctype.mimetype.starts_with("multipart/") {
        collect_parts(&parsed, &mut messages)?;
    }
    if messages.is_empty() {
        return Ok((vec![raw.to_vec()], outer_date));
    }

    debug!("Digest contained {} embedded messages", messages.len());
    Ok((messages, outer_date))
}

fn collect_parts(container: &ParsedMail, out: &mut Vec<Vec<u8>>) -> Result<()> {
    let in_digest = container.ctype.mimetype == "multipart/digest";

    for part in &container.subparts {
        // Inside a digest, parts without their own Content-Type default to message/rfc822
        let explicit = part.headers.get_first_value("Content-Type").is_some();
        let mime = part.ctype.mimetype.as_str();

        if mime == "message/rfc822" || (in_digest && !explicit) {
            out.push(part.get_body_raw()?);
        } else if mime.starts_with("multipart/") {
            collect_parts(part, out)?;
        } else if mime == "text/plain" {
            let text = part.get_body().unwrap_or_default();
            if is_table_of_contents(&text) {
                debug!("Skipping digest table of contents");
            } else {
                debug!("Skipping free-text digest part ({} bytes)", text.len());
            }
        }
    }
    Ok(())
}

fn is_table_of_contents(text: &str) -> bool {
    let head = text.trim_start();
    head.starts_with("Topics (") || head.starts_with("Today's Topics")
}
