//! Atom feed entries (public-inbox style)
//!
//! Each `<entry>` carries `id`, `title`, `updated`, `author/{name,email}`,
//! an optional `thr:in-reply-to ref="..."` and the body in `content`.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use super::headers::{clean_message_id, extract_tags, normalize_email, resolve_ancestry};
use crate::error::{DigestError, Result};
use crate::types::{ArchiveFormat, Message};

#[derive(Debug, Default)]
struct RawEntry {
    id: String,
    title: String,
    updated: String,
    author_name: String,
    author_email: String,
    in_reply_to: Option<String>,
    content: String,
    // First entry-level defect; the entry is still read to its end tag
    defect: Option<String>,
}

impl RawEntry {
    fn flag(&mut self, problem: String) {
        self.defect.get_or_insert(problem);
    }
}

/// Lazy iterator over feed entries.
///
/// A malformed entry yields an `Err` and iteration continues, including
/// entries with text that fails to unescape. Only an XML syntax error ends
/// the stream after reporting it.
pub struct AtomEntries<'a> {
    reader: Reader<&'a [u8]>,
    done: bool,
}

impl<'a> AtomEntries<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: Reader::from_reader(data),
            done: false,
        }
    }

    fn read_entry(&mut self) -> Result<RawEntry> {
        let mut entry = RawEntry::default();
        let mut path: Vec<Vec<u8>> = Vec::new();

        loop {
            match self.reader.read_event()? {
                Event::Start(e) => {
                    if e.local_name().as_ref() == b"in-reply-to" {
                        read_reply_ref(&mut entry, &e);
                    }
                    path.push(e.local_name().as_ref().to_vec());
                }
                Event::Empty(e) => {
                    if e.local_name().as_ref() == b"in-reply-to" {
                        read_reply_ref(&mut entry, &e);
                    }
                }
                Event::Text(t) => match t.unescape() {
                    Ok(text) => append_field(&mut entry, &path, &text),
                    Err(e) => entry.flag(format!("unreadable text: {}", e)),
                },
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                    append_field(&mut entry, &path, &text);
                }
                Event::End(e) => {
                    if path.is_empty() && e.local_name().as_ref() == b"entry" {
                        return Ok(entry);
                    }
                    path.pop();
                }
                Event::Eof => {
                    return Err(DigestError::Parse("feed ended inside an entry".into()));
                }
                _ => {}
            }
        }
    }
}

impl Iterator for AtomEntries<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"entry" => {
                    return Some(match self.read_entry() {
                        Ok(raw) => entry_to_message(raw),
                        Err(e) => {
                            self.done = true;
                            Err(e)
                        }
                    });
                }
                Ok(Event::Eof) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

fn read_reply_ref(entry: &mut RawEntry, e: &BytesStart) {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"ref" {
            match attr.unescape_value() {
                Ok(value) => entry.in_reply_to = Some(strip_urn(&value)),
                Err(err) => entry.flag(format!("unreadable in-reply-to ref: {}", err)),
            }
            return;
        }
    }
}

fn append_field(entry: &mut RawEntry, path: &[Vec<u8>], text: &str) {
    if path.iter().any(|p| p.as_slice() == b"content") {
        entry.content.push_str(text);
        return;
    }
    let field = match path {
        [f] if f.as_slice() == b"id" => &mut entry.id,
        [f] if f.as_slice() == b"title" => &mut entry.title,
        [f] if f.as_slice() == b"updated" => &mut entry.updated,
        [a, f] if a.as_slice() == b"author" && f.as_slice() == b"name" => &mut entry.author_name,
        [a, f] if a.as_slice() == b"author" && f.as_slice() == b"email" => &mut entry.author_email,
        _ => return,
    };
    field.push_str(text);
}

fn strip_urn(value: &str) -> String {
    let value = value.trim();
    value.strip_prefix("urn:uuid:").unwrap_or(value).to_string()
}

fn entry_to_message(raw: RawEntry) -> Result<Message> {
    if let Some(defect) = raw.defect {
        return Err(DigestError::Malformed(format!("atom entry {:?}: {}", raw.id.trim(), defect)));
    }
    let message_id = clean_message_id(&strip_urn(&raw.id))
        .ok_or_else(|| DigestError::Malformed("atom entry without id".into()))?;

    let date = DateTime::parse_from_rfc3339(raw.updated.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DigestError::Malformed(format!("{}: bad updated {:?}: {}", message_id, raw.updated, e)))?;

    let email = raw.author_email.trim();
    if email.is_empty() {
        return Err(DigestError::Malformed(format!("{}: missing author email", message_id)));
    }
    let name = raw.author_name.trim();

    let in_reply_to = raw.in_reply_to.and_then(|r| clean_message_id(&r));
    let ancestry = resolve_ancestry(&message_id, in_reply_to.as_deref(), &[]);
    let subject = raw.title.split_whitespace().collect::<Vec<_>>().join(" ");

    debug!("Parsed atom entry {}", message_id);

    Ok(Message {
        tags: extract_tags(&subject),
        sender: normalize_email(email),
        sender_name: (!name.is_empty()).then(|| name.to_string()),
        date,
        subject,
        body: raw.content.trim().to_string(),
        parent_id: ancestry.parent,
        ancestors: ancestry.ancestors,
        in_reply_to,
        needs_review: ancestry.conflict,
        origin: ArchiveFormat::Atom,
        message_id,
    })
}
