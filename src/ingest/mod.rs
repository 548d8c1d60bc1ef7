//! Message Normalizer
//!
//! Turns raw archive bytes into a lazy stream of canonical [`Message`]s.
//! Every entry is independent: a malformed one surfaces as an `Err` item and
//! the stream continues with the next entry.

pub mod atom;
pub mod digest;
pub mod headers;
pub mod mbox;
pub mod rfc822;

use std::collections::HashSet;

use crate::error::Result;
use crate::types::{ArchiveFormat, Message};

pub use rfc822::parse_message;

/// Lazily normalize an archive.
pub fn normalize<'a>(raw: &'a [u8], format: ArchiveFormat) -> Box<dyn Iterator<Item = Result<Message>> + 'a> {
    match format {
        ArchiveFormat::Mbox => Box::new(mbox::MboxEntries::new(raw).map(|entry| {
            parse_message(&entry.raw, ArchiveFormat::Mbox, entry.separator_date())
        })),
        ArchiveFormat::Atom => Box::new(atom::AtomEntries::new(raw)),
        ArchiveFormat::Digest => match digest::split_digest(raw) {
            Ok((parts, fallback)) => Box::new(
                parts
                    .into_iter()
                    .map(move |part| parse_message(&part, ArchiveFormat::Digest, fallback)),
            ),
            Err(e) => Box::new(std::iter::once(Err(e))),
        },
    }
}

/// Drops repeated identifiers within one batch, keeping the first occurrence.
pub struct Dedup<I> {
    inner: I,
    seen: HashSet<String>,
    duplicates: usize,
}

impl<I> Dedup<I> {
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

impl<I: Iterator<Item = Result<Message>>> Iterator for Dedup<I> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(msg) if !self.seen.insert(msg.message_id.clone()) => {
                    self.duplicates += 1;
                }
                item => return Some(item),
            }
        }
    }
}

pub fn dedup_batch<I: Iterator<Item = Result<Message>>>(inner: I) -> Dedup<I> {
    Dedup {
        inner,
        seen: HashSet::new(),
        duplicates: 0,
    }
}
