//! Sequential mailbox splitting
//!
//! Entries begin at a line starting with `From `. Body lines quoted as
//! `>From ` (mboxrd) lose one level of quoting.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::borrow::Cow;

/// One raw mailbox entry
#[derive(Debug, Clone)]
pub struct MboxEntry<'a> {
    /// The `From ` separator line without its terminator
    pub separator: &'a str,
    pub raw: Cow<'a, [u8]>,
}

impl MboxEntry<'_> {
    /// Timestamp carried on the separator line, if readable.
    ///
    /// `From jdoe@example.org Tue Oct 15 10:00:00 2024`
    pub fn separator_date(&self) -> Option<DateTime<Utc>> {
        let rest: Vec<&str> = self.separator.split_whitespace().skip(2).collect();
        if rest.len() < 5 {
            return None;
        }
        let stamp = rest[..5].join(" ");
        ["%a %b %e %H:%M:%S %Y", "%a %b %d %H:%M:%S %Y"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&stamp, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}

/// Lazy iterator over the entries of an mbox buffer
pub struct MboxEntries<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MboxEntries<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_separator(data, 0).unwrap_or(data.len());
        Self { data, pos }
    }
}

impl<'a> Iterator for MboxEntries<'a> {
    type Item = MboxEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let line_end = memchr_newline(self.data, start).unwrap_or(self.data.len());
        let body_start = (line_end + 1).min(self.data.len());
        let end = find_separator(self.data, body_start).unwrap_or(self.data.len());
        self.pos = end;

        let separator = std::str::from_utf8(&self.data[start..line_end])
            .unwrap_or("From ")
            .trim_end_matches('\r');

        Some(MboxEntry {
            separator,
            raw: unquote_from_lines(&self.data[body_start..end]),
        })
    }
}

fn memchr_newline(data: &[u8], from: usize) -> Option<usize> {
    data[from..].iter().position(|&b| b == b'\n').map(|i| from + i)
}

/// Offset of the next line beginning with `From ` at or after `from`,
/// where `from` is itself at a line start.
fn find_separator(data: &[u8], from: usize) -> Option<usize> {
    let mut line = from;
    while line < data.len() {
        if data[line..].starts_with(b"From ") {
            return Some(line);
        }
        line = memchr_newline(data, line)? + 1;
    }
    None
}

fn unquote_from_lines(raw: &[u8]) -> Cow<'_, [u8]> {
    let needs = raw.split(|&b| b == b'\n').any(is_quoted_from);
    if !needs {
        return Cow::Borrowed(raw);
    }

    let mut out = Vec::with_capacity(raw.len());
    for (i, line) in raw.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        if is_quoted_from(line) {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    Cow::Owned(out)
}

fn is_quoted_from(line: &[u8]) -> bool {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    quotes > 0 && line[quotes..].starts_with(b"From ")
}
