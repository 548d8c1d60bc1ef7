//! Bounded rendering of a thread for the summarization prompt.
//!
//! When the whole conversation does not fit the character budget, the root
//! and patch messages are kept first, then the most recent replies; the
//! middle of the discussion is dropped and each gap is marked in the text.

use std::collections::BTreeSet;

use crate::types::{Message, Thread};

/// Reserved per kept message for a possible omission marker.
const MARKER_RESERVE: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedThread {
    pub text: String,
    pub included: usize,
    pub omitted: usize,
}

/// Cap a body at `max_chars` characters.
pub fn cap_body(body: &str, max_chars: usize) -> String {
    let body = body.trim();
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n[... truncated]", &body[..cut]),
        None => body.to_string(),
    }
}

fn render_message(msg: &Message, position: usize, total: usize, per_message: usize) -> String {
    let from = match &msg.sender_name {
        Some(name) => format!("{} <{}>", name, msg.sender),
        None => msg.sender.clone(),
    };
    format!(
        "--- Email {}/{} | From: {} | Date: {}\nSubject: {}\n\n{}\n\n",
        position + 1,
        total,
        from,
        msg.date.format("%Y-%m-%d %H:%M UTC"),
        msg.subject,
        cap_body(&msg.body, per_message)
    )
}

fn omission_marker(count: usize) -> String {
    format!("[... {} message(s) omitted ...]\n\n", count)
}

/// Render `messages` (chronological) within `budget` characters.
///
/// The root is always kept even if it alone exceeds the budget.
pub fn render_thread(thread: &Thread, messages: &[Message], budget: usize, per_message: usize) -> RenderedThread {
    let header = format!(
        "Thread: {}\nParticipants: {} | Emails: {}\n\n",
        thread.subject, thread.participant_count, thread.email_count
    );
    let total = messages.len();
    let blocks: Vec<String> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| render_message(m, i, total, per_message))
        .collect();

    let full_len = header.len() + blocks.iter().map(String::len).sum::<usize>();
    if full_len <= budget {
        return RenderedThread {
            text: header + &blocks.concat(),
            included: total,
            omitted: 0,
        };
    }

    let mut keep: BTreeSet<usize> = BTreeSet::new();
    let mut used = header.len();
    let mut try_keep = |i: usize, keep: &mut BTreeSet<usize>, force: bool| {
        let cost = blocks[i].len() + MARKER_RESERVE;
        if force || used + cost <= budget {
            used += cost;
            keep.insert(i);
        }
    };

    if total > 0 {
        try_keep(0, &mut keep, true);
    }
    for (i, msg) in messages.iter().enumerate().skip(1) {
        if msg.is_patch() {
            try_keep(i, &mut keep, false);
        }
    }
    for i in (1..total).rev() {
        if !keep.contains(&i) {
            try_keep(i, &mut keep, false);
        }
    }

    let mut text = header;
    let mut last: Option<usize> = None;
    for &i in &keep {
        let gap = match last {
            Some(prev) => i - prev - 1,
            None => i,
        };
        if gap > 0 {
            text.push_str(&omission_marker(gap));
        }
        text.push_str(&blocks[i]);
        last = Some(i);
    }
    if let Some(prev) = last {
        if total > prev + 1 {
            text.push_str(&omission_marker(total - prev - 1));
        }
    }

    RenderedThread {
        text,
        included: keep.len(),
        omitted: total - keep.len(),
    }
}
