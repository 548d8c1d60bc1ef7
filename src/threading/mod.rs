//! Thread Reconstructor
//!
//! Assigns canonical messages to threads so that the final partition is the
//! set of connected components of the observed ancestry graph, whatever the
//! arrival order. Two indexes drive it:
//!
//! - `thread_members`: message identifier -> thread
//! - `pending_ancestors`: ancestor not seen yet -> threads waiting for it
//!
//! A new message joins the thread of its first known ancestor (in chain
//! order). Any other thread it links, through a second known ancestor or
//! because it was itself awaited, is merged into that one. Only the absorbed
//! thread's rows are rewritten.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::adapters::sqlite::threads::{self, MemberLink};
use crate::adapters::sqlite::{messages, DbPool};
use crate::error::{DigestError, Result};
use crate::types::{Message, Thread};

/// Outcome of inserting one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Identifier already stored; nothing changed
    Duplicate,
    /// New thread rooted (possibly provisionally) at the message
    Created(i64),
    /// Joined an existing thread
    Attached(i64),
    /// Joined or created a thread and absorbed `absorbed` other threads
    Merged { thread_id: i64, absorbed: usize },
}

impl Placement {
    pub fn thread_id(&self) -> Option<i64> {
        match *self {
            Placement::Duplicate => None,
            Placement::Created(id) | Placement::Attached(id) => Some(id),
            Placement::Merged { thread_id, .. } => Some(thread_id),
        }
    }
}

pub struct ThreadReconstructor {
    pool: DbPool,
    // Single writer per store
    writer: Mutex<()>,
}

impl ThreadReconstructor {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Store `msg` and place it in a thread, all in one IMMEDIATE transaction.
    pub fn insert(&self, msg: &Message) -> Result<Placement> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| DigestError::Database("reconstructor lock poisoned".into()))?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let placement = place(&tx, msg)?;
        tx.commit()?;

        debug!(message_id = %msg.message_id, ?placement, "Placed message");
        Ok(placement)
    }

    /// Recompute a thread's aggregates from its members and return them.
    pub fn reconcile(&self, thread_id: i64) -> Result<Thread> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| DigestError::Database("reconstructor lock poisoned".into()))?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if threads::get_thread(&tx, thread_id)?.is_none() {
            return Err(DigestError::NotFound(format!("thread {}", thread_id)));
        }
        let thread = recompute(&tx, thread_id)?;
        tx.commit()?;
        Ok(thread)
    }

    /// Reconcile every thread; returns how many were rewritten.
    pub fn reconcile_all(&self) -> Result<usize> {
        let ids = {
            let conn = self.pool.get()?;
            threads::thread_ids(&conn)?
        };
        for id in &ids {
            self.reconcile(*id)?;
        }
        info!("Reconciled {} threads", ids.len());
        Ok(ids.len())
    }
}

fn place(conn: &Connection, msg: &Message) -> Result<Placement> {
    if !messages::insert_message(conn, msg)? {
        return Ok(Placement::Duplicate);
    }

    let mut linked: Vec<i64> = Vec::new();
    let mut missing: Vec<&str> = Vec::new();
    for ancestor in msg.ancestors.iter().filter(|a| **a != msg.message_id) {
        match threads::thread_of(conn, ancestor)? {
            Some(id) if !linked.contains(&id) => linked.push(id),
            Some(_) => {}
            None => missing.push(ancestor),
        }
    }
    let waiting = threads::take_waiting(conn, &msg.message_id)?;

    let (thread_id, created, joined) = match (linked.first(), waiting.first()) {
        (Some(&id), _) => (id, false, true),
        (None, Some(&id)) => (id, false, false),
        (None, None) => (threads::create_thread(conn, &msg.message_id)?, true, false),
    };
    threads::add_member(conn, &msg.message_id, thread_id)?;

    let mut absorbed: HashSet<i64> = HashSet::new();
    for &other in linked.iter().skip(1).chain(waiting.iter()) {
        if other != thread_id && absorbed.insert(other) {
            let moved = threads::merge_into(conn, thread_id, other)?;
            info!(thread_id, absorbed = other, moved, "Merged threads");
        }
    }

    for ancestor in missing {
        threads::add_pending(conn, ancestor, thread_id)?;
    }
    threads::prune_satisfied_pending(conn, thread_id)?;

    recompute(conn, thread_id)?;

    Ok(if !absorbed.is_empty() {
        Placement::Merged {
            thread_id,
            absorbed: absorbed.len(),
        }
    } else if created {
        Placement::Created(thread_id)
    } else if joined || !waiting.is_empty() {
        Placement::Attached(thread_id)
    } else {
        Placement::Created(thread_id)
    })
}

fn recompute(conn: &Connection, thread_id: i64) -> Result<Thread> {
    let links = threads::member_links(conn, thread_id)?;
    let root = select_root(&links)
        .ok_or_else(|| DigestError::NotFound(format!("thread {} has no members", thread_id)))?;
    let counts = threads::member_counts(conn, thread_id)?;

    let thread = Thread {
        id: thread_id,
        root_message_id: root.message_id.clone(),
        subject: root.subject.clone(),
        participant_count: counts.participant_count,
        email_count: counts.email_count,
        first_post: counts.first_post.map(crate::adapters::sqlite::from_millis),
        last_post: counts.last_post.map(crate::adapters::sqlite::from_millis),
        tags: root.tags.clone(),
    };
    threads::update_thread(conn, &thread)?;
    Ok(thread)
}

/// Root of a thread: the member whose parent is not in the thread, earliest
/// first (then smallest identifier).
///
/// If every member's parent is inside the thread the parent pointers form a
/// cycle; the walk then starts at the earliest member and stops at the first
/// repeated identifier.
pub fn select_root(links: &[MemberLink]) -> Option<&MemberLink> {
    let by_id: HashMap<&str, &MemberLink> =
        links.iter().map(|l| (l.message_id.as_str(), l)).collect();
    let earliest = |a: &&MemberLink, b: &&MemberLink| {
        a.date.cmp(&b.date).then_with(|| a.message_id.cmp(&b.message_id))
    };

    let orphan = links
        .iter()
        .filter(|l| match l.parent_id.as_deref() {
            None => true,
            Some(p) => p == l.message_id || !by_id.contains_key(p),
        })
        .min_by(earliest);
    if orphan.is_some() {
        return orphan;
    }

    let mut current = links.iter().min_by(earliest)?;
    let mut visited: HashSet<&str> = HashSet::new();
    while visited.insert(current.message_id.as_str()) {
        match current.parent_id.as_deref().and_then(|p| by_id.get(p)) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_memory_pool;
    use crate::types::ArchiveFormat;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn msg(id: &str, ancestors: &[&str], sender: &str, minute: i64) -> Message {
        let ancestors: Vec<String> = ancestors.iter().map(|s| s.to_string()).collect();
        Message {
            message_id: id.into(),
            subject: format!("[PATCH] subject of {}", id),
            sender: sender.into(),
            sender_name: None,
            date: Utc.with_ymd_and_hms(2024, 10, 15, 10, 0, 0).unwrap() + Duration::minutes(minute),
            body: String::new(),
            parent_id: ancestors.last().cloned(),
            ancestors,
            in_reply_to: None,
            tags: vec!["PATCH".into()],
            needs_review: false,
            origin: ArchiveFormat::Mbox,
        }
    }

    fn partition(r: &ThreadReconstructor) -> BTreeSet<BTreeSet<String>> {
        let conn = r.pool().get().unwrap();
        let mut stmt = conn
            .prepare("SELECT thread_id, message_id FROM thread_members")
            .unwrap();
        let rows: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let mut groups: HashMap<i64, BTreeSet<String>> = HashMap::new();
        for (thread, id) in rows {
            groups.entry(thread).or_default().insert(id);
        }
        groups.into_values().collect()
    }

    fn count(r: &ThreadReconstructor, table: &str) -> i64 {
        let conn = r.pool().get().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    fn reconstructor() -> ThreadReconstructor {
        ThreadReconstructor::new(create_memory_pool().unwrap())
    }

    #[test]
    fn test_forward_chain_single_thread() {
        let r = reconstructor();
        assert!(matches!(r.insert(&msg("a", &[], "x@l", 0)).unwrap(), Placement::Created(_)));
        assert!(matches!(r.insert(&msg("b", &["a"], "y@l", 1)).unwrap(), Placement::Attached(_)));
        let placed = r.insert(&msg("c", &["a", "b"], "x@l", 2)).unwrap();

        let thread = r.reconcile(placed.thread_id().unwrap()).unwrap();
        assert_eq!(thread.email_count, 3);
        assert_eq!(thread.participant_count, 2);
        assert_eq!(thread.root_message_id, "a");
        assert_eq!(thread.subject, "[PATCH] subject of a");
        assert_eq!(thread.tags, vec!["PATCH"]);
        assert_eq!(count(&r, "threads"), 1);
    }

    #[test]
    fn test_reverse_chain_merges() {
        let r = reconstructor();
        r.insert(&msg("c", &["a", "b"], "x@l", 2)).unwrap();
        r.insert(&msg("b", &["a"], "y@l", 1)).unwrap();
        let placed = r.insert(&msg("a", &[], "x@l", 0)).unwrap();

        let thread = r.reconcile(placed.thread_id().unwrap()).unwrap();
        assert_eq!(thread.email_count, 3);
        assert_eq!(thread.root_message_id, "a");
        assert_eq!(thread.first_post, Some(msg("a", &[], "", 0).date));
        assert_eq!(thread.last_post, Some(msg("c", &[], "", 2).date));
        assert_eq!(count(&r, "threads"), 1);
        assert_eq!(count(&r, "pending_ancestors"), 0);
    }

    #[test]
    fn test_unrelated_provisional_threads_merge_when_ancestor_arrives() {
        let r = reconstructor();
        // Two replies to the same unseen root land in separate provisional threads
        r.insert(&msg("r1", &["root"], "a@l", 5)).unwrap();
        r.insert(&msg("r2", &["root"], "b@l", 6)).unwrap();
        assert_eq!(count(&r, "threads"), 2);

        let placed = r.insert(&msg("root", &[], "c@l", 0)).unwrap();
        assert!(matches!(placed, Placement::Merged { absorbed: 1, .. }));
        assert_eq!(count(&r, "threads"), 1);

        let thread = r.reconcile(placed.thread_id().unwrap()).unwrap();
        assert_eq!(thread.root_message_id, "root");
        assert_eq!(thread.participant_count, 3);
    }

    #[test]
    fn test_bridge_message_merges_known_threads() {
        let r = reconstructor();
        let first = r.insert(&msg("p", &[], "a@l", 0)).unwrap().thread_id().unwrap();
        r.insert(&msg("q", &[], "b@l", 1)).unwrap();

        let placed = r.insert(&msg("m", &["p", "q"], "c@l", 2)).unwrap();
        assert_eq!(placed, Placement::Merged { thread_id: first, absorbed: 1 });
        assert_eq!(count(&r, "threads"), 1);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let r = reconstructor();
        r.insert(&msg("a", &[], "x@l", 0)).unwrap();
        assert_eq!(r.insert(&msg("a", &[], "x@l", 0)).unwrap(), Placement::Duplicate);
        assert_eq!(count(&r, "messages"), 1);
        assert_eq!(count(&r, "thread_members"), 1);
    }

    #[test]
    fn test_self_reference_is_own_thread() {
        let r = reconstructor();
        let placed = r.insert(&msg("s", &["s"], "x@l", 0)).unwrap();
        assert!(matches!(placed, Placement::Created(_)));
        let thread = r.reconcile(placed.thread_id().unwrap()).unwrap();
        assert_eq!(thread.root_message_id, "s");
        assert_eq!(count(&r, "pending_ancestors"), 0);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let r = reconstructor();
        r.insert(&msg("a", &["b"], "x@l", 0)).unwrap();
        let placed = r.insert(&msg("b", &["a"], "y@l", 1)).unwrap();
        let thread = r.reconcile(placed.thread_id().unwrap()).unwrap();
        assert_eq!(thread.email_count, 2);
        assert!(thread.root_message_id == "a" || thread.root_message_id == "b");
        assert_eq!(count(&r, "threads"), 1);
    }

    #[test]
    fn test_arrival_order_does_not_change_partition() {
        let messages = vec![
            msg("a", &[], "x@l", 0),
            msg("b", &["a"], "y@l", 1),
            msg("c", &["a", "b"], "z@l", 2),
            msg("d", &["a", "missing"], "x@l", 3),
            msg("e", &[], "w@l", 4),
        ];

        let mut expected: Option<BTreeSet<BTreeSet<String>>> = None;
        for order in permutations(messages.len()) {
            let r = reconstructor();
            for &i in &order {
                r.insert(&messages[i]).unwrap();
            }
            let got = partition(&r);
            match &expected {
                None => expected = Some(got),
                Some(e) => assert_eq!(&got, e, "order {:?}", order),
            }
        }

        let expected = expected.unwrap();
        assert_eq!(expected.len(), 2);
        assert!(expected.iter().any(|g| g.len() == 4));
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![vec![]];
        }
        let mut out = Vec::new();
        for perm in permutations(n - 1) {
            for pos in 0..=perm.len() {
                let mut p = perm.clone();
                p.insert(pos, n - 1);
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn test_reconcile_missing_thread() {
        let r = reconstructor();
        assert!(matches!(r.reconcile(42), Err(DigestError::NotFound(_))));
    }

    #[test]
    fn test_reconcile_without_changes_keeps_updated_at() {
        let r = reconstructor();
        let id = r.insert(&msg("a", &[], "x@l", 0)).unwrap().thread_id().unwrap();
        r.insert(&msg("b", &["a"], "y@l", 1)).unwrap();
        let stamp = || {
            let conn = r.pool().get().unwrap();
            threads::updated_at(&conn, id).unwrap()
        };
        let before = stamp();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let thread = r.reconcile(id).unwrap();
        assert_eq!(thread.email_count, 2);
        assert_eq!(stamp(), before);

        // A real change still moves it
        std::thread::sleep(std::time::Duration::from_millis(5));
        r.insert(&msg("c", &["a", "b"], "z@l", 2)).unwrap();
        assert!(stamp() > before);
    }
}
