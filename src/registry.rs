//! The shared map of who is online.
//!
//! This is the only state more than one session touches. Every read and write goes through one
//! mutex and no critical section awaits or writes to a socket: callers copy out what they need
//! (`snapshot`, `names`) and release the lock before doing IO.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::session::{Outgoing, SessionId};

/// Returned when another live session already holds the nickname.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("nickname {0:?} is already taken")]
pub struct NameTaken(pub Arc<str>);

/// Why a line could not be queued for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// The registry's view of one active session.
#[derive(Debug)]
pub struct Member {
    pub id: SessionId,
    pub name: Arc<str>,
    pub addr: SocketAddr,
    outbox: Sender<Outgoing>,
    closer: CancellationToken,
}

impl Member {
    pub fn new(
        id: SessionId,
        name: Arc<str>,
        addr: SocketAddr,
        outbox: Sender<Outgoing>,
        closer: CancellationToken,
    ) -> Member {
        Member {
            id,
            name,
            addr,
            outbox,
            closer,
        }
    }

    /// Queues a line without waiting. A full or closed queue drops the line for this member only.
    pub fn deliver(&self, line: Arc<str>) -> Result<(), DeliveryError> {
        self.outbox
            .try_send(Outgoing::Line(line))
            .map_err(|err| match err {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Forces the member's connection shut. Its session sees a failed read and cleans up.
    pub fn close(&self) {
        self.closer.cancel();
    }
}

#[derive(Debug)]
struct Entry {
    /// Join order, so listings read oldest first.
    seq: u64,
    member: Arc<Member>,
}

#[derive(Debug, Default)]
struct Members {
    by_name: HashMap<Arc<str>, Entry>,
    next_seq: u64,
}

impl Members {
    fn in_join_order(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.by_name.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }
}

/// Cheaply clonable handle to the single identity -> session map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Members>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        // A panic elsewhere must not take the whole chat down with it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts the member unless its nickname is held. Check and insert happen under one lock.
    ///
    /// Returns the number of members online including the new one.
    pub fn try_insert(&self, member: Member) -> Result<usize, NameTaken> {
        self.try_insert_with(member, |_| ())
    }

    /// Like [`Registry::try_insert`], but runs `on_insert` with the online count before the lock
    /// is released, so nothing can reach the new member ahead of what `on_insert` queues.
    ///
    /// `on_insert` must not block or touch the registry. It is dropped unrun if the name is taken.
    pub fn try_insert_with<F>(&self, member: Member, on_insert: F) -> Result<usize, NameTaken>
    where
        F: FnOnce(usize),
    {
        let mut members = self.lock();
        if members.by_name.contains_key(&member.name) {
            return Err(NameTaken(member.name.clone()));
        }
        let seq = members.next_seq;
        members.next_seq += 1;
        let name = member.name.clone();
        let _ = members.by_name.insert(
            name,
            Entry {
                seq,
                member: Arc::new(member),
            },
        );
        let online = members.by_name.len();
        on_insert(online);
        Ok(online)
    }

    /// Removes `name` if, and only if, it is held by session `id`.
    ///
    /// Returns whether anything was removed, so a second call for the same session is a no-op.
    pub fn remove(&self, name: &str, id: SessionId) -> bool {
        let mut members = self.lock();
        let owned = members
            .by_name
            .get(name)
            .map_or(false, |entry| entry.member.id == id);
        if owned {
            let _ = members.by_name.remove(name);
        }
        owned
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nicknames online right now, oldest first.
    pub fn names(&self) -> Vec<Arc<str>> {
        let members = self.lock();
        let names = members
            .in_join_order()
            .into_iter()
            .map(|entry| entry.member.name.clone())
            .collect();
        names
    }

    /// Point in time copy of every member handle, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Member>> {
        let members = self.lock();
        let snapshot = members
            .in_join_order()
            .into_iter()
            .map(|entry| entry.member.clone())
            .collect();
        snapshot
    }

    /// Empties the registry and hands back everyone who was in it.
    pub fn drain(&self) -> Vec<Arc<Member>> {
        let mut members = self.lock();
        let mut entries: Vec<Entry> = members.by_name.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.member).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, Receiver};

    pub(crate) fn member(id: u64, name: &str) -> (Member, Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(8);
        let member = Member::new(
            SessionId(id),
            Arc::from(name),
            "127.0.0.1:4000".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );
        (member, rx)
    }

    #[test]
    fn insert_reports_online_count() {
        let registry = Registry::new();
        assert_eq!(registry.try_insert(member(1, "Alice").0), Ok(1));
        assert_eq!(registry.try_insert(member(2, "Bob").0), Ok(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_name_is_rejected_without_evicting_holder() {
        let registry = Registry::new();
        registry.try_insert(member(1, "Alice").0).unwrap();
        assert_eq!(
            registry.try_insert(member(2, "Alice").0),
            Err(NameTaken(Arc::from("Alice")))
        );
        let holder = registry.snapshot();
        assert_eq!(holder.len(), 1);
        assert_eq!(holder[0].id, SessionId(1));
        assert_eq!(holder[0].addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn names_are_case_sensitive() {
        let registry = Registry::new();
        registry.try_insert(member(1, "alice").0).unwrap();
        assert!(registry.try_insert(member(2, "Alice").0).is_ok());
    }

    #[test]
    fn remove_only_touches_the_owning_session() {
        let registry = Registry::new();
        registry.try_insert(member(1, "Alice").0).unwrap();
        assert!(!registry.remove("Alice", SessionId(9)));
        assert!(registry.contains("Alice"));
        assert!(registry.remove("Alice", SessionId(1)));
        assert!(!registry.remove("Alice", SessionId(1)));
        assert!(registry.is_empty());
    }

    #[test]
    fn released_name_can_be_reused() {
        let registry = Registry::new();
        registry.try_insert(member(1, "Bob").0).unwrap();
        registry.remove("Bob", SessionId(1));
        assert_eq!(registry.try_insert(member(2, "Bob").0), Ok(1));
    }

    #[test]
    fn listings_follow_join_order() {
        let registry = Registry::new();
        for (id, name) in ["Zed", "Alice", "Mia"].iter().enumerate() {
            registry.try_insert(member(id as u64, name).0).unwrap();
        }
        let names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["Zed", "Alice", "Mia"]);
        let drained: Vec<SessionId> = registry.drain().iter().map(|m| m.id).collect();
        assert_eq!(drained, [SessionId(0), SessionId(1), SessionId(2)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_claims_on_one_name_admit_exactly_one() {
        let registry = Registry::new();
        let handles: Vec<_> = (0..16)
            .map(|id| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.try_insert(member(id, "Alice").0).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_hook_runs_only_for_the_winner() {
        let registry = Registry::new();
        let mut seen = Vec::new();
        registry.try_insert_with(member(1, "Alice").0, |online| seen.push(online)).unwrap();
        registry.try_insert_with(member(2, "Bob").0, |online| seen.push(online)).unwrap();
        assert!(registry.try_insert_with(member(3, "Bob").0, |online| seen.push(online)).is_err());
        assert_eq!(seen, [1, 2]);
    }

    #[test]
    fn deliver_reports_closed_queue() {
        let (member, rx) = member(1, "Alice");
        drop(rx);
        assert_eq!(member.deliver(Arc::from("hi")), Err(DeliveryError::Closed));
    }
}
