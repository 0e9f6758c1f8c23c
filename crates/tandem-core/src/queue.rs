//! FIFO matchmaking queue.

use crate::participant::SessionId;
use std::collections::{HashMap, VecDeque};

/// Dead entries tolerated before `remove` compacts the backing deque.
const COMPACT_SLACK: usize = 64;

/// Sessions waiting for an opportunistic partner, oldest first.
///
/// The queue holds IDs only; whether a popped entry is still live is checked
/// against the registry by the caller.
///
/// Membership is indexed, so `contains`, `remove` and duplicate detection in
/// `push` do not scan. Removal leaves a dead slot behind that `pop_front`
/// skips; each slot carries the sequence number it was pushed with, so a
/// session removed and pushed again is only live at its new place.
#[derive(Debug, Default)]
pub struct MatchQueue {
    entries: VecDeque<(SessionId, u64)>,
    members: HashMap<SessionId, u64>,
    next_seq: u64,
}

impl MatchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a session. Returns its 1-based position.
    ///
    /// A session already queued keeps its place.
    pub fn push(&mut self, id: SessionId) -> usize {
        if self.members.contains_key(&id) {
            return self.position(&id).unwrap_or(self.members.len());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.members.insert(id.clone(), seq);
        self.entries.push_back((id, seq));
        self.members.len()
    }

    /// Take the longest-waiting session.
    pub fn pop_front(&mut self) -> Option<SessionId> {
        while let Some((id, seq)) = self.entries.pop_front() {
            if self.members.get(&id) == Some(&seq) {
                self.members.remove(&id);
                return Some(id);
            }
        }
        None
    }

    /// Remove a session wherever it is. Returns `true` if it was queued.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        if self.members.remove(id).is_none() {
            return false;
        }
        if self.members.is_empty() {
            self.entries.clear();
        } else if self.entries.len() > 2 * self.members.len() + COMPACT_SLACK {
            let members = &self.members;
            self.entries.retain(|(entry, seq)| members.get(entry) == Some(seq));
        }
        true
    }

    /// 1-based position of a session.
    #[must_use]
    pub fn position(&self, id: &SessionId) -> Option<usize> {
        if !self.members.contains_key(id) {
            return None;
        }
        self.iter().position(|e| e == id).map(|i| i + 1)
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.members.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SessionId> {
        let members = &self.members;
        self.entries
            .iter()
            .filter(move |(id, seq)| members.get(id) == Some(seq))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(queue: &MatchQueue) -> Vec<SessionId> {
        queue.iter().cloned().collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MatchQueue::new();
        assert_eq!(queue.push("a".into()), 1);
        assert_eq!(queue.push("b".into()), 2);
        assert_eq!(queue.push("c".into()), 3);

        assert_eq!(queue.pop_front(), Some("a".into()));
        assert_eq!(queue.position(&"c".into()), Some(2));
    }

    #[test]
    fn test_push_is_idempotent() {
        let mut queue = MatchQueue::new();
        queue.push("a".into());
        queue.push("b".into());

        assert_eq!(queue.push("a".into()), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_from_middle() {
        let mut queue = MatchQueue::new();
        queue.push("a".into());
        queue.push("b".into());
        queue.push("c".into());

        assert!(queue.remove(&"b".into()));
        assert!(!queue.remove(&"b".into()));
        assert!(!queue.contains(&"b".into()));
        assert_eq!(queue.len(), 2);
        assert_eq!(ids(&queue), vec![SessionId::from("a"), SessionId::from("c")]);
        assert_eq!(queue.position(&"c".into()), Some(2));
    }

    #[test]
    fn test_removed_then_pushed_goes_to_back() {
        let mut queue = MatchQueue::new();
        queue.push("a".into());
        queue.push("b".into());
        queue.push("c".into());

        queue.remove(&"a".into());
        assert_eq!(queue.push("a".into()), 3);

        assert_eq!(queue.pop_front(), Some("b".into()));
        assert_eq!(queue.pop_front(), Some("c".into()));
        assert_eq!(queue.pop_front(), Some("a".into()));
        assert_eq!(queue.pop_front(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_churn_keeps_backing_store_bounded() {
        let mut queue = MatchQueue::new();
        queue.push("anchor".into());

        for i in 0..10_000 {
            let id = SessionId::new(format!("s-{}", i));
            queue.push(id.clone());
            assert!(queue.remove(&id));
        }

        assert_eq!(queue.len(), 1);
        assert!(queue.entries.len() <= 2 + COMPACT_SLACK + 1);
        assert_eq!(queue.pop_front(), Some("anchor".into()));
    }
}
