use std::collections::BTreeMap;

use crate::message::Message;

/// A fixed-capacity, score-ordered index over stored messages, keyed by
/// `mid`. Backed by a `BTreeMap` — a balanced search tree is an equivalent
/// substitute for the ordered associative structure this needs (insert,
/// delete, and forward range iteration from a given score, all O(log n)).
#[derive(Debug, Default)]
pub struct OrderedBuffer {
    entries: BTreeMap<i64, Message>,
}

impl OrderedBuffer {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts the smallest-score entry, if any. Called before an insert that
    /// would otherwise exceed capacity.
    pub fn evict_smallest(&mut self) -> Option<Message> {
        let key = *self.entries.keys().next()?;
        self.entries.remove(&key)
    }

    /// Inserts `message`, failing if its `mid` already exists. Duplicate mids
    /// are a publisher error, not silently renumbered.
    pub fn insert_unique(&mut self, message: Message) -> Result<(), Message> {
        if self.entries.contains_key(&message.mid) {
            return Err(message);
        }
        self.entries.insert(message.mid, message);
        Ok(())
    }

    pub fn delete(&mut self, mid: i64) -> Option<Message> {
        self.entries.remove(&mid)
    }

    /// Walks entries with `mid > since_mid` in ascending order. Any entry
    /// expired as of `now_ns` is deleted and skipped rather than returned;
    /// iteration continues to the next surviving entry since the walk
    /// re-resolves by score on every step rather than holding a cursor
    /// across the mutation.
    pub fn drain_replay(&mut self, since_mid: i64, now_ns: i64) -> Vec<Message> {
        let mut live = Vec::new();
        let expired_mids: Vec<i64> = self
            .entries
            .range((
                std::ops::Bound::Excluded(since_mid),
                std::ops::Bound::Unbounded,
            ))
            .filter(|(_, msg)| msg.is_expired(now_ns))
            .map(|(mid, _)| *mid)
            .collect();
        for mid in expired_mids {
            self.entries.remove(&mid);
        }
        for (_, msg) in self.entries.range((
            std::ops::Bound::Excluded(since_mid),
            std::ops::Bound::Unbounded,
        )) {
            live.push(msg.clone());
        }
        live
    }

    /// The smallest score strictly greater than `since_mid`, if any.
    pub fn first_greater(&self, since_mid: i64) -> Option<&Message> {
        self.entries
            .range((
                std::ops::Bound::Excluded(since_mid),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(_, msg)| msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(mid: i64) -> Message {
        Message::new(format!("m{mid}"), mid, i64::MAX)
    }

    #[test]
    fn insert_unique_rejects_duplicate_mid() {
        let mut buf = OrderedBuffer::new();
        buf.insert_unique(msg(1)).unwrap();
        let err = buf.insert_unique(msg(1)).unwrap_err();
        assert_eq!(err.mid, 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn evict_smallest_removes_lowest_score() {
        let mut buf = OrderedBuffer::new();
        buf.insert_unique(msg(3)).unwrap();
        buf.insert_unique(msg(1)).unwrap();
        buf.insert_unique(msg(2)).unwrap();
        let evicted = buf.evict_smallest().unwrap();
        assert_eq!(evicted.mid, 1);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn drain_replay_returns_ascending_and_skips_since_mid() {
        let mut buf = OrderedBuffer::new();
        buf.insert_unique(msg(5)).unwrap();
        buf.insert_unique(msg(7)).unwrap();
        let replay = buf.drain_replay(4, 0);
        assert_eq!(replay.iter().map(|m| m.mid).collect::<Vec<_>>(), vec![5, 7]);

        let replay = buf.drain_replay(5, 0);
        assert_eq!(replay.iter().map(|m| m.mid).collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn drain_replay_prunes_expired_entries_and_continues() {
        let mut buf = OrderedBuffer::new();
        buf.insert_unique(Message::new("a", 1, 10)).unwrap();
        buf.insert_unique(Message::new("b", 2, i64::MAX)).unwrap();
        let replay = buf.drain_replay(0, 100);
        assert_eq!(replay.iter().map(|m| m.mid).collect::<Vec<_>>(), vec![2]);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn first_greater_boundaries() {
        let mut buf = OrderedBuffer::new();
        buf.insert_unique(msg(5)).unwrap();
        assert_eq!(buf.first_greater(4).unwrap().mid, 5);
        assert!(buf.first_greater(5).is_none());
    }
}
