//! Bounded recent-message ring.

use std::collections::VecDeque;
use std::sync::Arc;

use chatml_protocol::Message;

/// Most storage preallocated up front; a larger ring grows as it fills.
const PREALLOCATED: usize = 64;

/// The most recent messages of a room, oldest first. Pushing past
/// capacity drops the oldest entry.
#[derive(Debug)]
pub(crate) struct History {
    entries: VecDeque<Arc<Message>>,
    capacity: usize,
}

impl History {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(PREALLOCATED)),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, message: Arc<Message>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Chronological copy of the ring.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Message>> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn last(&self) -> Option<Arc<Message>> {
        self.entries.back().cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatml_protocol::MemberInfo;

    fn line(content: &str) -> Arc<Message> {
        Arc::new(Message::text(MemberInfo::new("alice", "Alice"), content))
    }

    fn contents(history: &History) -> Vec<String> {
        history
            .snapshot()
            .iter()
            .filter_map(|m| m.as_text().map(|t| t.content.clone()))
            .collect()
    }

    #[test]
    fn test_keeps_insertion_order() {
        let mut history = History::new(3);
        history.push(line("a"));
        history.push(line("b"));
        assert_eq!(contents(&history), ["a", "b"]);
    }

    #[test]
    fn test_drops_oldest_past_capacity() {
        let mut history = History::new(2);
        for c in ["a", "b", "c"] {
            history.push(line(c));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(contents(&history), ["b", "c"]);
        let last = history.last().unwrap();
        assert_eq!(last.as_text().unwrap().content, "c");
    }

    #[test]
    fn test_huge_capacity_is_not_preallocated() {
        let mut history = History::new(usize::MAX);
        history.push(line("a"));
        assert_eq!(contents(&history), ["a"]);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut history = History::new(0);
        history.push(line("a"));
        assert_eq!(history.len(), 0);
        assert!(history.last().is_none());
    }
}
