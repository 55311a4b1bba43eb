//! Bounded conversation history used as short-term model context.
//!
//! Lives only in memory: nothing here survives a restart.

use std::collections::VecDeque;

/// Number of entries kept when no limit is configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// One side of an exchange: either the user's query or the model's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntry {
    pub text: String,
}

impl ConversationEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Most recent entries in chronological order, oldest evicted first.
#[derive(Debug)]
pub struct ConversationSession {
    entries: VecDeque<ConversationEntry>,
    limit: usize,
}

impl ConversationSession {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append a query/reply pair and trim to the limit.
    pub fn record_exchange(&mut self, query: &str, reply: &str) {
        self.entries.push_back(ConversationEntry::new(query));
        self.entries.push_back(ConversationEntry::new(reply));
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(session: &ConversationSession) -> Vec<&str> {
        session.entries().map(|e| e.text.as_str()).collect()
    }

    #[test]
    fn test_starts_empty() {
        let session = ConversationSession::default();
        assert!(session.is_empty());
        assert_eq!(session.len(), 0);
    }

    #[test]
    fn test_length_is_min_of_twice_exchanges_and_limit() {
        for n in 0..12 {
            let mut session = ConversationSession::default();
            for i in 0..n {
                session.record_exchange(&format!("q{i}"), &format!("a{i}"));
            }
            assert_eq!(session.len(), (2 * n).min(DEFAULT_HISTORY_LIMIT), "after {n} exchanges");
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent_in_order() {
        let mut session = ConversationSession::default();
        for i in 0..7 {
            session.record_exchange(&format!("q{i}"), &format!("a{i}"));
        }

        assert_eq!(
            texts(&session),
            vec!["q2", "a2", "q3", "a3", "q4", "a4", "q5", "a5", "q6", "a6"]
        );
    }

    #[test]
    fn test_clear() {
        let mut session = ConversationSession::default();
        session.record_exchange("hello", "hi there");
        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn test_odd_limit_drops_oldest_single_entry() {
        let mut session = ConversationSession::new(3);
        session.record_exchange("q0", "a0");
        session.record_exchange("q1", "a1");
        assert_eq!(texts(&session), vec!["a0", "q1", "a1"]);
    }
}
