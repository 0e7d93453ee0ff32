//! Per-conversation message id allocation.

use crate::conversation::ConversationId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-conversation monotonic id counter.
///
/// Ids start at 1 and are strictly increasing per conversation for the
/// lifetime of the process, with no reuse even across membership churn.
/// Atomic increment-and-read keeps the sequence gapless under
/// concurrent senders.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    counters: DashMap<ConversationId, AtomicU64>,
}

impl SequenceAllocator {
    /// Create an allocator with no counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for the conversation: 1 on first call, then strictly
    /// increasing. Unknown conversations start fresh at 1.
    pub fn next(&self, conversation_id: &str) -> u64 {
        let counter = self
            .counters
            .entry(conversation_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The last id assigned for the conversation (0 if none).
    #[must_use]
    pub fn current(&self, conversation_id: &str) -> u64 {
        self.counters
            .get(conversation_id)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let allocator = SequenceAllocator::new();
        assert_eq!(allocator.current("c1"), 0);
        assert_eq!(allocator.next("c1"), 1);
        assert_eq!(allocator.next("c1"), 2);
        assert_eq!(allocator.next("c1"), 3);
        assert_eq!(allocator.current("c1"), 3);
    }

    #[test]
    fn test_conversations_are_independent() {
        let allocator = SequenceAllocator::new();
        assert_eq!(allocator.next("c1"), 1);
        assert_eq!(allocator.next("c2"), 1);
        assert_eq!(allocator.next("c1"), 2);
        assert_eq!(allocator.next("c2"), 2);
    }

    #[test]
    fn test_concurrent_allocation_has_no_gaps_or_repeats() {
        let allocator = Arc::new(SequenceAllocator::new());
        let threads = 4;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| allocator.next("c1"))
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ids.sort_unstable();

        let expected: Vec<u64> = (1..=(threads * per_thread) as u64).collect();
        assert_eq!(ids, expected);
    }
}
