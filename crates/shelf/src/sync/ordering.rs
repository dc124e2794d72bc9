//! Out-of-order response protection for search and pagination
//!
//! Search responses are not guaranteed to come back in request order: while
//! the user types "rust", the response for "r" often lands after the one for
//! "rust" because the broader query is slower on the server. Each request
//! gets a sequence number and a response is only applied if no later
//! request's response has been applied already.

use crate::error::{SyncError, SyncResult};

/// Sequence counters for last-issued-wins ordering
#[derive(Debug, Default, Clone)]
pub struct SearchOrderingGuard {
    issued: u64,
    accepted: u64,
}

impl SearchOrderingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the sequence number for a new request
    pub fn issue(&mut self) -> u64 {
        let sequence = self.issued;
        self.issued += 1;
        sequence
    }

    /// True when a response with `sequence` must be discarded
    ///
    /// Sequence 0 (the first request) is never stale.
    pub fn is_stale(&self, sequence: u64) -> bool {
        sequence > 0 && sequence <= self.accepted
    }

    /// Accept a completed response, or report it as discarded
    pub fn accept(&mut self, sequence: u64) -> SyncResult<()> {
        if self.is_stale(sequence) {
            return Err(SyncError::OrderingDiscarded {
                sequence,
                accepted: self.accepted,
            });
        }
        // Never move backwards, even when the first request finishes last
        self.accepted = self.accepted.max(sequence);
        Ok(())
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_response_wins() {
        let mut guard = SearchOrderingGuard::new();
        let first = guard.issue();
        let second = guard.issue();
        let third = guard.issue();
        assert_eq!((first, second, third), (0, 1, 2));

        // "rust" (third) answers before "ru" (second)
        assert!(guard.accept(third).is_ok());
        assert!(matches!(
            guard.accept(second),
            Err(SyncError::OrderingDiscarded {
                sequence: 1,
                accepted: 2
            })
        ));
        assert_eq!(guard.accepted(), 2);
    }

    #[test]
    fn test_sequence_zero_always_accepted() {
        let mut guard = SearchOrderingGuard::new();
        let initial = guard.issue();
        let later = guard.issue();

        guard.accept(later).unwrap();
        assert!(guard.accept(initial).is_ok());
        assert_eq!(guard.accepted(), later);
    }

    #[test]
    fn test_in_order_responses_all_accepted() {
        let mut guard = SearchOrderingGuard::new();
        for _ in 0..5 {
            let seq = guard.issue();
            assert!(guard.accept(seq).is_ok());
        }
        assert_eq!(guard.accepted(), 4);
        assert_eq!(guard.issued(), 5);
    }

    #[test]
    fn test_no_lower_sequence_after_higher() {
        let mut guard = SearchOrderingGuard::new();
        let sequences: Vec<u64> = (0..10).map(|_| guard.issue()).collect();

        // Completion order scrambled
        let completion = [3, 1, 7, 2, 9, 8, 0, 5, 4, 6];
        let mut highest_accepted = 0;
        for index in completion {
            let seq = sequences[index];
            if guard.accept(seq).is_ok() && seq > 0 {
                assert!(seq > highest_accepted);
                highest_accepted = seq;
            }
        }
        assert_eq!(highest_accepted, 9);
    }
}
