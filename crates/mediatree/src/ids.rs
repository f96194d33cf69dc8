use std::sync::atomic::{AtomicU64, Ordering};

/// Source of new commit ids. Ids must never repeat within one event log.
pub trait CommitIdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Deterministic ids: `{prefix}-1`, `{prefix}-2`, ...
///
/// Only unique within one generator; use a random generator when several
/// processes append to the same log.
#[derive(Debug)]
pub struct SequentialCommitIds {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialCommitIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for SequentialCommitIds {
    fn default() -> Self {
        Self::new("commit")
    }
}

impl CommitIdGenerator for SequentialCommitIds {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialCommitIds::new("c");
        assert_eq!(ids.next_id(), "c-1");
        assert_eq!(ids.next_id(), "c-2");
        assert_eq!(SequentialCommitIds::default().next_id(), "commit-1");
    }
}
