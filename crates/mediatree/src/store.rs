//! Event store boundary and an in-memory implementation.

use crate::error::StoreError;
use crate::types::{MediaTypeTreeEvent, StoredEvent};
use std::sync::{Arc, Mutex};

/// Persistence contract for media-type tree events.
///
/// Streams are keyed by tree id. Every appended event receives a global
/// sequence number; `load` returns one stream in that order, `load_after`
/// returns every stream interleaved in that order. The log is the only state:
/// the main tree is whatever the last appended `MainTreeSet` event names.
pub trait EventStore {
    /// All events of `tree_id`, oldest first. Unknown ids yield an empty list.
    fn load(&self, tree_id: &str) -> Result<Vec<StoredEvent>, StoreError>;

    /// All events of all streams with a sequence greater than `sequence`.
    fn load_after(&self, sequence: u64) -> Result<Vec<StoredEvent>, StoreError>;

    /// Append `events` to the stream of `tree_id`, all or nothing.
    ///
    /// Fails with [`StoreError::StreamMismatch`] if any event belongs to a
    /// different tree; nothing is written in that case.
    fn append(
        &mut self,
        tree_id: &str,
        events: &[MediaTypeTreeEvent],
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// The tree named by the last `MainTreeSet` event, if any.
    fn main_tree(&self) -> Result<Option<String>, StoreError>;
}

/// Check that every event belongs to `tree_id`.
pub fn check_stream(tree_id: &str, events: &[MediaTypeTreeEvent]) -> Result<(), StoreError> {
    match events.iter().find(|e| e.tree_id() != tree_id) {
        Some(event) => Err(StoreError::StreamMismatch {
            stream: tree_id.to_string(),
            event_tree: event.tree_id().to_string(),
        }),
        None => Ok(()),
    }
}

/// Tree named by the last [`MediaTypeTreeEvent::MainTreeSet`] in `events`.
pub fn last_main_tree<'a>(
    events: impl IntoIterator<Item = &'a MediaTypeTreeEvent>,
) -> Option<&'a str> {
    events
        .into_iter()
        .filter_map(|event| match event {
            MediaTypeTreeEvent::MainTreeSet { tree_id, .. } => Some(tree_id.as_str()),
            _ => None,
        })
        .last()
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<StoredEvent>,
    main_tree: Option<String>,
}

/// In-memory [`EventStore`]. Clones share the same underlying log.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events across all streams.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock()?.events.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl EventStore for MemoryEventStore {
    fn load(&self, tree_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let state = self.state.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.event.tree_id() == tree_id)
            .cloned()
            .collect())
    }

    fn load_after(&self, sequence: u64) -> Result<Vec<StoredEvent>, StoreError> {
        let state = self.state.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.sequence > sequence)
            .cloned()
            .collect())
    }

    fn append(
        &mut self,
        tree_id: &str,
        events: &[MediaTypeTreeEvent],
    ) -> Result<Vec<StoredEvent>, StoreError> {
        check_stream(tree_id, events)?;
        let mut state = self.state.lock()?;
        let next = state.events.last().map_or(1, |e| e.sequence + 1);
        let stored: Vec<StoredEvent> = events
            .iter()
            .enumerate()
            .map(|(i, event)| StoredEvent::new(next + i as u64, event.clone()))
            .collect();
        if let Some(main) = last_main_tree(events) {
            state.main_tree = Some(main.to_string());
        }
        state.events.extend(stored.iter().cloned());
        Ok(stored)
    }

    fn main_tree(&self) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock()?.main_tree.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(tree_id: &str) -> MediaTypeTreeEvent {
        MediaTypeTreeEvent::TreeCreated {
            tree_id: tree_id.into(),
            name: tree_id.into(),
            base_tree_id: None,
            owner_id: 1,
        }
    }

    #[test]
    fn test_append_assigns_global_sequence() {
        let mut store = MemoryEventStore::new();
        let a = store.append("a", &[created("a")]).unwrap();
        let b = store.append("b", &[created("b")]).unwrap();
        assert_eq!(a[0].sequence, 1);
        assert_eq!(b[0].sequence, 2);

        assert_eq!(store.load("a").unwrap().len(), 1);
        assert_eq!(store.load("missing").unwrap().len(), 0);
        let after = store.load_after(1).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].event.tree_id(), "b");
    }

    #[test]
    fn test_append_rejects_foreign_events_atomically() {
        let mut store = MemoryEventStore::new();
        let err = store.append("a", &[created("a"), created("b")]).unwrap_err();
        assert!(matches!(err, StoreError::StreamMismatch { .. }));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_clones_share_the_log() {
        let mut store = MemoryEventStore::new();
        let reader = store.clone();
        store.append("a", &[created("a")]).unwrap();
        assert_eq!(reader.len().unwrap(), 1);
    }

    fn main_set(tree_id: &str) -> MediaTypeTreeEvent {
        MediaTypeTreeEvent::MainTreeSet {
            tree_id: tree_id.into(),
            user_id: 1,
        }
    }

    #[test]
    fn test_main_tree_follows_the_log() {
        let mut store = MemoryEventStore::new();
        assert_eq!(store.main_tree().unwrap(), None);
        store.append("main", &[created("main"), main_set("main")]).unwrap();
        store.append("next", &[created("next")]).unwrap();
        assert_eq!(store.main_tree().unwrap(), Some("main".to_string()));

        store.append("next", &[main_set("next")]).unwrap();
        assert_eq!(store.main_tree().unwrap(), Some("next".to_string()));

        assert!(store.append("main", &[main_set("other")]).is_err());
        assert_eq!(store.main_tree().unwrap(), Some("next".to_string()));
    }
}
