//! Loading and saving aggregates against an [`EventStore`].

use crate::aggregate::MediaTypeTree;
use crate::error::{RepositoryError, StoreError};
use crate::ids::CommitIdGenerator;
use crate::store::EventStore;
use crate::types::{MediaTypeTreeEvent, StoredEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub struct MediaTypeTreeRepository<S> {
    store: S,
    ids: Arc<dyn CommitIdGenerator>,
}

impl<S: EventStore> MediaTypeTreeRepository<S> {
    pub fn new(store: S, ids: Arc<dyn CommitIdGenerator>) -> Self {
        Self { store, ids }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Load `tree_id` together with every stream its history depends on.
    ///
    /// Starting from `tree_id` and `related`, streams are collected until no
    /// collected event references an unseen tree (fork bases and merge
    /// sources). The union is replayed in global sequence order. A tree with
    /// no events loads as an uncreated aggregate.
    pub fn load(&self, tree_id: &str, related: &[&str]) -> Result<MediaTypeTree, RepositoryError> {
        let events = self.collect(tree_id, related)?;
        let tree = MediaTypeTree::load(tree_id, events.values(), self.ids.clone())?;
        Ok(tree)
    }

    fn collect(
        &self,
        tree_id: &str,
        related: &[&str],
    ) -> Result<BTreeMap<u64, MediaTypeTreeEvent>, StoreError> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<String> = std::iter::once(tree_id)
            .chain(related.iter().copied())
            .map(str::to_string)
            .collect();
        let mut events = BTreeMap::new();

        while let Some(stream) = pending.pop() {
            if !seen.insert(stream.clone()) {
                continue;
            }
            for stored in self.store.load(&stream)? {
                if let Some(referenced) = stored.event.referenced_tree_id()
                    && !seen.contains(referenced)
                {
                    pending.push(referenced.to_string());
                }
                events.insert(stored.sequence, stored.event);
            }
        }

        tracing::debug!(
            tree_id,
            streams = seen.len(),
            events = events.len(),
            "collected event streams"
        );
        Ok(events)
    }

    /// Append the aggregate's uncommitted events as one batch.
    ///
    /// The events are only drained from the aggregate once the store has
    /// accepted them.
    pub fn save(&mut self, tree: &mut MediaTypeTree) -> Result<Vec<StoredEvent>, StoreError> {
        if tree.uncommitted_events().is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.store.append(tree.id(), tree.uncommitted_events())?;
        tree.take_uncommitted_events();
        Ok(stored)
    }
}
