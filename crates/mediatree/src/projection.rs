//! Read side: answers queries from the event log, never mutates it.

use crate::error::{MediaTypeTreeError, RepositoryError, Result};
use crate::history::CommitHistory;
use crate::store::EventStore;
use crate::types::{Change, Commit, MediaTypeTreeEvent, MediaTypeView, MergeRequest, StoredEvent, TreeSummary};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct TreeRecord {
    name: String,
    owner_id: u64,
    base_tree_id: Option<String>,
}

/// Query model over every tree in a store.
///
/// Fed with [`StoredEvent`]s in sequence order, either one at a time through
/// [`apply`](Self::apply) or in bulk with [`catch_up`](Self::catch_up). Events
/// at or below [`last_sequence`](Self::last_sequence) are ignored, so feeding
/// the same events twice is harmless. Each event advances the tree of its
/// branch in the same [`CommitHistory`] the command side uses, so queries
/// read current trees without replaying history.
#[derive(Debug, Clone, Default)]
pub struct MediaTypeTreeProjection {
    history: CommitHistory,
    trees: BTreeMap<String, TreeRecord>,
    merge_requests: BTreeMap<String, BTreeMap<String, MergeRequest>>,
    main_tree_id: Option<String>,
    last_sequence: u64,
}

impl MediaTypeTreeProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a projection from everything currently in `store`.
    pub fn from_store<S: EventStore>(store: &S) -> std::result::Result<Self, RepositoryError> {
        let mut projection = Self::new();
        projection.catch_up(store)?;
        Ok(projection)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Apply every event in `store` newer than [`last_sequence`](Self::last_sequence).
    /// Returns the number of events applied.
    pub fn catch_up<S: EventStore>(&mut self, store: &S) -> std::result::Result<usize, RepositoryError> {
        let mut applied = 0;
        for stored in store.load_after(self.last_sequence)? {
            if self.apply(&stored)? {
                applied += 1;
            }
        }
        tracing::debug!(applied, last_sequence = self.last_sequence, "projection caught up");
        Ok(applied)
    }

    /// Apply one stored event. Returns `false` if it was already seen.
    pub fn apply(&mut self, stored: &StoredEvent) -> Result<bool> {
        if stored.sequence <= self.last_sequence {
            return Ok(false);
        }
        self.apply_event(&stored.event).map_err(|err| {
            let err = match err {
                MediaTypeTreeError::CorruptHistory(_) => err,
                other => MediaTypeTreeError::CorruptHistory(format!(
                    "event {} ({}) cannot be projected: {other}",
                    stored.sequence,
                    stored.event.kind()
                )),
            };
            tracing::error!(sequence = stored.sequence, error = %err, "projection stopped");
            err
        })?;
        self.last_sequence = stored.sequence;
        Ok(true)
    }

    fn apply_event(&mut self, event: &MediaTypeTreeEvent) -> Result<()> {
        match event {
            MediaTypeTreeEvent::TreeCreated {
                tree_id,
                name,
                base_tree_id,
                owner_id,
            } => {
                if self.history.has_branch(tree_id) {
                    return Err(MediaTypeTreeError::MediaTypeTreeAlreadyExists(
                        tree_id.clone(),
                    ));
                }
                self.history
                    .create_branch(tree_id, base_tree_id.as_deref())?;
                self.trees.insert(
                    tree_id.clone(),
                    TreeRecord {
                        name: name.clone(),
                        owner_id: *owner_id,
                        base_tree_id: base_tree_id.clone(),
                    },
                );
            }
            MediaTypeTreeEvent::MediaTypeAdded { tree_id, .. }
            | MediaTypeTreeEvent::MediaTypeRemoved { tree_id, .. }
            | MediaTypeTreeEvent::ParentAddedToMediaType { tree_id, .. } => {
                if let Some((commit_id, change)) = Change::from_event(event) {
                    self.history.add_commit(tree_id, commit_id, change)?;
                }
            }
            MediaTypeTreeEvent::TreesMerged {
                tree_id,
                commit_id,
                source_tree_id,
                merge_request_id,
            } => {
                let change = Change::Merge {
                    source_tree_id: source_tree_id.clone(),
                };
                self.history
                    .add_merge_commit(source_tree_id, tree_id, commit_id, change)?;
                if let Some(request_id) = merge_request_id
                    && let Some(open) = self.merge_requests.get_mut(tree_id)
                {
                    open.remove(request_id);
                }
            }
            MediaTypeTreeEvent::MergeRequested {
                tree_id,
                merge_request_id,
                source_tree_id,
                user_id,
            } => {
                let open = self.merge_requests.entry(tree_id.clone()).or_default();
                if open.contains_key(merge_request_id) {
                    return Err(MediaTypeTreeError::MediaTypeMergeRequestAlreadyExists(
                        merge_request_id.clone(),
                    ));
                }
                open.insert(
                    merge_request_id.clone(),
                    MergeRequest {
                        id: merge_request_id.clone(),
                        source_tree_id: source_tree_id.clone(),
                        target_tree_id: tree_id.clone(),
                        user_id: *user_id,
                    },
                );
            }
            MediaTypeTreeEvent::MainTreeSet { tree_id, .. } => {
                self.main_tree_id = Some(tree_id.clone());
            }
        }
        Ok(())
    }

    // ── queries ────────────────────────────────────────────────────────

    /// Every media type of `tree_id` with its children, in id order.
    /// `Ok(None)` if the tree does not exist.
    pub fn tree(&self, tree_id: &str) -> Result<Option<Vec<MediaTypeView>>> {
        if !self.history.has_branch(tree_id) {
            return Ok(None);
        }
        let state = self.history.tree(tree_id)?;
        Ok(Some(
            state
                .iter()
                .map(|mt| MediaTypeView {
                    id: mt.id.clone(),
                    name: mt.name.clone(),
                    children: mt.children.iter().cloned().collect(),
                })
                .collect(),
        ))
    }

    pub fn trees(&self) -> Vec<TreeSummary> {
        self.trees
            .iter()
            .map(|(id, record)| TreeSummary {
                id: id.clone(),
                name: record.name.clone(),
                owner_id: record.owner_id,
                base_tree_id: record.base_tree_id.clone(),
                tip: self
                    .history
                    .tip(id)
                    .ok()
                    .flatten()
                    .map(str::to_string),
            })
            .collect()
    }

    pub fn main_tree_id(&self) -> Option<&str> {
        self.main_tree_id.as_deref()
    }

    /// Open merge requests targeting `tree_id`.
    pub fn merge_requests(&self, tree_id: &str) -> Vec<&MergeRequest> {
        self.merge_requests
            .get(tree_id)
            .map(|open| open.values().collect())
            .unwrap_or_default()
    }

    /// Commits of `tree_id`, oldest first.
    pub fn commits(&self, tree_id: &str) -> Result<Vec<&Commit>> {
        self.history.commits_by_branch(tree_id)
    }

    /// Merge base of two trees.
    pub fn last_common_commit(&self, source_tree_id: &str, target_tree_id: &str) -> Result<Option<String>> {
        self.history
            .last_common_commit(source_tree_id, target_tree_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialCommitIds;
    use crate::service::{Command, MediaTypeTreeService, Permission, User};
    use crate::store::MemoryEventStore;
    use std::sync::Arc;

    fn service() -> MediaTypeTreeService<MemoryEventStore> {
        MediaTypeTreeService::new(
            MemoryEventStore::new(),
            Arc::new(SequentialCommitIds::new("c")),
        )
    }

    fn user() -> User {
        User::new(1)
            .with_permission(Permission::MediaTypeTreesCreate)
            .with_permission(Permission::MediaTypeTreesAdmin)
    }

    fn create(svc: &mut MediaTypeTreeService<MemoryEventStore>, id: &str, base: Option<&str>) {
        svc.execute(&user(), Command::CreateTree {
            tree_id: id.into(),
            name: id.into(),
            base_tree_id: base.map(str::to_string),
        })
        .unwrap();
    }

    fn add(svc: &mut MediaTypeTreeService<MemoryEventStore>, tree: &str, id: &str) {
        svc.execute(&user(), Command::AddMediaType {
            tree_id: tree.into(),
            media_type_id: id.into(),
            name: id.into(),
        })
        .unwrap();
    }

    #[test]
    fn test_unknown_tree_is_none() {
        let projection = MediaTypeTreeProjection::new();
        assert_eq!(projection.tree("ghost").unwrap(), None);
        assert!(projection.merge_requests("ghost").is_empty());
        assert!(projection.commits("ghost").is_err());
    }

    #[test]
    fn test_tree_lists_children() {
        let mut svc = service();
        create(&mut svc, "main", None);
        add(&mut svc, "main", "album");
        add(&mut svc, "main", "track");
        svc.execute(&user(), Command::AddParentToMediaType {
            tree_id: "main".into(),
            child_id: "track".into(),
            parent_id: "album".into(),
        })
        .unwrap();

        let projection = MediaTypeTreeProjection::from_store(svc.store()).unwrap();
        let views = projection.tree("main").unwrap().unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, "album");
        assert_eq!(views[0].children, vec!["track"]);
        assert!(views[1].children.is_empty());
    }

    #[test]
    fn test_catch_up_is_incremental_and_idempotent() {
        let mut svc = service();
        create(&mut svc, "main", None);
        let mut projection = MediaTypeTreeProjection::from_store(svc.store()).unwrap();
        assert_eq!(projection.last_sequence(), 1);

        add(&mut svc, "main", "album");
        assert_eq!(projection.catch_up(svc.store()).unwrap(), 1);
        assert_eq!(projection.catch_up(svc.store()).unwrap(), 0);

        let replayed = svc.store().load_after(0).unwrap();
        for stored in &replayed {
            assert!(!projection.apply(stored).unwrap());
        }
        assert_eq!(projection.tree("main").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_tree_matches_full_replay_after_merges() {
        let mut svc = service();
        create(&mut svc, "main", None);
        add(&mut svc, "main", "album");
        create(&mut svc, "feature", Some("main"));
        add(&mut svc, "feature", "live");
        add(&mut svc, "main", "track");
        for (target, source) in [("main", "feature"), ("feature", "main")] {
            svc.execute(&user(), Command::Merge {
                tree_id: target.into(),
                source_tree_id: source.into(),
                merge_request_id: None,
            })
            .unwrap();
        }

        let projection = MediaTypeTreeProjection::from_store(svc.store()).unwrap();
        for tree_id in ["main", "feature"] {
            let views = projection.tree(tree_id).unwrap().unwrap();
            let replayed = projection.history.materialize_branch(tree_id).unwrap();
            let ids: Vec<&str> = views.iter().map(|v| v.id.as_str()).collect();
            let replayed_ids: Vec<&str> = replayed.iter().map(|mt| mt.id.as_str()).collect();
            assert_eq!(ids, replayed_ids);
            assert_eq!(ids, vec!["album", "live", "track"]);
        }
    }

    #[test]
    fn test_summaries_and_merge_requests() {
        let mut svc = service();
        create(&mut svc, "main", None);
        create(&mut svc, "feature", Some("main"));
        add(&mut svc, "feature", "live");
        svc.execute(&user(), Command::RequestMerge {
            tree_id: "main".into(),
            merge_request_id: "mr-1".into(),
            source_tree_id: "feature".into(),
        })
        .unwrap();
        svc.execute(&user(), Command::SetMainTree {
            tree_id: "main".into(),
        })
        .unwrap();

        let mut projection = MediaTypeTreeProjection::from_store(svc.store()).unwrap();
        assert_eq!(projection.main_tree_id(), Some("main"));
        assert_eq!(projection.merge_requests("main").len(), 1);

        let summaries = projection.trees();
        assert_eq!(summaries.len(), 2);
        let feature = summaries.iter().find(|s| s.id == "feature").unwrap();
        assert_eq!(feature.base_tree_id.as_deref(), Some("main"));
        assert_eq!(feature.tip.as_deref(), Some("c-1"));

        svc.execute(&user(), Command::Merge {
            tree_id: "main".into(),
            source_tree_id: "feature".into(),
            merge_request_id: Some("mr-1".into()),
        })
        .unwrap();
        projection.catch_up(svc.store()).unwrap();
        assert!(projection.merge_requests("main").is_empty());
        assert_eq!(projection.commits("main").unwrap().len(), 2);
    }
}
