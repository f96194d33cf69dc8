//! The media-type tree aggregate: one branch, its tree and the commit DAG.

use crate::error::{MediaTypeTreeError, Result};
use crate::history::CommitHistory;
use crate::ids::CommitIdGenerator;
use crate::tree::{TreeState, normalize_name};
use crate::types::{Change, MediaTypeTreeEvent, MergeRequest};
use std::collections::BTreeMap;
use std::sync::Arc;

static EMPTY_TREE: TreeState = TreeState::new();

#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeInfo {
    name: String,
    owner_id: u64,
    base_tree_id: Option<String>,
}

/// Transactional boundary for one branch.
///
/// The aggregate is rebuilt by [`apply`](Self::apply)ing stored events, which
/// may belong to several trees: every event updates the shared
/// [`CommitHistory`], which keeps the [`TreeState`] of every branch it knows;
/// only events of this tree's own stream change its name, owner and merge
/// requests. Command methods validate against a scratch copy of the tree
/// first, so a rejected command changes nothing; accepted commands are applied
/// and buffered in [`uncommitted_events`](Self::uncommitted_events).
pub struct MediaTypeTree {
    id: String,
    info: Option<TreeInfo>,
    history: CommitHistory,
    merge_requests: BTreeMap<String, MergeRequest>,
    main_tree_id: Option<String>,
    uncommitted: Vec<MediaTypeTreeEvent>,
    ids: Arc<dyn CommitIdGenerator>,
}

impl std::fmt::Debug for MediaTypeTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTypeTree")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("tree", self.tree())
            .field("merge_requests", &self.merge_requests)
            .field("uncommitted", &self.uncommitted.len())
            .finish_non_exhaustive()
    }
}

impl MediaTypeTree {
    /// An empty, uncreated aggregate for `id`.
    pub fn new(id: impl Into<String>, ids: Arc<dyn CommitIdGenerator>) -> Self {
        Self {
            id: id.into(),
            info: None,
            history: CommitHistory::new(),
            merge_requests: BTreeMap::new(),
            main_tree_id: None,
            uncommitted: Vec::new(),
            ids,
        }
    }

    /// Rebuild an aggregate from events in replay order.
    pub fn load<'a>(
        id: impl Into<String>,
        events: impl IntoIterator<Item = &'a MediaTypeTreeEvent>,
        ids: Arc<dyn CommitIdGenerator>,
    ) -> Result<Self> {
        let mut aggregate = Self::new(id, ids);
        let mut count = 0usize;
        for event in events {
            aggregate.apply(event)?;
            count += 1;
        }
        tracing::debug!(tree_id = %aggregate.id, events = count, "replayed media type tree");
        Ok(aggregate)
    }

    // ── accessors ──────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_created(&self) -> bool {
        self.info.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.name.as_str())
    }

    pub fn owner_id(&self) -> Option<u64> {
        self.info.as_ref().map(|i| i.owner_id)
    }

    pub fn base_tree_id(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_tree_id.as_deref())
    }

    /// The tree at this branch's tip; empty until the tree is created.
    pub fn tree(&self) -> &TreeState {
        self.history.tree(&self.id).unwrap_or(&EMPTY_TREE)
    }

    pub fn history(&self) -> &CommitHistory {
        &self.history
    }

    pub fn merge_requests(&self) -> impl Iterator<Item = &MergeRequest> {
        self.merge_requests.values()
    }

    pub fn merge_request(&self, id: &str) -> Option<&MergeRequest> {
        self.merge_requests.get(id)
    }

    /// Whether the last main-tree event this aggregate replayed named it.
    pub fn is_main_tree(&self) -> bool {
        self.main_tree_id.as_deref() == Some(self.id.as_str())
    }

    pub fn uncommitted_events(&self) -> &[MediaTypeTreeEvent] {
        &self.uncommitted
    }

    pub fn take_uncommitted_events(&mut self) -> Vec<MediaTypeTreeEvent> {
        std::mem::take(&mut self.uncommitted)
    }

    // ── commands ───────────────────────────────────────────────────────

    pub fn create(&mut self, name: &str, base_tree_id: Option<&str>, owner_id: u64) -> Result<()> {
        if self.is_created() || self.history.has_branch(&self.id) {
            return Err(MediaTypeTreeError::MediaTypeTreeAlreadyExists(
                self.id.clone(),
            ));
        }
        let name = normalize_name(name)
            .ok_or_else(|| MediaTypeTreeError::MediaTypeTreeNameInvalid(name.to_string()))?;
        if let Some(base) = base_tree_id
            && !self.history.has_branch(base)
        {
            return Err(MediaTypeTreeError::MediaTypeTreeNotFound(base.to_string()));
        }

        self.record(MediaTypeTreeEvent::TreeCreated {
            tree_id: self.id.clone(),
            name,
            base_tree_id: base_tree_id.map(str::to_string),
            owner_id,
        })
    }

    pub fn add_media_type(&mut self, media_type_id: &str, name: &str) -> Result<()> {
        self.ensure_created()?;
        let mut scratch = self.tree().clone();
        let name = scratch.add_media_type(media_type_id, name)?.name.clone();

        self.record(MediaTypeTreeEvent::MediaTypeAdded {
            tree_id: self.id.clone(),
            commit_id: self.next_commit_id()?,
            media_type_id: media_type_id.to_string(),
            name,
        })
    }

    pub fn remove_media_type(&mut self, media_type_id: &str) -> Result<()> {
        self.ensure_created()?;
        self.tree().clone().remove_media_type(media_type_id)?;

        self.record(MediaTypeTreeEvent::MediaTypeRemoved {
            tree_id: self.id.clone(),
            commit_id: self.next_commit_id()?,
            media_type_id: media_type_id.to_string(),
        })
    }

    pub fn add_parent_to_media_type(&mut self, child_id: &str, parent_id: &str) -> Result<()> {
        self.ensure_created()?;
        self.tree()
            .clone()
            .add_child_to_media_type(parent_id, child_id)?;

        self.record(MediaTypeTreeEvent::ParentAddedToMediaType {
            tree_id: self.id.clone(),
            commit_id: self.next_commit_id()?,
            child_id: child_id.to_string(),
            parent_id: parent_id.to_string(),
        })
    }

    /// Merge `source_tree_id` into this tree.
    ///
    /// When `merge_request_id` is given it must name an open request of this
    /// tree for the same source; the request is closed by the merge.
    pub fn merge(&mut self, source_tree_id: &str, merge_request_id: Option<&str>) -> Result<()> {
        self.ensure_created()?;
        self.ensure_other(source_tree_id)?;
        if let Some(request_id) = merge_request_id {
            match self.merge_requests.get(request_id) {
                Some(request) if request.source_tree_id == source_tree_id => {}
                _ => {
                    return Err(MediaTypeTreeError::MediaTypeMergeRequestNotFound(
                        request_id.to_string(),
                    ));
                }
            }
        }

        let merged = self.history.merged_tree(source_tree_id, &self.id)?;
        tracing::debug!(
            tree_id = %self.id,
            source_tree_id,
            media_types = merged.len(),
            "merge validated"
        );

        self.record(MediaTypeTreeEvent::TreesMerged {
            tree_id: self.id.clone(),
            commit_id: self.next_commit_id()?,
            source_tree_id: source_tree_id.to_string(),
            merge_request_id: merge_request_id.map(str::to_string),
        })
    }

    pub fn request_merge(
        &mut self,
        merge_request_id: &str,
        source_tree_id: &str,
        user_id: u64,
    ) -> Result<()> {
        self.ensure_created()?;
        self.ensure_other(source_tree_id)?;
        if !self.history.has_branch(source_tree_id) {
            return Err(MediaTypeTreeError::MediaTypeTreeNotFound(
                source_tree_id.to_string(),
            ));
        }
        if self.merge_requests.contains_key(merge_request_id) {
            return Err(MediaTypeTreeError::MediaTypeMergeRequestAlreadyExists(
                merge_request_id.to_string(),
            ));
        }

        self.record(MediaTypeTreeEvent::MergeRequested {
            tree_id: self.id.clone(),
            merge_request_id: merge_request_id.to_string(),
            source_tree_id: source_tree_id.to_string(),
            user_id,
        })
    }

    pub fn set_main_tree(&mut self, user_id: u64) -> Result<()> {
        self.ensure_created()?;
        self.record(MediaTypeTreeEvent::MainTreeSet {
            tree_id: self.id.clone(),
            user_id,
        })
    }

    fn ensure_created(&self) -> Result<()> {
        if self.is_created() {
            Ok(())
        } else {
            Err(MediaTypeTreeError::MediaTypeTreeNotFound(self.id.clone()))
        }
    }

    fn ensure_other(&self, source_tree_id: &str) -> Result<()> {
        if source_tree_id == self.id {
            return Err(MediaTypeTreeError::MediaTypeMergeIntoSelf(self.id.clone()));
        }
        Ok(())
    }

    /// A commit id the history has not seen yet.
    ///
    /// Ids already taken, for example by another generator writing to the same
    /// log, are skipped. A generator that never repeats itself finds a free id
    /// within one attempt more than there are commits.
    fn next_commit_id(&self) -> Result<String> {
        let mut last = String::new();
        for _ in 0..=self.history.len() {
            last = self.ids.next_id();
            if self.history.commit(&last).is_none() {
                return Ok(last);
            }
            tracing::debug!(tree_id = %self.id, commit_id = %last, "commit id taken, minting another");
        }
        Err(MediaTypeTreeError::CommitAlreadyExists(last))
    }

    fn record(&mut self, event: MediaTypeTreeEvent) -> Result<()> {
        self.apply(&event)?;
        tracing::info!(
            tree_id = %self.id,
            event = event.kind(),
            commit_id = event.commit_id(),
            "recorded media type tree event"
        );
        self.uncommitted.push(event);
        Ok(())
    }

    // ── event application ──────────────────────────────────────────────

    /// Apply one event. Used for replay and for recording new events.
    ///
    /// Any failure means the event contradicts the history replayed so far
    /// and is reported as [`MediaTypeTreeError::CorruptHistory`].
    pub fn apply(&mut self, event: &MediaTypeTreeEvent) -> Result<()> {
        self.apply_inner(event).map_err(|err| {
            let err = match err {
                MediaTypeTreeError::CorruptHistory(_) => err,
                other => MediaTypeTreeError::CorruptHistory(format!(
                    "{} on tree {} cannot be applied: {other}",
                    event.kind(),
                    event.tree_id()
                )),
            };
            tracing::error!(tree_id = %self.id, error = %err, "media type tree history is inconsistent");
            err
        })
    }

    fn apply_inner(&mut self, event: &MediaTypeTreeEvent) -> Result<()> {
        let own = event.tree_id() == self.id;

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
                if own {
                    self.info = Some(TreeInfo {
                        name: name.clone(),
                        owner_id: *owner_id,
                        base_tree_id: base_tree_id.clone(),
                    });
                }
            }
            MediaTypeTreeEvent::MediaTypeAdded { tree_id, .. }
            | MediaTypeTreeEvent::MediaTypeRemoved { tree_id, .. }
            | MediaTypeTreeEvent::ParentAddedToMediaType { tree_id, .. } => {
                self.commit(tree_id, event)?;
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
                if own && let Some(request_id) = merge_request_id {
                    self.merge_requests.remove(request_id);
                }
            }
            MediaTypeTreeEvent::MergeRequested {
                tree_id,
                merge_request_id,
                source_tree_id,
                user_id,
            } => {
                if own {
                    if self.merge_requests.contains_key(merge_request_id) {
                        return Err(MediaTypeTreeError::MediaTypeMergeRequestAlreadyExists(
                            merge_request_id.clone(),
                        ));
                    }
                    self.merge_requests.insert(
                        merge_request_id.clone(),
                        MergeRequest {
                            id: merge_request_id.clone(),
                            source_tree_id: source_tree_id.clone(),
                            target_tree_id: tree_id.clone(),
                            user_id: *user_id,
                        },
                    );
                }
            }
            MediaTypeTreeEvent::MainTreeSet { tree_id, .. } => {
                self.main_tree_id = Some(tree_id.clone());
            }
        }

        Ok(())
    }

    fn commit(&mut self, tree_id: &str, event: &MediaTypeTreeEvent) -> Result<()> {
        let (commit_id, change) = Change::from_event(event).ok_or_else(|| {
            MediaTypeTreeError::CorruptHistory(format!("{} does not produce a commit", event.kind()))
        })?;
        self.history.add_commit(tree_id, commit_id, change)
    }
}
