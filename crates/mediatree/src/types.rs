use serde::{Deserialize, Serialize};

// ============================================================================
// Events
// ============================================================================

/// Everything that can happen to a media-type tree.
///
/// Events are internally tagged with a snake_case `"type"` field. Each one
/// carries the `tree_id` of the stream it belongs to; events that produce a
/// commit also carry the pre-minted `commit_id`.
///
/// # JSON shape
///
/// ```json
/// { "type": "media_type_added", "tree_id": "main", "commit_id": "c1",
///   "media_type_id": "album", "name": "Album" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaTypeTreeEvent {
    TreeCreated {
        tree_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_tree_id: Option<String>,
        owner_id: u64,
    },
    MediaTypeAdded {
        tree_id: String,
        commit_id: String,
        media_type_id: String,
        name: String,
    },
    MediaTypeRemoved {
        tree_id: String,
        commit_id: String,
        media_type_id: String,
    },
    ParentAddedToMediaType {
        tree_id: String,
        commit_id: String,
        child_id: String,
        parent_id: String,
    },
    /// `source_tree_id` was merged into `tree_id`.
    TreesMerged {
        tree_id: String,
        commit_id: String,
        source_tree_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merge_request_id: Option<String>,
    },
    /// Someone asked for `source_tree_id` to be merged into `tree_id`.
    MergeRequested {
        tree_id: String,
        merge_request_id: String,
        source_tree_id: String,
        user_id: u64,
    },
    MainTreeSet {
        tree_id: String,
        user_id: u64,
    },
}

impl MediaTypeTreeEvent {
    /// The stream (branch) this event belongs to.
    pub fn tree_id(&self) -> &str {
        match self {
            MediaTypeTreeEvent::TreeCreated { tree_id, .. }
            | MediaTypeTreeEvent::MediaTypeAdded { tree_id, .. }
            | MediaTypeTreeEvent::MediaTypeRemoved { tree_id, .. }
            | MediaTypeTreeEvent::ParentAddedToMediaType { tree_id, .. }
            | MediaTypeTreeEvent::TreesMerged { tree_id, .. }
            | MediaTypeTreeEvent::MergeRequested { tree_id, .. }
            | MediaTypeTreeEvent::MainTreeSet { tree_id, .. } => tree_id.as_str(),
        }
    }

    pub fn commit_id(&self) -> Option<&str> {
        match self {
            MediaTypeTreeEvent::MediaTypeAdded { commit_id, .. }
            | MediaTypeTreeEvent::MediaTypeRemoved { commit_id, .. }
            | MediaTypeTreeEvent::ParentAddedToMediaType { commit_id, .. }
            | MediaTypeTreeEvent::TreesMerged { commit_id, .. } => Some(commit_id.as_str()),
            MediaTypeTreeEvent::TreeCreated { .. }
            | MediaTypeTreeEvent::MergeRequested { .. }
            | MediaTypeTreeEvent::MainTreeSet { .. } => None,
        }
    }

    /// Other trees whose history is needed to replay this event.
    pub fn referenced_tree_id(&self) -> Option<&str> {
        match self {
            MediaTypeTreeEvent::TreeCreated { base_tree_id, .. } => base_tree_id.as_deref(),
            MediaTypeTreeEvent::TreesMerged { source_tree_id, .. } => Some(source_tree_id.as_str()),
            MediaTypeTreeEvent::MediaTypeAdded { .. }
            | MediaTypeTreeEvent::MediaTypeRemoved { .. }
            | MediaTypeTreeEvent::ParentAddedToMediaType { .. }
            | MediaTypeTreeEvent::MergeRequested { .. }
            | MediaTypeTreeEvent::MainTreeSet { .. } => None,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MediaTypeTreeEvent::TreeCreated { .. } => "tree_created",
            MediaTypeTreeEvent::MediaTypeAdded { .. } => "media_type_added",
            MediaTypeTreeEvent::MediaTypeRemoved { .. } => "media_type_removed",
            MediaTypeTreeEvent::ParentAddedToMediaType { .. } => "parent_added_to_media_type",
            MediaTypeTreeEvent::TreesMerged { .. } => "trees_merged",
            MediaTypeTreeEvent::MergeRequested { .. } => "merge_requested",
            MediaTypeTreeEvent::MainTreeSet { .. } => "main_tree_set",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// An event as persisted by an [`EventStore`](crate::store::EventStore).
///
/// `sequence` is a global position, strictly increasing across all streams of
/// one store, and defines replay order when streams are combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub sequence: u64,
    /// RFC 3339 UTC timestamp.
    pub recorded_at: String,
    pub event: MediaTypeTreeEvent,
}

impl StoredEvent {
    pub fn new(sequence: u64, event: MediaTypeTreeEvent) -> Self {
        Self {
            sequence,
            recorded_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            event,
        }
    }
}

// ============================================================================
// Commits
// ============================================================================

/// What a commit did to its branch's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    AddMediaType { id: String, name: String },
    RemoveMediaType { id: String },
    AddParent { child_id: String, parent_id: String },
    Merge { source_tree_id: String },
}

impl Change {
    /// The commit id and change carried by a commit-producing event.
    pub fn from_event(event: &MediaTypeTreeEvent) -> Option<(&str, Change)> {
        match event {
            MediaTypeTreeEvent::MediaTypeAdded {
                commit_id,
                media_type_id,
                name,
                ..
            } => Some((
                commit_id.as_str(),
                Change::AddMediaType {
                    id: media_type_id.clone(),
                    name: name.clone(),
                },
            )),
            MediaTypeTreeEvent::MediaTypeRemoved {
                commit_id,
                media_type_id,
                ..
            } => Some((
                commit_id.as_str(),
                Change::RemoveMediaType {
                    id: media_type_id.clone(),
                },
            )),
            MediaTypeTreeEvent::ParentAddedToMediaType {
                commit_id,
                child_id,
                parent_id,
                ..
            } => Some((
                commit_id.as_str(),
                Change::AddParent {
                    child_id: child_id.clone(),
                    parent_id: parent_id.clone(),
                },
            )),
            MediaTypeTreeEvent::TreesMerged {
                commit_id,
                source_tree_id,
                ..
            } => Some((
                commit_id.as_str(),
                Change::Merge {
                    source_tree_id: source_tree_id.clone(),
                },
            )),
            MediaTypeTreeEvent::TreeCreated { .. }
            | MediaTypeTreeEvent::MergeRequested { .. }
            | MediaTypeTreeEvent::MainTreeSet { .. } => None,
        }
    }
}

/// An immutable node of the commit DAG.
///
/// A branch's first commit has no parents, an ordinary commit has one, and a
/// merge commit has up to two: the source tip followed by the target tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    pub change: Change,
}

// ============================================================================
// Merge requests and read models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: String,
    pub source_tree_id: String,
    pub target_tree_id: String,
    pub user_id: u64,
}

/// A media type as returned by read queries, children included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTypeView {
    pub id: String,
    pub name: String,
    pub children: Vec<String>,
}

/// Summary of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSummary {
    pub id: String,
    pub name: String,
    pub owner_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_tree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}
