use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaTypeTreeError>;

/// Errors from tree, history and aggregate operations.
///
/// Every variant except [`MediaTypeTreeError::CorruptHistory`] is a
/// user-facing rejection: it is returned before anything is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaTypeTreeError {
    #[error("media type tree already exists: {0}")]
    MediaTypeTreeAlreadyExists(String),

    #[error("media type tree not found: {0}")]
    MediaTypeTreeNotFound(String),

    #[error("invalid media type tree name: {0:?}")]
    MediaTypeTreeNameInvalid(String),

    #[error("media type already exists: {0}")]
    MediaTypeAlreadyExists(String),

    #[error("media type not found: {0}")]
    MediaTypeNotFound(String),

    #[error("invalid media type name: {0:?}")]
    MediaTypeNameInvalid(String),

    #[error("adding {child_id} under {parent_id} would create a cycle")]
    WillCreateCycle { parent_id: String, child_id: String },

    #[error("merge request not found: {0}")]
    MediaTypeMergeRequestNotFound(String),

    #[error("merge request already open: {0}")]
    MediaTypeMergeRequestAlreadyExists(String),

    #[error("media type tree {0} cannot be merged into itself")]
    MediaTypeMergeIntoSelf(String),

    /// Commits are immutable, so an id can only be used once per history.
    #[error("commit already exists: {0}")]
    CommitAlreadyExists(String),

    /// The two sides of a merge changed the same media type in ways that
    /// cannot both be kept.
    #[error("merge conflict on media type {media_type_id}: {reason}")]
    MediaTypeMergeConflict {
        media_type_id: String,
        reason: String,
    },

    /// Replaying stored history failed. The event log no longer describes a
    /// valid tree; callers must abort instead of continuing with partial state.
    #[error("corrupt history: {0}")]
    CorruptHistory(String),
}

impl MediaTypeTreeError {
    /// `true` for errors that indicate a broken event log rather than a
    /// rejected command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MediaTypeTreeError::CorruptHistory(_))
    }
}

/// Errors raised by [`EventStore`](crate::store::EventStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event for tree {event_tree} cannot be appended to stream {stream}")]
    StreamMismatch { stream: String, event_tree: String },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned(err.to_string())
    }
}

/// Errors from loading an aggregate: the store failed, or its events do not
/// replay.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] MediaTypeTreeError),
}

/// Errors from [`MediaTypeTreeService::execute`](crate::service::MediaTypeTreeService::execute).
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("user {user_id} is not allowed to {action}")]
    Forbidden { user_id: u64, action: String },

    #[error(transparent)]
    Domain(#[from] MediaTypeTreeError),

    #[error("event store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for CommandError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Store(e) => CommandError::Store(e),
            RepositoryError::Domain(e) => CommandError::Domain(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_corrupt_history_is_fatal() {
        assert!(MediaTypeTreeError::CorruptHistory("x".into()).is_fatal());
        assert!(!MediaTypeTreeError::MediaTypeNotFound("x".into()).is_fatal());
        assert!(
            !MediaTypeTreeError::WillCreateCycle {
                parent_id: "a".into(),
                child_id: "b".into(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_cycle_message_names_both_nodes() {
        let err = MediaTypeTreeError::WillCreateCycle {
            parent_id: "album".into(),
            child_id: "track".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("album"));
        assert!(msg.contains("track"));
    }

    #[test]
    fn test_command_error_wraps_domain_error() {
        let err: CommandError = MediaTypeTreeError::MediaTypeTreeNotFound("main".into()).into();
        assert!(matches!(err, CommandError::Domain(_)));
        assert_eq!(err.to_string(), "media type tree not found: main");
    }
}
