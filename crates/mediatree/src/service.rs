//! Command handling: authorization, load, invoke, save.

use crate::aggregate::MediaTypeTree;
use crate::error::{CommandError, MediaTypeTreeError};
use crate::ids::CommitIdGenerator;
use crate::repository::MediaTypeTreeRepository;
use crate::store::EventStore;
use crate::types::{MediaTypeTreeEvent, StoredEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    MediaTypeTreesCreate,
    MediaTypeTreesAdmin,
}

/// The caller of a command, as far as authorization is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub permissions: BTreeSet<Permission>,
}

impl User {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has(Permission::MediaTypeTreesAdmin)
    }
}

/// A request to change one media-type tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CreateTree {
        tree_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_tree_id: Option<String>,
    },
    AddMediaType {
        tree_id: String,
        media_type_id: String,
        name: String,
    },
    RemoveMediaType {
        tree_id: String,
        media_type_id: String,
    },
    AddParentToMediaType {
        tree_id: String,
        child_id: String,
        parent_id: String,
    },
    /// Ask for `source_tree_id` to be merged into `tree_id`.
    RequestMerge {
        tree_id: String,
        merge_request_id: String,
        source_tree_id: String,
    },
    /// Merge `source_tree_id` into `tree_id`.
    Merge {
        tree_id: String,
        source_tree_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merge_request_id: Option<String>,
    },
    SetMainTree {
        tree_id: String,
    },
}

impl Command {
    /// The tree whose stream the command appends to.
    pub fn tree_id(&self) -> &str {
        match self {
            Command::CreateTree { tree_id, .. }
            | Command::AddMediaType { tree_id, .. }
            | Command::RemoveMediaType { tree_id, .. }
            | Command::AddParentToMediaType { tree_id, .. }
            | Command::RequestMerge { tree_id, .. }
            | Command::Merge { tree_id, .. }
            | Command::SetMainTree { tree_id } => tree_id.as_str(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateTree { .. } => "create_tree",
            Command::AddMediaType { .. } => "add_media_type",
            Command::RemoveMediaType { .. } => "remove_media_type",
            Command::AddParentToMediaType { .. } => "add_parent_to_media_type",
            Command::RequestMerge { .. } => "request_merge",
            Command::Merge { .. } => "merge",
            Command::SetMainTree { .. } => "set_main_tree",
        }
    }
}

/// Runs [`Command`]s against an [`EventStore`].
///
/// Each command is authorized, applied to a freshly loaded aggregate and
/// saved as one atomic batch. A rejected command writes nothing.
pub struct MediaTypeTreeService<S> {
    repository: MediaTypeTreeRepository<S>,
}

impl<S: EventStore> MediaTypeTreeService<S> {
    pub fn new(store: S, ids: Arc<dyn CommitIdGenerator>) -> Self {
        Self {
            repository: MediaTypeTreeRepository::new(store, ids),
        }
    }

    pub fn repository(&self) -> &MediaTypeTreeRepository<S> {
        &self.repository
    }

    pub fn store(&self) -> &S {
        self.repository.store()
    }

    pub fn into_store(self) -> S {
        self.repository.into_store()
    }

    pub fn execute(
        &mut self,
        user: &User,
        command: Command,
    ) -> Result<Vec<StoredEvent>, CommandError> {
        match self.dispatch(user, &command) {
            Ok(stored) => {
                tracing::info!(
                    user_id = user.id,
                    command = command.kind(),
                    tree_id = command.tree_id(),
                    events = stored.len(),
                    "command executed"
                );
                Ok(stored)
            }
            Err(err) => {
                if matches!(&err, CommandError::Domain(e) if e.is_fatal()) {
                    tracing::error!(
                        user_id = user.id,
                        command = command.kind(),
                        tree_id = command.tree_id(),
                        error = %err,
                        "command failed on corrupt history"
                    );
                } else {
                    tracing::warn!(
                        user_id = user.id,
                        command = command.kind(),
                        tree_id = command.tree_id(),
                        error = %err,
                        "command rejected"
                    );
                }
                Err(err)
            }
        }
    }

    fn dispatch(&mut self, user: &User, command: &Command) -> Result<Vec<StoredEvent>, CommandError> {
        match command {
            Command::CreateTree {
                tree_id,
                name,
                base_tree_id,
            } => {
                if !user.has(Permission::MediaTypeTreesCreate) {
                    return Err(forbidden(user, "create media type trees"));
                }
                let related: Vec<&str> = base_tree_id.as_deref().into_iter().collect();
                let mut tree = self.repository.load(tree_id, &related)?;
                tree.create(name, base_tree_id.as_deref(), user.id)?;
                self.save(&mut tree)
            }
            Command::AddMediaType {
                tree_id,
                media_type_id,
                name,
            } => {
                let mut tree = self.load_owned(user, tree_id, &[])?;
                tree.add_media_type(media_type_id, name)?;
                self.save(&mut tree)
            }
            Command::RemoveMediaType {
                tree_id,
                media_type_id,
            } => {
                let mut tree = self.load_owned(user, tree_id, &[])?;
                tree.remove_media_type(media_type_id)?;
                self.save(&mut tree)
            }
            Command::AddParentToMediaType {
                tree_id,
                child_id,
                parent_id,
            } => {
                let mut tree = self.load_owned(user, tree_id, &[])?;
                tree.add_parent_to_media_type(child_id, parent_id)?;
                self.save(&mut tree)
            }
            Command::RequestMerge {
                tree_id,
                merge_request_id,
                source_tree_id,
            } => {
                let source_owner = self.owner_of(source_tree_id)?.ok_or_else(|| {
                    MediaTypeTreeError::MediaTypeTreeNotFound(source_tree_id.clone())
                })?;
                if source_owner != user.id && !user.is_admin() {
                    return Err(forbidden(
                        user,
                        &format!("request a merge of tree {source_tree_id}"),
                    ));
                }
                let mut tree = self.repository.load(tree_id, &[source_tree_id.as_str()])?;
                tree.request_merge(merge_request_id, source_tree_id, user.id)?;
                self.save(&mut tree)
            }
            Command::Merge {
                tree_id,
                source_tree_id,
                merge_request_id,
            } => {
                let mut tree = self.load_owned(user, tree_id, &[source_tree_id.as_str()])?;
                let main = self.repository.store().main_tree()?;
                if main.as_deref() == Some(tree_id.as_str()) && !user.is_admin() {
                    return Err(forbidden(user, "merge into the main tree"));
                }
                tree.merge(source_tree_id, merge_request_id.as_deref())?;
                self.save(&mut tree)
            }
            Command::SetMainTree { tree_id } => {
                if !user.is_admin() {
                    return Err(forbidden(user, "set the main tree"));
                }
                let mut tree = self.repository.load(tree_id, &[])?;
                tree.set_main_tree(user.id)?;
                self.save(&mut tree)
            }
        }
    }

    /// Load a created tree the user may modify.
    fn load_owned(
        &self,
        user: &User,
        tree_id: &str,
        related: &[&str],
    ) -> Result<MediaTypeTree, CommandError> {
        let tree = self.repository.load(tree_id, related)?;
        let Some(owner_id) = tree.owner_id() else {
            return Err(MediaTypeTreeError::MediaTypeTreeNotFound(tree_id.to_string()).into());
        };
        if owner_id != user.id && !user.is_admin() {
            return Err(forbidden(user, &format!("modify tree {tree_id}")));
        }
        Ok(tree)
    }

    /// Owner recorded by the creation event of `tree_id`, read straight from
    /// its stream.
    fn owner_of(&self, tree_id: &str) -> Result<Option<u64>, CommandError> {
        let events = self.repository.store().load(tree_id)?;
        Ok(events.iter().find_map(|stored| match &stored.event {
            MediaTypeTreeEvent::TreeCreated { owner_id, .. } => Some(*owner_id),
            _ => None,
        }))
    }

    fn save(&mut self, tree: &mut MediaTypeTree) -> Result<Vec<StoredEvent>, CommandError> {
        Ok(self.repository.save(tree)?)
    }
}

fn forbidden(user: &User, action: &str) -> CommandError {
    CommandError::Forbidden {
        user_id: user.id,
        action: action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialCommitIds;
    use crate::store::MemoryEventStore;

    const OWNER: u64 = 1;
    const OTHER: u64 = 2;
    const ADMIN: u64 = 9;

    fn service() -> MediaTypeTreeService<MemoryEventStore> {
        MediaTypeTreeService::new(
            MemoryEventStore::new(),
            Arc::new(SequentialCommitIds::new("c")),
        )
    }

    fn creator(id: u64) -> User {
        User::new(id).with_permission(Permission::MediaTypeTreesCreate)
    }

    fn admin() -> User {
        User::new(ADMIN).with_permission(Permission::MediaTypeTreesAdmin)
    }

    fn create(tree_id: &str, base: Option<&str>) -> Command {
        Command::CreateTree {
            tree_id: tree_id.into(),
            name: tree_id.into(),
            base_tree_id: base.map(str::to_string),
        }
    }

    fn add(tree_id: &str, id: &str) -> Command {
        Command::AddMediaType {
            tree_id: tree_id.into(),
            media_type_id: id.into(),
            name: id.into(),
        }
    }

    fn merge(target: &str, source: &str) -> Command {
        Command::Merge {
            tree_id: target.into(),
            source_tree_id: source.into(),
            merge_request_id: None,
        }
    }

    #[test]
    fn test_create_requires_permission() {
        let mut svc = service();
        let err = svc.execute(&User::new(OWNER), create("main", None)).unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { user_id: OWNER, .. }));
        assert!(svc.store().is_empty().unwrap());

        let stored = svc.execute(&creator(OWNER), create("main", None)).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_only_owner_or_admin_may_modify() {
        let mut svc = service();
        svc.execute(&creator(OWNER), create("main", None)).unwrap();

        let err = svc.execute(&User::new(OTHER), add("main", "album")).unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { .. }));

        svc.execute(&User::new(OWNER), add("main", "album")).unwrap();
        svc.execute(&admin(), add("main", "track")).unwrap();
        assert_eq!(svc.store().len().unwrap(), 3);
    }

    #[test]
    fn test_unknown_tree_is_not_found() {
        let mut svc = service();
        let err = svc.execute(&admin(), add("ghost", "album")).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Domain(MediaTypeTreeError::MediaTypeTreeNotFound(_))
        ));
    }

    #[test]
    fn test_domain_errors_write_nothing() {
        let mut svc = service();
        svc.execute(&creator(OWNER), create("main", None)).unwrap();
        svc.execute(&User::new(OWNER), add("main", "album")).unwrap();
        let before = svc.store().len().unwrap();

        let err = svc.execute(&User::new(OWNER), add("main", "album")).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Domain(MediaTypeTreeError::MediaTypeAlreadyExists(_))
        ));
        assert_eq!(svc.store().len().unwrap(), before);
    }

    #[test]
    fn test_request_merge_requires_source_ownership() {
        let mut svc = service();
        svc.execute(&creator(OWNER), create("main", None)).unwrap();
        svc.execute(&creator(OTHER), create("feature", Some("main")))
            .unwrap();

        let request = |id: &str| Command::RequestMerge {
            tree_id: "main".into(),
            merge_request_id: id.into(),
            source_tree_id: "feature".into(),
        };
        let err = svc.execute(&User::new(OWNER), request("mr-1")).unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { .. }));

        svc.execute(&User::new(OTHER), request("mr-1")).unwrap();
        let main = svc.repository().load("main", &[]).unwrap();
        assert!(main.merge_request("mr-1").is_some());

        let unknown = Command::RequestMerge {
            tree_id: "main".into(),
            merge_request_id: "mr-2".into(),
            source_tree_id: "ghost".into(),
        };
        let err = svc.execute(&admin(), unknown).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Domain(MediaTypeTreeError::MediaTypeTreeNotFound(_))
        ));
    }

    #[test]
    fn test_merge_into_main_requires_admin() {
        let mut svc = service();
        svc.execute(&creator(OWNER), create("main", None)).unwrap();
        svc.execute(&creator(OWNER), create("feature", Some("main")))
            .unwrap();
        svc.execute(&User::new(OWNER), add("feature", "live")).unwrap();

        let err = svc
            .execute(&User::new(OWNER), Command::SetMainTree {
                tree_id: "main".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { .. }));

        svc.execute(&admin(), Command::SetMainTree {
            tree_id: "main".into(),
        })
        .unwrap();
        assert_eq!(svc.store().main_tree().unwrap(), Some("main".to_string()));

        let err = svc.execute(&User::new(OWNER), merge("main", "feature")).unwrap_err();
        assert!(matches!(err, CommandError::Forbidden { .. }));

        svc.execute(&admin(), merge("main", "feature")).unwrap();
        let main = svc.repository().load("main", &[]).unwrap();
        assert!(main.tree().contains("live"));
        assert!(main.is_main_tree());
    }

    #[test]
    fn test_owner_may_merge_into_non_main_tree() {
        let mut svc = service();
        svc.execute(&creator(OWNER), create("main", None)).unwrap();
        svc.execute(&creator(OWNER), create("feature", Some("main")))
            .unwrap();
        svc.execute(&User::new(OWNER), add("main", "album")).unwrap();

        svc.execute(&User::new(OWNER), merge("feature", "main")).unwrap();
        let feature = svc.repository().load("feature", &[]).unwrap();
        assert!(feature.tree().contains("album"));
    }

    #[test]
    fn test_services_sharing_a_store_never_reuse_commit_ids() {
        let store = MemoryEventStore::new();
        let mut first = MediaTypeTreeService::new(store.clone(), Arc::new(SequentialCommitIds::new("c")));
        let mut second = MediaTypeTreeService::new(store.clone(), Arc::new(SequentialCommitIds::new("c")));

        first.execute(&creator(OWNER), create("main", None)).unwrap();
        first.execute(&User::new(OWNER), add("main", "album")).unwrap();
        second.execute(&User::new(OWNER), add("main", "track")).unwrap();
        second
            .execute(&creator(OWNER), create("feature", Some("main")))
            .unwrap();
        first.execute(&User::new(OWNER), add("feature", "live")).unwrap();

        let main = second.repository().load("main", &[]).unwrap();
        let commits = main.history().commits_by_branch("main").unwrap();
        let ids: Vec<&str> = commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
        assert!(main.tree().contains("album"));
        assert!(main.tree().contains("track"));

        let projection = crate::projection::MediaTypeTreeProjection::from_store(&store).unwrap();
        assert_eq!(projection.tree("feature").unwrap().unwrap().len(), 3);
    }

    #[test]
    fn test_main_tree_is_written_with_its_event() {
        let mut svc = service();
        svc.execute(&creator(OWNER), create("main", None)).unwrap();
        let stored = svc
            .execute(&admin(), Command::SetMainTree {
                tree_id: "main".into(),
            })
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(matches!(stored[0].event, MediaTypeTreeEvent::MainTreeSet { .. }));
        assert_eq!(svc.store().main_tree().unwrap(), Some("main".to_string()));

        let err = svc
            .execute(&admin(), Command::SetMainTree {
                tree_id: "ghost".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Domain(MediaTypeTreeError::MediaTypeTreeNotFound(_))
        ));
        assert_eq!(svc.store().main_tree().unwrap(), Some("main".to_string()));
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&merge("main", "feature")).unwrap();
        assert_eq!(
            json,
            r#"{"command":"merge","tree_id":"main","source_tree_id":"feature"}"#
        );
        let parsed: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tree_id(), "main");
        assert_eq!(parsed.kind(), "merge");
    }
}
