#![doc = include_str!("../README.md")]

mod aggregate;
mod error;
mod genre;
mod graph;
mod history;
mod ids;
mod projection;
mod repository;
mod service;
mod store;
mod tree;
mod types;

pub use error::{CommandError, MediaTypeTreeError, RepositoryError, Result, StoreError};

pub mod v1 {
    //! Versioned public API for media-type trees.
    //!
    //! Everything you need is re-exported from this module. Types are organized
    //! into four groups:
    //!
    //! # Trees and history
    //!
    //! - [`TreeState`] and [`MediaType`]: the materialized tree of one branch
    //! - [`CommitHistory`]: the commit DAG shared by all branches
    //! - [`Commit`] and [`Change`]: one immutable step of a branch
    //!
    //! # Writing
    //!
    //! - [`MediaTypeTree`]: the aggregate for one branch
    //! - [`MediaTypeTreeEvent`] and [`StoredEvent`]: what gets persisted
    //! - [`EventStore`], [`MemoryEventStore`]: persistence boundary
    //! - [`MediaTypeTreeRepository`]: loads a branch with the streams it depends on
    //! - [`MediaTypeTreeService`], [`Command`], [`User`], [`Permission`]:
    //!   authorized command handling
    //! - [`CommitIdGenerator`], [`SequentialCommitIds`]: commit id minting
    //!
    //! # Reading
    //!
    //! - [`MediaTypeTreeProjection`]: queries over every tree in a store
    //! - [`MediaTypeView`], [`TreeSummary`], [`MergeRequest`]: query results
    //!
    //! # Genres
    //!
    //! - [`GenreTree`], [`Genre`], [`GenreRelation`]: three acyclic relations
    //!
    //! # Example: fork, diverge, merge
    //!
    //! ```
    //! use mediatree::v1::*;
    //! use std::sync::Arc;
    //!
    //! let mut service = MediaTypeTreeService::new(
    //!     MemoryEventStore::new(),
    //!     Arc::new(SequentialCommitIds::new("c")),
    //! );
    //! let alex = User::new(1).with_permission(Permission::MediaTypeTreesCreate);
    //!
    //! service.execute(&alex, Command::CreateTree {
    //!     tree_id: "main".into(),
    //!     name: "Main".into(),
    //!     base_tree_id: None,
    //! }).unwrap();
    //! service.execute(&alex, Command::AddMediaType {
    //!     tree_id: "main".into(),
    //!     media_type_id: "album".into(),
    //!     name: "Album".into(),
    //! }).unwrap();
    //! service.execute(&alex, Command::CreateTree {
    //!     tree_id: "live".into(),
    //!     name: "Live".into(),
    //!     base_tree_id: Some("main".into()),
    //! }).unwrap();
    //! service.execute(&alex, Command::AddMediaType {
    //!     tree_id: "live".into(),
    //!     media_type_id: "live-album".into(),
    //!     name: "Live Album".into(),
    //! }).unwrap();
    //! service.execute(&alex, Command::AddParentToMediaType {
    //!     tree_id: "live".into(),
    //!     child_id: "live-album".into(),
    //!     parent_id: "album".into(),
    //! }).unwrap();
    //! service.execute(&alex, Command::Merge {
    //!     tree_id: "main".into(),
    //!     source_tree_id: "live".into(),
    //!     merge_request_id: None,
    //! }).unwrap();
    //!
    //! let projection = MediaTypeTreeProjection::from_store(service.store()).unwrap();
    //! let main = projection.tree("main").unwrap().unwrap();
    //! let album = main.iter().find(|mt| mt.id == "album").unwrap();
    //! assert_eq!(album.children, vec!["live-album"]);
    //! ```

    /// Cycle-free path search over string-keyed adjacency.
    ///
    /// ```
    /// use mediatree::v1::graph;
    /// use std::collections::HashMap;
    ///
    /// let edges = HashMap::from([("a", vec!["b"]), ("b", vec!["c"])]);
    /// let next = |id: &str| edges.get(id).cloned().unwrap_or_default();
    ///
    /// assert_eq!(graph::find_path("a", "c", next), Some(vec!["a", "b", "c"]));
    /// assert!(!graph::is_reachable("c", "a", next));
    /// ```
    pub mod graph {
        pub use crate::graph::{find_path, is_reachable};
    }

    pub use crate::aggregate::MediaTypeTree;
    pub use crate::error::{CommandError, MediaTypeTreeError, RepositoryError, StoreError};
    pub use crate::genre::{Genre, GenreRelation, GenreTree, GenreTreeError};
    pub use crate::history::CommitHistory;
    pub use crate::ids::{CommitIdGenerator, SequentialCommitIds};
    pub use crate::projection::MediaTypeTreeProjection;
    pub use crate::repository::MediaTypeTreeRepository;
    pub use crate::service::{Command, MediaTypeTreeService, Permission, User};
    pub use crate::store::{EventStore, MemoryEventStore, check_stream, last_main_tree};
    pub use crate::tree::{MediaType, TreeState, normalize_name};
    pub use crate::types::{
        Change, Commit, MediaTypeTreeEvent, MediaTypeView, MergeRequest, StoredEvent, TreeSummary,
    };
}
