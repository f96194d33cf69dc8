//! Materialized media-type tree for a single branch.

use crate::error::{MediaTypeTreeError, Result};
use crate::graph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A node of the tree. Parents are never stored; see [`TreeState::parents_of`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub children: BTreeSet<String>,
}

/// Strip line breaks and surrounding whitespace; `None` if nothing is left.
///
/// ```
/// use mediatree::v1::normalize_name;
///
/// assert_eq!(normalize_name("  Live\nAlbum "), Some("LiveAlbum".to_string()));
/// assert_eq!(normalize_name(" \n "), None);
/// ```
pub fn normalize_name(raw: &str) -> Option<String> {
    let stripped: String = raw.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// The current tree of one branch, keyed by media-type id.
///
/// A `TreeState` is always derived from commits and never persisted. All
/// mutating operations check their preconditions before touching the map, so
/// a rejected operation leaves the state exactly as it was.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    media_types: BTreeMap<String, MediaType>,
}

impl TreeState {
    pub const fn new() -> Self {
        Self {
            media_types: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&MediaType> {
        self.media_types.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.media_types.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.media_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.media_types.is_empty()
    }

    /// Media types in id order.
    pub fn iter(&self) -> impl Iterator<Item = &MediaType> {
        self.media_types.values()
    }

    /// Every `(parent, child)` edge, ordered by parent then child.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.media_types.values().flat_map(|mt| {
            mt.children
                .iter()
                .map(move |child| (mt.id.as_str(), child.as_str()))
        })
    }

    /// Ids of every media type whose child set contains `id`.
    pub fn parents_of(&self, id: &str) -> BTreeSet<&str> {
        self.media_types
            .values()
            .filter(|mt| mt.children.contains(id))
            .map(|mt| mt.id.as_str())
            .collect()
    }

    pub fn add_media_type(&mut self, id: &str, name: &str) -> Result<&MediaType> {
        if self.media_types.contains_key(id) {
            return Err(MediaTypeTreeError::MediaTypeAlreadyExists(id.to_string()));
        }
        let name = normalize_name(name)
            .ok_or_else(|| MediaTypeTreeError::MediaTypeNameInvalid(name.to_string()))?;

        let media_type = self
            .media_types
            .entry(id.to_string())
            .or_insert(MediaType {
                id: id.to_string(),
                name,
                children: BTreeSet::new(),
            });
        Ok(media_type)
    }

    /// Remove `id`, attaching each of its children to each of its parents.
    pub fn remove_media_type(&mut self, id: &str) -> Result<()> {
        let removed = self
            .media_types
            .remove(id)
            .ok_or_else(|| MediaTypeTreeError::MediaTypeNotFound(id.to_string()))?;

        for media_type in self.media_types.values_mut() {
            if media_type.children.remove(id) {
                media_type.children.extend(removed.children.iter().cloned());
            }
        }
        Ok(())
    }

    /// Add `child_id` to the children of `parent_id`.
    ///
    /// Re-adding an existing edge is a no-op. The edge is rejected when
    /// `parent_id` is already reachable from `child_id`, including the case
    /// where both ids are the same.
    pub fn add_child_to_media_type(&mut self, parent_id: &str, child_id: &str) -> Result<()> {
        if !self.media_types.contains_key(child_id) {
            return Err(MediaTypeTreeError::MediaTypeNotFound(child_id.to_string()));
        }
        if !self.media_types.contains_key(parent_id) {
            return Err(MediaTypeTreeError::MediaTypeNotFound(parent_id.to_string()));
        }
        if self.is_descendant_or_self(parent_id, child_id) {
            return Err(MediaTypeTreeError::WillCreateCycle {
                parent_id: parent_id.to_string(),
                child_id: child_id.to_string(),
            });
        }

        if let Some(parent) = self.media_types.get_mut(parent_id) {
            parent.children.insert(child_id.to_string());
        }
        Ok(())
    }

    /// `true` if `candidate` is `root` or one of its descendants.
    fn is_descendant_or_self(&self, candidate: &str, root: &str) -> bool {
        graph::is_reachable(root, candidate, |id| {
            self.media_types
                .get(id)
                .into_iter()
                .flat_map(|mt| mt.children.iter().map(String::as_str))
        })
    }

    fn remove_child(&mut self, parent_id: &str, child_id: &str) {
        if let Some(parent) = self.media_types.get_mut(parent_id) {
            parent.children.remove(child_id);
        }
    }

    /// Three-way merge of `source` into `self`, where `base` is the tree at
    /// the common ancestor of both sides.
    ///
    /// Only what `source` changed relative to `base` is replayed onto `self`:
    /// removals first, then renamed media types, then new media types, then
    /// dropped edges, then new edges. Apply this to a clone: an error leaves
    /// `self` partially merged.
    pub fn merge(&mut self, source: &TreeState, base: &TreeState) -> Result<()> {
        for removed in base.iter().filter(|mt| !source.contains(&mt.id)) {
            if !self.contains(&removed.id) {
                continue;
            }
            if self.edges_changed_since(&removed.id, base) {
                return Err(conflict(
                    &removed.id,
                    "removed on the source branch but changed on the target branch",
                ));
            }
            self.remove_media_type(&removed.id)?;
        }

        for renamed in source.iter() {
            let Some(original) = base.get(&renamed.id) else {
                continue;
            };
            if original.name == renamed.name {
                continue;
            }
            match self.media_types.get_mut(&renamed.id) {
                Some(current) if current.name == original.name => {
                    current.name = renamed.name.clone();
                }
                Some(current) if current.name == renamed.name => {}
                Some(_) => {
                    return Err(conflict(&renamed.id, "renamed differently on both branches"));
                }
                None => {
                    return Err(conflict(
                        &renamed.id,
                        "renamed on the source branch but removed on the target branch",
                    ));
                }
            }
        }

        for added in source.iter().filter(|mt| !base.contains(&mt.id)) {
            self.add_media_type(&added.id, &added.name)?;
        }

        let source_edges: BTreeSet<(&str, &str)> = source.edges().collect();
        let base_edges: BTreeSet<(&str, &str)> = base.edges().collect();

        for (parent, child) in base_edges.difference(&source_edges) {
            if source.contains(parent) && source.contains(child) {
                self.remove_child(parent, child);
            }
        }

        for (parent, child) in source_edges.difference(&base_edges) {
            for endpoint in [*parent, *child] {
                if !self.contains(endpoint) {
                    return Err(conflict(
                        endpoint,
                        "linked on the source branch but removed on the target branch",
                    ));
                }
            }
            self.add_child_to_media_type(parent, child)?;
        }

        Ok(())
    }

    /// Whether the parents or children of `id` in `self` differ from `base`.
    fn edges_changed_since(&self, id: &str, base: &TreeState) -> bool {
        let children = self.get(id).map(|mt| &mt.children);
        let base_children = base.get(id).map(|mt| &mt.children);
        children != base_children || self.parents_of(id) != base.parents_of(id)
    }
}

fn conflict(media_type_id: &str, reason: &str) -> MediaTypeTreeError {
    MediaTypeTreeError::MediaTypeMergeConflict {
        media_type_id: media_type_id.to_string(),
        reason: reason.to_string(),
    }
}
