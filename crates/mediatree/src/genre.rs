//! Genre catalogue with three independent acyclic relations.

use crate::graph;
use crate::tree::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenreRelation {
    Parent,
    DerivedFrom,
    InfluencedBy,
}

impl GenreRelation {
    pub const ALL: [GenreRelation; 3] = [
        GenreRelation::Parent,
        GenreRelation::DerivedFrom,
        GenreRelation::InfluencedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GenreRelation::Parent => "parent",
            GenreRelation::DerivedFrom => "derived_from",
            GenreRelation::InfluencedBy => "influenced_by",
        }
    }
}

impl std::fmt::Display for GenreRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenreTreeError {
    #[error("genre already exists: {0}")]
    AlreadyExists(String),

    #[error("genre not found: {0}")]
    NotFound(String),

    #[error("invalid genre name: {0:?}")]
    NameInvalid(String),

    #[error("genre {genre_id} references unknown genre {missing} as {relation}")]
    UnknownGenre {
        genre_id: String,
        relation: GenreRelation,
        missing: String,
    },

    /// `path` starts and ends with the same genre.
    #[error("{relation} cycle: {}", .path.join(" -> "))]
    Cycle {
        relation: GenreRelation,
        path: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub parents: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub derived_from: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub influenced_by: BTreeSet<String>,
}

impl Genre {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parents: BTreeSet::new(),
            derived_from: BTreeSet::new(),
            influenced_by: BTreeSet::new(),
        }
    }

    /// Builder: add `target` under `relation`.
    pub fn with(mut self, relation: GenreRelation, target: impl Into<String>) -> Self {
        self.related_mut(relation).insert(target.into());
        self
    }

    pub fn related(&self, relation: GenreRelation) -> &BTreeSet<String> {
        match relation {
            GenreRelation::Parent => &self.parents,
            GenreRelation::DerivedFrom => &self.derived_from,
            GenreRelation::InfluencedBy => &self.influenced_by,
        }
    }

    fn related_mut(&mut self, relation: GenreRelation) -> &mut BTreeSet<String> {
        match relation {
            GenreRelation::Parent => &mut self.parents,
            GenreRelation::DerivedFrom => &mut self.derived_from,
            GenreRelation::InfluencedBy => &mut self.influenced_by,
        }
    }
}

/// Genres keyed by id.
///
/// Each [`GenreRelation`] forms its own graph and each of those graphs must
/// stay acyclic; a genre may be derived from its own parent, for example.
/// Writes are validated in full before anything changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreTree {
    genres: BTreeMap<String, Genre>,
}

impl GenreTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Genre> {
        self.genres.get(id)
    }

    pub fn len(&self) -> usize {
        self.genres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Genre> {
        self.genres.values()
    }

    pub fn insert(&mut self, genre: Genre) -> Result<(), GenreTreeError> {
        if self.genres.contains_key(&genre.id) {
            return Err(GenreTreeError::AlreadyExists(genre.id));
        }
        let genre = self.validate(genre)?;
        tracing::debug!(genre_id = %genre.id, "genre inserted");
        self.genres.insert(genre.id.clone(), genre);
        Ok(())
    }

    /// Replace an existing genre, edges included.
    pub fn update(&mut self, genre: Genre) -> Result<(), GenreTreeError> {
        if !self.genres.contains_key(&genre.id) {
            return Err(GenreTreeError::NotFound(genre.id));
        }
        let genre = self.validate(genre)?;
        tracing::debug!(genre_id = %genre.id, "genre updated");
        self.genres.insert(genre.id.clone(), genre);
        Ok(())
    }

    /// Remove a genre and every edge pointing at it.
    pub fn remove(&mut self, id: &str) -> Result<Genre, GenreTreeError> {
        let removed = self
            .genres
            .remove(id)
            .ok_or_else(|| GenreTreeError::NotFound(id.to_string()))?;
        for genre in self.genres.values_mut() {
            for relation in GenreRelation::ALL {
                genre.related_mut(relation).remove(id);
            }
        }
        Ok(removed)
    }

    /// A loop through `genre_id` in `relation`, if the stored graph has one.
    pub fn cycle(&self, genre_id: &str, relation: GenreRelation) -> Option<Vec<String>> {
        let genre = self.genres.get(genre_id)?;
        genre
            .related(relation)
            .iter()
            .find_map(|target| self.path_back(target, genre_id, relation))
            .map(|path| prepend(genre_id, path))
    }

    fn validate(&self, mut genre: Genre) -> Result<Genre, GenreTreeError> {
        genre.name = normalize_name(&genre.name)
            .ok_or_else(|| GenreTreeError::NameInvalid(genre.name.clone()))?;

        for relation in GenreRelation::ALL {
            for target in genre.related(relation) {
                if *target == genre.id {
                    return Err(GenreTreeError::Cycle {
                        relation,
                        path: vec![genre.id.clone(), genre.id.clone()],
                    });
                }
                if !self.genres.contains_key(target) {
                    return Err(GenreTreeError::UnknownGenre {
                        genre_id: genre.id.clone(),
                        relation,
                        missing: target.clone(),
                    });
                }
                if let Some(path) = self.path_back(target, &genre.id, relation) {
                    return Err(GenreTreeError::Cycle {
                        relation,
                        path: prepend(&genre.id, path),
                    });
                }
            }
        }
        Ok(genre)
    }

    /// Path from `from` to `to` along stored `relation` edges. The search
    /// never expands `to`, so its stored edges do not matter.
    fn path_back(&self, from: &str, to: &str, relation: GenreRelation) -> Option<Vec<String>> {
        graph::find_path(from, to, |id| {
            self.genres
                .get(id)
                .into_iter()
                .flat_map(move |g| g.related(relation).iter().map(String::as_str))
        })
        .map(|path| path.into_iter().map(str::to_string).collect())
    }
}

fn prepend(first: &str, mut rest: Vec<String>) -> Vec<String> {
    rest.insert(0, first.to_string());
    rest
}
