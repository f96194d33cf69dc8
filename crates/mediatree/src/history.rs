//! Commit DAG shared by every branch an aggregate or projection has seen.

use crate::error::{MediaTypeTreeError, Result};
use crate::tree::TreeState;
use crate::types::{Change, Commit};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
struct Branch {
    tip: Option<String>,
    tree: TreeState,
}

/// Commits keyed by id, plus every branch's tip and current tree.
///
/// Branches created from a base share the base's commits by reference: the
/// new branch simply starts at the base's current tip. Each branch's tree is
/// kept up to date as commits arrive, so reading the tip of a branch never
/// replays history.
#[derive(Debug, Clone, Default)]
pub struct CommitHistory {
    commits: HashMap<String, Commit>,
    branches: HashMap<String, Branch>,
}

/// How one commit's tree is derived during replay.
enum Step<'a> {
    /// Apply the commit's change on top of its parent.
    Apply { parent: Option<&'a str> },
    /// A merge commit with fewer than two parents takes over its only parent.
    Adopt(Option<&'a str>),
    Merge {
        source: &'a str,
        base: Option<&'a str>,
        target: &'a str,
    },
}

impl<'a> Step<'a> {
    fn inputs(&self) -> impl Iterator<Item = &'a str> {
        let ids: [Option<&'a str>; 3] = match *self {
            Step::Apply { parent } | Step::Adopt(parent) => [parent, None, None],
            Step::Merge {
                source,
                base,
                target,
            } => [Some(source), base, Some(target)],
        };
        ids.into_iter().flatten()
    }
}

/// Replayed trees that later commits still need. A tree is handed out by
/// move on its last use and cloned before that.
#[derive(Default)]
struct ReplayCache<'a> {
    trees: HashMap<&'a str, TreeState>,
    uses: HashMap<&'a str, usize>,
}

impl<'a> ReplayCache<'a> {
    fn take(&mut self, id: &'a str, commit_id: &str) -> Result<TreeState> {
        let tree = match self.uses.get_mut(id) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                self.trees.get(id).cloned()
            }
            _ => {
                self.uses.remove(id);
                self.trees.remove(id)
            }
        };
        tree.ok_or_else(|| {
            MediaTypeTreeError::CorruptHistory(format!("parent {id} of commit {commit_id} is missing"))
        })
    }
}

impl CommitHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits across all branches.
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn has_branch(&self, branch_id: &str) -> bool {
        self.branches.contains_key(branch_id)
    }

    /// Branch ids in sorted order.
    pub fn branches(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.branches.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn commit(&self, commit_id: &str) -> Option<&Commit> {
        self.commits.get(commit_id)
    }

    fn branch(&self, branch_id: &str) -> Result<&Branch> {
        self.branches
            .get(branch_id)
            .ok_or_else(|| MediaTypeTreeError::MediaTypeTreeNotFound(branch_id.to_string()))
    }

    /// Latest commit of `branch_id`; `Ok(None)` before its first commit.
    pub fn tip(&self, branch_id: &str) -> Result<Option<&str>> {
        Ok(self.branch(branch_id)?.tip.as_deref())
    }

    /// The tree of `branch_id` at its tip.
    pub fn tree(&self, branch_id: &str) -> Result<&TreeState> {
        Ok(&self.branch(branch_id)?.tree)
    }

    /// Register `branch_id`, starting at the current tip of `base_branch_id`.
    ///
    /// Re-creating an existing branch is left to the caller to prevent; the
    /// branch is reset in that case.
    pub fn create_branch(&mut self, branch_id: &str, base_branch_id: Option<&str>) -> Result<()> {
        let start = match base_branch_id {
            Some(base) => self.branch(base)?.clone(),
            None => Branch::default(),
        };
        self.branches.insert(branch_id.to_string(), start);
        Ok(())
    }

    fn ensure_new(&self, commit_id: &str) -> Result<()> {
        if self.commits.contains_key(commit_id) {
            return Err(MediaTypeTreeError::CommitAlreadyExists(commit_id.to_string()));
        }
        Ok(())
    }

    /// Append a commit on top of `branch_id`'s tip and advance the branch.
    ///
    /// The change is applied to the branch's tree first; if it does not apply,
    /// nothing changes.
    pub fn add_commit(&mut self, branch_id: &str, commit_id: &str, change: Change) -> Result<()> {
        self.ensure_new(commit_id)?;
        let branch = self
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| MediaTypeTreeError::MediaTypeTreeNotFound(branch_id.to_string()))?;
        apply_change(&mut branch.tree, commit_id, &change)?;

        let parents = branch.tip.replace(commit_id.to_string()).into_iter().collect();
        self.insert(commit_id, parents, change);
        Ok(())
    }

    /// Append a merge commit whose parents are the source tip and the target
    /// tip, in that order. Only the target branch moves.
    pub fn add_merge_commit(
        &mut self,
        source_branch_id: &str,
        target_branch_id: &str,
        commit_id: &str,
        change: Change,
    ) -> Result<()> {
        self.ensure_new(commit_id)?;
        let merged = self.merged_tree(source_branch_id, target_branch_id)?;
        let source_tip = self.tip(source_branch_id)?.map(str::to_string);
        let branch = self
            .branches
            .get_mut(target_branch_id)
            .ok_or_else(|| MediaTypeTreeError::MediaTypeTreeNotFound(target_branch_id.to_string()))?;

        let parents = source_tip
            .into_iter()
            .chain(branch.tip.replace(commit_id.to_string()))
            .collect();
        branch.tree = merged;
        self.insert(commit_id, parents, change);
        Ok(())
    }

    fn insert(&mut self, commit_id: &str, parents: Vec<String>, change: Change) {
        self.commits.insert(
            commit_id.to_string(),
            Commit {
                id: commit_id.to_string(),
                parents,
                change,
            },
        );
    }

    /// The target branch's tree with the source branch merged in over their
    /// last common commit. Nothing is recorded.
    pub fn merged_tree(&self, source_branch_id: &str, target_branch_id: &str) -> Result<TreeState> {
        if source_branch_id == target_branch_id {
            return Err(MediaTypeTreeError::MediaTypeMergeIntoSelf(
                target_branch_id.to_string(),
            ));
        }
        let source = self.tree(source_branch_id)?;
        let base_commit = self.last_common_commit(source_branch_id, target_branch_id)?;
        let base = self.tree_at(base_commit.as_deref())?;

        let mut merged = self.tree(target_branch_id)?.clone();
        merged.merge(source, &base)?;
        Ok(merged)
    }

    /// The tree as of `commit_id`, taken from a branch whose tip it is when
    /// possible.
    fn tree_at(&self, commit_id: Option<&str>) -> Result<TreeState> {
        let at_tip = self
            .branches
            .values()
            .find(|branch| branch.tip.is_some() && branch.tip.as_deref() == commit_id);
        match at_tip {
            Some(branch) => Ok(branch.tree.clone()),
            None => self.materialize(commit_id),
        }
    }

    /// Every commit reachable from `commit_id`, itself included.
    pub fn ancestors(&self, commit_id: &str) -> HashSet<&str> {
        let mut result = HashSet::new();
        let Some((root, _)) = self.commits.get_key_value(commit_id) else {
            return result;
        };
        let mut stack = vec![root.as_str()];

        while let Some(id) = stack.pop() {
            if result.insert(id)
                && let Some(commit) = self.commits.get(id)
            {
                stack.extend(commit.parents.iter().map(String::as_str));
            }
        }

        result
    }

    /// Merge base of two commits: the first commit found walking back from
    /// `target` breadth-first that is also an ancestor of `source`.
    pub fn common_ancestor(&self, source: Option<&str>, target: Option<&str>) -> Option<String> {
        self.common_ancestor_ref(source?, target?).map(str::to_string)
    }

    fn common_ancestor_ref(&self, source: &str, target: &str) -> Option<&str> {
        let source_ancestors = self.ancestors(source);
        let (root, _) = self.commits.get_key_value(target)?;

        let mut seen: HashSet<&str> = HashSet::from([root.as_str()]);
        let mut queue = VecDeque::from([root.as_str()]);
        while let Some(id) = queue.pop_front() {
            if source_ancestors.contains(id) {
                return Some(id);
            }
            if let Some(commit) = self.commits.get(id) {
                for parent in &commit.parents {
                    if seen.insert(parent.as_str()) {
                        queue.push_back(parent.as_str());
                    }
                }
            }
        }
        None
    }

    /// Most recent commit shared by both branches, or `None` if they share
    /// nothing (for example, forked before either had commits).
    pub fn last_common_commit(
        &self,
        source_branch_id: &str,
        target_branch_id: &str,
    ) -> Result<Option<String>> {
        let source_tip = self.tip(source_branch_id)?;
        let target_tip = self.tip(target_branch_id)?;
        Ok(self.common_ancestor(source_tip, target_tip))
    }

    /// All commits of `branch_id`, oldest first.
    pub fn commits_by_branch(&self, branch_id: &str) -> Result<Vec<&Commit>> {
        Ok(match self.tip(branch_id)? {
            Some(tip) => self.commits_to(tip),
            None => Vec::new(),
        })
    }

    /// All commits reachable from `commit_id`, ordered so that every commit
    /// comes after all of its parents. Parents are visited in stored order,
    /// which makes the ordering deterministic.
    pub fn commits_to(&self, commit_id: &str) -> Vec<&Commit> {
        let mut ordered = Vec::new();
        let Some((root, _)) = self.commits.get_key_value(commit_id) else {
            return ordered;
        };

        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, bool)> = vec![(root.as_str(), false)];
        while let Some((id, expanded)) = stack.pop() {
            let Some(commit) = self.commits.get(id) else {
                continue;
            };
            if expanded {
                ordered.push(commit);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            for parent in commit.parents.iter().rev() {
                if !visited.contains(parent.as_str()) {
                    stack.push((parent.as_str(), false));
                }
            }
        }

        ordered
    }

    /// Rebuild the tree of `branch_id` at its tip by replaying its history.
    pub fn materialize_branch(&self, branch_id: &str) -> Result<TreeState> {
        let tip = self.tip(branch_id)?;
        self.materialize(tip)
    }

    /// Rebuild the tree as of `commit_id` by replaying its history.
    ///
    /// Each commit's tree is derived from its parents' trees: ordinary commits
    /// apply their change on top of their parent, merge commits three-way
    /// merge the source parent into the target parent over their common
    /// ancestor. A tree is kept only while a later commit still reads it and
    /// is moved into its last reader, so a linear history replays without
    /// copying. Any failure here means the stored history is inconsistent.
    pub fn materialize(&self, commit_id: Option<&str>) -> Result<TreeState> {
        let Some(commit_id) = commit_id else {
            return Ok(TreeState::new());
        };
        let Some((target, _)) = self.commits.get_key_value(commit_id) else {
            return Err(MediaTypeTreeError::CorruptHistory(format!(
                "commit {commit_id} is not in history"
            )));
        };

        let ordered = self.commits_to(target);
        tracing::debug!(commit_id, commits = ordered.len(), "materializing tree");

        let mut cache = ReplayCache::default();
        let mut steps = Vec::with_capacity(ordered.len());
        for &commit in &ordered {
            let step = self.step(commit);
            for input in step.inputs() {
                *cache.uses.entry(input).or_default() += 1;
            }
            steps.push(step);
        }
        *cache.uses.entry(target.as_str()).or_default() += 1;

        for (commit, step) in ordered.into_iter().zip(steps) {
            let tree = replay_commit(commit, step, &mut cache).map_err(|e| match e {
                MediaTypeTreeError::CorruptHistory(_) => e,
                other => MediaTypeTreeError::CorruptHistory(format!(
                    "commit {} cannot be replayed: {other}",
                    commit.id
                )),
            })?;
            cache.trees.insert(commit.id.as_str(), tree);
        }

        cache.take(target.as_str(), commit_id)
    }

    fn step<'a>(&'a self, commit: &'a Commit) -> Step<'a> {
        match (&commit.change, commit.parents.as_slice()) {
            (Change::Merge { .. }, [source, target, ..]) => Step::Merge {
                source: source.as_str(),
                base: self.common_ancestor_ref(source, target),
                target: target.as_str(),
            },
            (Change::Merge { .. }, parents) => Step::Adopt(parents.first().map(String::as_str)),
            (_, parents) => Step::Apply {
                parent: parents.first().map(String::as_str),
            },
        }
    }
}

fn replay_commit<'a>(commit: &Commit, step: Step<'a>, cache: &mut ReplayCache<'a>) -> Result<TreeState> {
    match step {
        Step::Apply { parent } => {
            let mut tree = match parent {
                Some(id) => cache.take(id, &commit.id)?,
                None => TreeState::new(),
            };
            apply_change(&mut tree, &commit.id, &commit.change)?;
            Ok(tree)
        }
        Step::Adopt(Some(id)) => cache.take(id, &commit.id),
        Step::Adopt(None) => Ok(TreeState::new()),
        Step::Merge {
            source,
            base,
            target,
        } => {
            let source_tree = cache.take(source, &commit.id)?;
            let base_tree = match base {
                Some(id) => cache.take(id, &commit.id)?,
                None => TreeState::new(),
            };
            let mut tree = cache.take(target, &commit.id)?;
            tree.merge(&source_tree, &base_tree)?;
            Ok(tree)
        }
    }
}

/// Apply an ordinary commit's change. Merge changes only come from
/// [`CommitHistory::add_merge_commit`].
fn apply_change(tree: &mut TreeState, commit_id: &str, change: &Change) -> Result<()> {
    match change {
        Change::AddMediaType { id, name } => {
            tree.add_media_type(id, name)?;
        }
        Change::RemoveMediaType { id } => tree.remove_media_type(id)?,
        Change::AddParent {
            child_id,
            parent_id,
        } => tree.add_child_to_media_type(parent_id, child_id)?,
        Change::Merge { .. } => {
            return Err(MediaTypeTreeError::CorruptHistory(format!(
                "commit {commit_id} carries a merge change but has no merge parents"
            )));
        }
    }
    Ok(())
}
