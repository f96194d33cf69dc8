//! Path search over string-keyed adjacency.
//!
//! Both the media-type tree (child edges) and the genre tree (parent,
//! derivation and influence edges) reject edges that would close a loop.
//! They share this search: adding `from -> to` creates a cycle exactly when
//! `from` is already reachable from `to`.

use std::collections::{HashMap, HashSet, VecDeque};

/// Breadth-first search from `start` to `goal`, following `neighbors`.
///
/// Returns the node ids on the shortest path, both ends inclusive, or `None`
/// if `goal` is unreachable. `start == goal` yields a one-element path.
pub fn find_path<'a, F, I>(start: &'a str, goal: &str, neighbors: F) -> Option<Vec<&'a str>>
where
    F: Fn(&'a str) -> I,
    I: IntoIterator<Item = &'a str>,
{
    if start == goal {
        return Some(vec![start]);
    }

    let mut came_from: HashMap<&'a str, &'a str> = HashMap::new();
    let mut seen: HashSet<&'a str> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);

    while let Some(id) = queue.pop_front() {
        for next in neighbors(id) {
            if !seen.insert(next) {
                continue;
            }
            came_from.insert(next, id);
            if next == goal {
                let mut path = vec![next];
                let mut cursor = next;
                while let Some(&prev) = came_from.get(cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}

/// `true` if `goal` is reachable from `start` (or equal to it).
pub fn is_reachable<'a, F, I>(start: &'a str, goal: &str, neighbors: F) -> bool
where
    F: Fn(&'a str) -> I,
    I: IntoIterator<Item = &'a str>,
{
    find_path(start, goal, neighbors).is_some()
}
