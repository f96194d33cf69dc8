#![doc = include_str!("../README.md")]

use mediatree::v1::{EventStore, MediaTypeTreeEvent, StoredEvent, check_stream, last_main_tree};
use mediatree::StoreError;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const EVENTS_FILE: &str = "events.jsonl";

pub type Result<T> = std::result::Result<T, JsonlStoreError>;

#[derive(Debug, Error)]
pub enum JsonlStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{}:{line}: {source}", .path.display())]
    InvalidLine {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("{}:{line}: sequence {sequence} does not follow {previous}", .path.display())]
    OutOfOrder {
        path: PathBuf,
        line: usize,
        sequence: u64,
        previous: u64,
    },
}

impl From<JsonlStoreError> for StoreError {
    fn from(err: JsonlStoreError) -> Self {
        match err {
            JsonlStoreError::Io(e) => StoreError::Io(e),
            JsonlStoreError::Json(e) => StoreError::Json(e),
            other => StoreError::Other(other.to_string()),
        }
    }
}

/// [`EventStore`] kept in `events.jsonl` inside a directory, one
/// [`StoredEvent`] per line in sequence order.
///
/// Appends write only the new lines. Every line ends in a newline, so an
/// unterminated last line can only be the rest of an interrupted append: it
/// is ignored on [`open`](Self::open) and cut off by the next append. A failed
/// write is truncated back before the error is returned. The log is read
/// once at `open`; a single process is expected to write to a directory at
/// a time.
#[derive(Debug)]
pub struct JsonlEventStore {
    dir: PathBuf,
    events: Vec<StoredEvent>,
    main_tree: Option<String>,
    /// Bytes of the events file made of complete lines.
    committed_len: u64,
}

impl JsonlEventStore {
    /// Open the store in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (events, committed_len) = read_events(&dir.join(EVENTS_FILE))?;
        let main_tree = last_main_tree(events.iter().map(|stored| &stored.event)).map(str::to_string);
        tracing::debug!(
            dir = %dir.display(),
            events = events.len(),
            main_tree = main_tree.as_deref(),
            "opened event store"
        );

        Ok(Self {
            dir,
            events,
            main_tree,
            committed_len,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Write `lines` after the last complete line and flush them to disk.
    fn write_lines(&mut self, lines: &[u8]) -> Result<()> {
        let path = self.dir.join(EVENTS_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let written = file
            .set_len(self.committed_len)
            .and_then(|()| file.seek(SeekFrom::End(0)))
            .and_then(|_| file.write_all(lines))
            .and_then(|()| file.sync_data());
        if let Err(err) = written {
            if let Err(rollback) = file.set_len(self.committed_len) {
                tracing::error!(
                    path = %path.display(),
                    error = %rollback,
                    "failed to truncate partially written events"
                );
            }
            return Err(err.into());
        }

        self.committed_len += lines.len() as u64;
        Ok(())
    }
}

/// Complete lines of `path` as events, plus the byte length they cover.
fn read_events(path: &Path) -> Result<(Vec<StoredEvent>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut events: Vec<StoredEvent> = Vec::new();
    let mut committed_len = 0u64;
    let mut line = Vec::new();
    let mut number = 0usize;
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        number += 1;
        if line.last() != Some(&b'\n') {
            tracing::warn!(
                path = %path.display(),
                line = number,
                bytes = read,
                "ignoring unterminated last line"
            );
            break;
        }
        committed_len += read as u64;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let stored: StoredEvent =
            serde_json::from_slice(&line).map_err(|source| JsonlStoreError::InvalidLine {
                path: path.to_path_buf(),
                line: number,
                source,
            })?;
        if let Some(previous) = events.last()
            && stored.sequence <= previous.sequence
        {
            return Err(JsonlStoreError::OutOfOrder {
                path: path.to_path_buf(),
                line: number,
                sequence: stored.sequence,
                previous: previous.sequence,
            });
        }
        events.push(stored);
    }
    Ok((events, committed_len))
}

impl EventStore for JsonlEventStore {
    fn load(&self, tree_id: &str) -> std::result::Result<Vec<StoredEvent>, StoreError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.event.tree_id() == tree_id)
            .cloned()
            .collect())
    }

    fn load_after(&self, sequence: u64) -> std::result::Result<Vec<StoredEvent>, StoreError> {
        let start = self.events.partition_point(|e| e.sequence <= sequence);
        Ok(self.events[start..].to_vec())
    }

    fn append(
        &mut self,
        tree_id: &str,
        events: &[MediaTypeTreeEvent],
    ) -> std::result::Result<Vec<StoredEvent>, StoreError> {
        check_stream(tree_id, events)?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let next = self.events.last().map_or(1, |e| e.sequence + 1);
        let stored: Vec<StoredEvent> = events
            .iter()
            .enumerate()
            .map(|(i, event)| StoredEvent::new(next + i as u64, event.clone()))
            .collect();

        let mut lines = Vec::new();
        for event in &stored {
            serde_json::to_writer(&mut lines, event)?;
            lines.push(b'\n');
        }
        self.write_lines(&lines)?;

        if let Some(main) = last_main_tree(events) {
            self.main_tree = Some(main.to_string());
        }
        self.events.extend(stored.iter().cloned());

        tracing::debug!(tree_id, first_sequence = next, count = stored.len(), "appended events");
        Ok(stored)
    }

    fn main_tree(&self) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.main_tree.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(tree_id: &str) -> MediaTypeTreeEvent {
        MediaTypeTreeEvent::TreeCreated {
            tree_id: tree_id.into(),
            name: tree_id.into(),
            base_tree_id: None,
            owner_id: 1,
        }
    }

    fn main_set(tree_id: &str) -> MediaTypeTreeEvent {
        MediaTypeTreeEvent::MainTreeSet {
            tree_id: tree_id.into(),
            user_id: 1,
        }
    }

    fn added(tree_id: &str, commit_id: &str) -> MediaTypeTreeEvent {
        MediaTypeTreeEvent::MediaTypeAdded {
            tree_id: tree_id.into(),
            commit_id: commit_id.into(),
            media_type_id: "album".into(),
            name: "Album".into(),
        }
    }

    #[test]
    fn test_open_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlEventStore::open(dir.path().join("store")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.main_tree().unwrap(), None);
        assert!(dir.path().join("store").is_dir());
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        let stored = store
            .append("main", &[created("main"), added("main", "c-1")])
            .unwrap();
        assert_eq!(stored[1].sequence, 2);
        store.append("other", &[created("other")]).unwrap();

        let reopened = JsonlEventStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.load("main").unwrap(), stored);
        assert_eq!(reopened.main_tree().unwrap(), None);

        let after = reopened.load_after(2).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].event.tree_id(), "other");
    }

    #[test]
    fn test_main_tree_is_read_from_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main"), main_set("main")]).unwrap();
        store.append("next", &[created("next"), main_set("next")]).unwrap();
        assert_eq!(store.main_tree().unwrap(), Some("next".to_string()));

        let reopened = JsonlEventStore::open(dir.path()).unwrap();
        assert_eq!(reopened.main_tree().unwrap(), Some("next".to_string()));
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_append_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(EVENTS_FILE);
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main")]).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        store.append("main", &[added("main", "c-1")]).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), 2);
    }

    #[test]
    fn test_interrupted_append_is_ignored_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(EVENTS_FILE);
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main")]).unwrap();

        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{\"sequence\":2,\"recorded_at\":");
        std::fs::write(&path, contents).unwrap();

        let mut reopened = JsonlEventStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let stored = reopened.append("main", &[added("main", "c-1")]).unwrap();
        assert_eq!(stored[0].sequence, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(JsonlEventStore::open(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_file_is_one_event_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main")]).unwrap();
        store.append("main", &[added("main", "c-1")]).unwrap();

        let contents = std::fs::read_to_string(dir.path().join(EVENTS_FILE)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"tree_created\""));
        assert!(lines[1].contains("\"sequence\":2"));
    }

    #[test]
    fn test_rejected_append_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main")]).unwrap();
        let before = std::fs::read_to_string(dir.path().join(EVENTS_FILE)).unwrap();

        let err = store
            .append("main", &[added("main", "c-1"), created("other")])
            .unwrap_err();
        assert!(matches!(err, StoreError::StreamMismatch { .. }));
        assert_eq!(store.len(), 1);
        let after = std::fs::read_to_string(dir.path().join(EVENTS_FILE)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_invalid_line_is_reported_with_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main")]).unwrap();

        let path = dir.path().join(EVENTS_FILE);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("\n{\"sequence\": 2, \"nope\": true}\n");
        std::fs::write(&path, contents).unwrap();

        let err = JsonlEventStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, JsonlStoreError::InvalidLine { line: 3, .. }));
    }

    #[test]
    fn test_out_of_order_sequence_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlEventStore::open(dir.path()).unwrap();
        store.append("main", &[created("main")]).unwrap();

        let path = dir.path().join(EVENTS_FILE);
        let line = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, format!("{line}{line}")).unwrap();

        let err = JsonlEventStore::open(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            JsonlStoreError::OutOfOrder {
                sequence: 1,
                previous: 1,
                ..
            }
        ));
        let converted: StoreError = err.into();
        assert!(matches!(converted, StoreError::Other(_)));
    }

    #[test]
    fn test_works_with_service() {
        use mediatree::v1::{Command, MediaTypeTreeService, Permission, SequentialCommitIds, User};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let user = User::new(1).with_permission(Permission::MediaTypeTreesCreate);
        {
            let store = JsonlEventStore::open(dir.path()).unwrap();
            let mut svc = MediaTypeTreeService::new(store, Arc::new(SequentialCommitIds::new("a")));
            svc.execute(&user, Command::CreateTree {
                tree_id: "main".into(),
                name: "Main".into(),
                base_tree_id: None,
            })
            .unwrap();
            svc.execute(&user, Command::AddMediaType {
                tree_id: "main".into(),
                media_type_id: "album".into(),
                name: "Album".into(),
            })
            .unwrap();
        }

        let store = JsonlEventStore::open(dir.path()).unwrap();
        let svc = MediaTypeTreeService::new(store, Arc::new(SequentialCommitIds::new("b")));
        let main = svc.repository().load("main", &[]).unwrap();
        assert!(main.tree().contains("album"));
    }
}
