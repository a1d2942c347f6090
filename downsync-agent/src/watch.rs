//! Filesystem watch loop.
//!
//! Each target is registered directory by directory (non-recursive watches),
//! pruning excluded subtrees. Directories created later are picked up when
//! their CREATE arrives. Raw notifications are classified into
//! [`FileEvent`]s; only MODIFY events, hashed, are published.

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use downsync_core::{ContentHash, EventType, FileEvent};
use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc};

use crate::error::{io_err, AgentError};
use crate::exclude::ExcludeMatcher;

pub type RawEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Map a raw notification kind to an event type. Metadata, access and
/// unknown notifications are not classified.
pub fn classify(kind: &EventKind) -> Option<EventType> {
    match kind {
        EventKind::Create(_) => Some(EventType::Create),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(EventType::Modify)
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some(EventType::Rename),
        EventKind::Remove(_) => Some(EventType::Delete),
        _ => None,
    }
}

/// Lowercase hex SHA-256 of the file's full contents.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Owns the OS watcher and the set of directories registered with it.
pub struct TreeWatcher {
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
    excludes: Arc<ExcludeMatcher>,
}

impl TreeWatcher {
    pub fn new(excludes: Arc<ExcludeMatcher>) -> Result<(Self, RawEvents), AgentError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        Ok((
            Self {
                watcher,
                watched: HashSet::new(),
                excludes,
            },
            event_rx,
        ))
    }

    /// Register `root` and every non-excluded directory below it. Returns the
    /// number of directories newly watched.
    pub fn register_tree(&mut self, root: &Path) -> Result<usize, AgentError> {
        let mut added = 0;
        for dir in collect_dirs(root, &self.excludes)? {
            if !self.watched.insert(dir.clone()) {
                continue;
            }
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    added += 1;
                    tracing::debug!(path = %dir.display(), "watching directory");
                }
                Err(err) => {
                    self.watched.remove(&dir);
                    // Vanished between the walk and the watch.
                    if dir.exists() {
                        return Err(err.into());
                    }
                }
            }
        }
        Ok(added)
    }

    #[cfg(test)]
    fn is_watching(&self, dir: &Path) -> bool {
        self.watched.contains(dir)
    }

    #[cfg(test)]
    fn watched_count(&self) -> usize {
        self.watched.len()
    }
}

/// Breadth-first walk of `root`, skipping excluded directories and their
/// subtrees. An excluded root yields nothing.
fn collect_dirs(root: &Path, excludes: &ExcludeMatcher) -> Result<Vec<PathBuf>, AgentError> {
    if excludes.is_excluded(root) {
        return Ok(Vec::new());
    }
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound && cursor > 1 => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if !ty.is_dir() {
                continue;
            }
            let path = entry.path();
            if excludes.is_excluded(&path) {
                tracing::debug!(path = %path.display(), "pruning excluded directory");
                continue;
            }
            dirs.push(path);
        }
    }
    Ok(dirs)
}

/// Consume raw notifications until the source closes or shutdown fires,
/// publishing MODIFY events on `publish`.
pub async fn run_watch_loop(
    mut tree: TreeWatcher,
    mut raw: RawEvents,
    publish: broadcast::Sender<FileEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    let mut sequence: u64 = 0;

    loop {
        let event = tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = raw.recv() => event,
        };
        let Some(event) = event else { break };
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "watcher event error");
                continue;
            }
        };
        let Some(event_type) = classify(&event.kind) else {
            continue;
        };

        for path in event.paths {
            match event_type {
                EventType::Create => {
                    if tree.excludes.is_excluded(&path) {
                        continue;
                    }
                    if path.is_dir() {
                        match tree.register_tree(&path) {
                            Ok(added) => tracing::debug!(
                                path = %path.display(),
                                added,
                                "new directory registered"
                            ),
                            Err(err) => tracing::warn!(
                                path = %path.display(),
                                error = %err,
                                "failed to watch new directory"
                            ),
                        }
                    }
                    tracing::debug!(path = %path.display(), event = %event_type, "not forwarded");
                }
                EventType::Modify => {
                    if tree.excludes.is_excluded(&path) {
                        continue;
                    }
                    let hash_path = path.clone();
                    let hashed = tokio::task::spawn_blocking(move || hash_file(&hash_path))
                        .await
                        .map_err(|err| AgentError::Runtime(format!("hash task join error: {err}")))?;
                    let content_hash = match hashed {
                        Ok(hash) => hash,
                        Err(err) => {
                            tracing::debug!(
                                path = %path.display(),
                                error = %err,
                                "dropping event, file unreadable"
                            );
                            continue;
                        }
                    };
                    sequence += 1;
                    let file_event = FileEvent {
                        path,
                        event_type,
                        content_hash: Some(content_hash),
                        sequence,
                    };
                    tracing::debug!(
                        path = %file_event.path.display(),
                        sequence,
                        "publishing modify event"
                    );
                    // No subscribers yet is not an error.
                    let _ = publish.send(file_event);
                }
                EventType::Delete | EventType::Rename => {
                    tracing::debug!(path = %path.display(), event = %event_type, "not forwarded");
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case(EventKind::Create(CreateKind::File), Some(EventType::Create))]
    #[case(EventKind::Modify(ModifyKind::Data(DataChange::Content)), Some(EventType::Modify))]
    #[case(EventKind::Modify(ModifyKind::Any), Some(EventType::Modify))]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::From)), Some(EventType::Rename))]
    #[case(EventKind::Remove(RemoveKind::File), Some(EventType::Delete))]
    #[case(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), None)]
    #[case(EventKind::Access(AccessKind::Read), None)]
    #[case(EventKind::Any, None)]
    fn classifies_notification_kinds(#[case] kind: EventKind, #[case] expected: Option<EventType>) {
        assert_eq!(classify(&kind), expected);
    }

    #[test]
    fn hash_matches_sha256_of_contents() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("main.go");
        fs::write(&path, b"hello").expect("write");
        assert_eq!(
            hash_file(&path).expect("hash"),
            ContentHash::from("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn hash_of_missing_file_fails() {
        let dir = TempDir::new().expect("tempdir");
        assert!(hash_file(&dir.path().join("gone")).is_err());
    }

    /// Tempdirs beside the crate, since `/tmp` is on the system deny-list.
    fn scratch() -> TempDir {
        let dir = tempfile::Builder::new()
            .prefix(".watch-test-")
            .tempdir_in(env!("CARGO_MANIFEST_DIR"))
            .expect("tempdir");
        assert!(
            !crate::paths::is_system_path(dir.path()),
            "scratch dir {} is on the system deny-list; move the checkout out of /tmp",
            dir.path().display()
        );
        dir
    }

    #[test]
    fn collect_dirs_prunes_excluded_subtrees() {
        let dir = scratch();
        let root = dir.path().join("src");
        for sub in ["pkg/api", "node_modules/left-pad/lib", "web"] {
            fs::create_dir_all(root.join(sub)).expect("mkdir");
        }
        let excludes = ExcludeMatcher::new(&[root.clone()], &["node_modules".to_string()]);
        let dirs = collect_dirs(&root, &excludes).expect("walk");

        assert!(dirs.contains(&root));
        assert!(dirs.contains(&root.join("pkg/api")));
        assert!(dirs.contains(&root.join("web")));
        assert!(!dirs.iter().any(|d| d.starts_with(root.join("node_modules"))));
    }

    #[test]
    fn excluded_root_is_not_walked() {
        let excludes = ExcludeMatcher::default();
        let dirs = collect_dirs(Path::new("/proc"), &excludes).expect("walk");
        assert!(dirs.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = scratch();
        let excludes = ExcludeMatcher::default();
        assert!(collect_dirs(&dir.path().join("absent"), &excludes).is_err());
    }

    #[tokio::test]
    async fn register_tree_watches_each_directory_once() {
        let dir = scratch();
        let root = dir.path().join("src");
        fs::create_dir_all(root.join("a/b")).expect("mkdir");
        let excludes = Arc::new(ExcludeMatcher::new(&[root.clone()], &[]));
        let (mut tree, _raw) = TreeWatcher::new(excludes).expect("watcher");

        assert_eq!(tree.register_tree(&root).expect("register"), 3);
        assert_eq!(tree.register_tree(&root.join("a")).expect("register again"), 0);
        assert!(tree.is_watching(&root.join("a/b")));
        assert_eq!(tree.watched_count(), 3);
    }
}
