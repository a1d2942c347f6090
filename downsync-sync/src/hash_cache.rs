//! Synced-hash cache: the last content hash written to each local
//! destination, so unchanged files are not downloaded twice.
//!
//! The cache is constructed by the caller and shared by every session of a
//! downloader. Check and set happen under one lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use downsync_core::ContentHash;

/// Destination path → last synced hash.
#[derive(Debug, Default)]
pub struct SyncedHashCache {
    entries: Mutex<HashMap<PathBuf, ContentHash>>,
}

impl SyncedHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash` for `destination` unless it is already the cached value.
    ///
    /// Returns `true` when the caller should download. The entry is updated
    /// before the download happens and is not rolled back if it fails.
    pub fn record_if_changed(&self, destination: &Path, hash: &ContentHash) -> bool {
        let mut entries = self.lock();
        match entries.get(destination) {
            Some(cached) if cached == hash => false,
            _ => {
                entries.insert(destination.to_path_buf(), hash.clone());
                true
            }
        }
    }

    #[cfg(test)]
    fn get(&self, destination: &Path) -> Option<ContentHash> {
        self.lock().get(destination).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, ContentHash>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn identical_hash_is_recorded_once() {
        let cache = SyncedHashCache::new();
        let dst = Path::new("src/main.go");
        let hash = ContentHash::from("abc");

        assert!(cache.record_if_changed(dst, &hash));
        assert!(!cache.record_if_changed(dst, &hash));
        assert_eq!(cache.get(dst), Some(hash));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn new_hash_replaces_old_one() {
        let cache = SyncedHashCache::new();
        let dst = Path::new("src/main.go");

        assert!(cache.record_if_changed(dst, &ContentHash::from("v1")));
        assert!(cache.record_if_changed(dst, &ContentHash::from("v2")));
        assert!(cache.record_if_changed(dst, &ContentHash::from("v1")));
        assert_eq!(cache.get(dst), Some(ContentHash::from("v1")));
    }

    #[test]
    fn destinations_are_independent() {
        let cache = SyncedHashCache::new();
        let hash = ContentHash::from("same");
        assert!(cache.record_if_changed(Path::new("a"), &hash));
        assert!(cache.record_if_changed(Path::new("b"), &hash));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_writers_download_once() {
        let cache = Arc::new(SyncedHashCache::new());
        let hash = ContentHash::from("race");
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = cache.clone();
                    let hash = hash.clone();
                    scope.spawn(move || cache.record_if_changed(Path::new("x"), &hash))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().expect("join")))
                .sum()
        });
        assert_eq!(winners, 1);
    }
}
