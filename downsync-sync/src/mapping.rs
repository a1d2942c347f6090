//! Remote path → local destination.

use std::path::{Component, Path, PathBuf};

use downsync_core::SyncEntry;

/// True when `path` lies under `remote_src` on a segment boundary. A remote
/// source of `.` matches every path.
pub fn match_dir(remote_src: &Path, path: &Path) -> bool {
    if remote_src == Path::new(".") {
        return true;
    }
    path.starts_with(remote_src)
}

/// Where `path` lands locally under `entry`, or `None` when it is outside
/// the entry's remote source.
///
/// The remote-source prefix is replaced by `local_dst`. Under a `.` source
/// the whole path, made relative, is kept. Suffixes that would climb out of
/// `local_dst` are rejected.
pub fn local_destination(entry: &SyncEntry, path: &Path) -> Option<PathBuf> {
    if !match_dir(&entry.remote_src, path) {
        return None;
    }
    let relative = if entry.remote_src == Path::new(".") {
        path.strip_prefix("/").unwrap_or(path)
    } else {
        path.strip_prefix(&entry.remote_src).ok()?
    };
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(entry.local_dst.join(relative))
}
