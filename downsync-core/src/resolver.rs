//! Maps a running container's image back to the sync policy of the artifact
//! that built it.

use crate::types::{ArtifactGraph, BuildArtifact, ImageTag, SyncPolicy};

/// Resolve the sync policy for a container running `container_image`.
///
/// The image is matched against the tags of the current build outputs; the
/// matching build's image name selects the artifact. Returns `None` when no
/// build produced this tag, when the artifact is unknown, or when the artifact
/// declares no downstream sync.
pub fn resolve<'a>(
    graph: &'a ArtifactGraph,
    builds: &[BuildArtifact],
    container_image: &ImageTag,
) -> Option<&'a SyncPolicy> {
    builds
        .iter()
        .filter(|build| &build.tag == container_image)
        .find_map(|build| graph.get(&build.image_name))
        .and_then(|artifact| artifact.downstream_sync.as_ref())
}
