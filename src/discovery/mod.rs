//! Episode discovery across multi-camera dataset chunks.
//!
//! Videos live at `<root>/videos/<chunk>/<camera>/episode_<id>.mp4`. An
//! episode is discovered only when every required camera has a video for it
//! within the same chunk.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EpisodeRange;

/// Directory under the dataset root holding chunk directories.
pub const VIDEOS_DIR: &str = "videos";

/// Prefix every chunk directory name carries.
pub const CHUNK_PREFIX: &str = "chunk-";

/// One (chunk, episode) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpisodeKey {
    pub chunk_id: String,
    pub episode_id: String,
}

impl EpisodeKey {
    pub fn new(chunk_id: impl Into<String>, episode_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            episode_id: episode_id.into(),
        }
    }
}

impl fmt::Display for EpisodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/episode_{}", self.chunk_id, self.episode_id)
    }
}

fn episode_filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^episode_(\d+)\.mp4$").expect("episode filename regex is valid"))
}

/// Extracts the episode id from a video file name, e.g. `episode_000042.mp4`.
pub fn episode_id_from_filename(file_name: &str) -> Option<String> {
    episode_filename_regex()
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}

/// Path of one camera's video for an episode.
pub fn camera_video_path(dataset_root: &Path, chunk_id: &str, camera: &str, episode_id: &str) -> PathBuf {
    dataset_root
        .join(VIDEOS_DIR)
        .join(chunk_id)
        .join(camera)
        .join(format!("episode_{episode_id}.mp4"))
}

/// Lists chunk directories under `<root>/videos`, sorted by name.
fn list_chunks(videos_root: &Path) -> Vec<(String, PathBuf)> {
    let mut chunks: Vec<(String, PathBuf)> = WalkDir::new(videos_root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            name.starts_with(CHUNK_PREFIX)
                .then(|| (name, entry.into_path()))
        })
        .collect();
    chunks.sort();
    chunks
}

/// Episode ids with a video in one camera directory.
fn camera_episode_ids(camera_dir: &Path) -> BTreeSet<String> {
    WalkDir::new(camera_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.file_name().to_str().and_then(episode_id_from_filename))
        .collect()
}

/// Discovers episodes present under every required camera and within `range`.
///
/// Chunks are visited in lexicographic order and episodes within a chunk are
/// emitted sorted. A missing dataset layout yields an empty list.
pub fn discover_episodes(
    dataset_root: &Path,
    cameras: &[String],
    range: &EpisodeRange,
) -> Vec<EpisodeKey> {
    let videos_root = dataset_root.join(VIDEOS_DIR);
    if !videos_root.is_dir() {
        warn!(path = %videos_root.display(), "Videos directory not found");
        return Vec::new();
    }

    let mut discovered = Vec::new();

    for (chunk_id, chunk_path) in list_chunks(&videos_root) {
        let mut cameras_present = 0usize;
        let mut per_camera: Vec<BTreeSet<String>> = Vec::with_capacity(cameras.len());

        for camera in cameras {
            let camera_dir = chunk_path.join(camera);
            if camera_dir.is_dir() {
                cameras_present += 1;
                per_camera.push(camera_episode_ids(&camera_dir));
            } else {
                warn!(path = %camera_dir.display(), "Camera directory missing");
                per_camera.push(BTreeSet::new());
            }
        }

        if cameras_present == 0 {
            debug!(chunk_id = %chunk_id, "No camera directories in chunk, skipping");
            continue;
        }

        let mut sets = per_camera.into_iter();
        let Some(first) = sets.next() else {
            continue;
        };
        let candidates = sets.fold(first, |acc, ids| acc.intersection(&ids).cloned().collect());

        let before = discovered.len();
        discovered.extend(
            candidates
                .into_iter()
                .filter(|id| range.contains(id))
                .map(|id| EpisodeKey::new(chunk_id.clone(), id)),
        );
        debug!(
            chunk_id = %chunk_id,
            episodes = discovered.len() - before,
            "Chunk scanned"
        );
    }

    info!(count = discovered.len(), "Episode discovery complete");
    discovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, chunk: &str, camera: &str, file: &str) {
        let dir = root.join(VIDEOS_DIR).join(chunk).join(camera);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), b"").unwrap();
    }

    fn cams(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_episode_id_from_filename() {
        assert_eq!(
            episode_id_from_filename("episode_000042.mp4").as_deref(),
            Some("000042")
        );
        assert_eq!(episode_id_from_filename("episode_abc.mp4"), None);
        assert_eq!(episode_id_from_filename("episode_000042.mkv"), None);
        assert_eq!(episode_id_from_filename("clip_000042.mp4"), None);
    }

    #[test]
    fn test_intersection_across_cameras() {
        let tmp = TempDir::new().unwrap();
        for id in ["000001", "000002", "000003"] {
            touch(tmp.path(), "chunk-000", "a", &format!("episode_{id}.mp4"));
        }
        for id in ["000002", "000003", "000004"] {
            touch(tmp.path(), "chunk-000", "b", &format!("episode_{id}.mp4"));
        }

        let found = discover_episodes(tmp.path(), &cams(&["a", "b"]), &EpisodeRange::default());
        let ids: Vec<&str> = found.iter().map(|k| k.episode_id.as_str()).collect();

        assert_eq!(ids, vec!["000002", "000003"]);
        assert!(found.iter().all(|k| k.chunk_id == "chunk-000"));
    }

    #[test]
    fn test_chunks_sorted_and_non_chunk_dirs_ignored() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "chunk-001", "a", "episode_000010.mp4");
        touch(tmp.path(), "chunk-000", "a", "episode_000001.mp4");
        touch(tmp.path(), "other", "a", "episode_000005.mp4");

        let found = discover_episodes(tmp.path(), &cams(&["a"]), &EpisodeRange::default());

        assert_eq!(
            found,
            vec![
                EpisodeKey::new("chunk-000", "000001"),
                EpisodeKey::new("chunk-001", "000010"),
            ]
        );
    }

    #[test]
    fn test_range_filter_inclusive() {
        let tmp = TempDir::new().unwrap();
        for id in ["000009", "000010", "000015", "000020", "000021"] {
            touch(tmp.path(), "chunk-000", "a", &format!("episode_{id}.mp4"));
        }

        let range = EpisodeRange::new(Some("000010"), Some("000020"));
        let found = discover_episodes(tmp.path(), &cams(&["a"]), &range);
        let ids: Vec<&str> = found.iter().map(|k| k.episode_id.as_str()).collect();

        assert_eq!(ids, vec!["000010", "000015", "000020"]);
    }

    #[test]
    fn test_missing_camera_dir_empties_chunk() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "chunk-000", "a", "episode_000001.mp4");

        let found = discover_episodes(tmp.path(), &cams(&["a", "b"]), &EpisodeRange::default());
        assert!(found.is_empty());
    }

    #[test]
    fn test_non_matching_files_ignored() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "chunk-000", "a", "episode_000001.mp4");
        touch(tmp.path(), "chunk-000", "a", "episode_000002.json");
        touch(tmp.path(), "chunk-000", "a", "notes.txt");

        let found = discover_episodes(tmp.path(), &cams(&["a"]), &EpisodeRange::default());
        assert_eq!(found, vec![EpisodeKey::new("chunk-000", "000001")]);
    }

    #[test]
    fn test_missing_root_structure() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_episodes(tmp.path(), &cams(&["a"]), &EpisodeRange::default()).is_empty());
        assert!(discover_episodes(
            &tmp.path().join("does-not-exist"),
            &cams(&["a"]),
            &EpisodeRange::default()
        )
        .is_empty());
    }

    #[test]
    fn test_camera_video_path() {
        let path = camera_video_path(Path::new("/data"), "chunk-000", "top", "000007");
        assert_eq!(
            path,
            PathBuf::from("/data/videos/chunk-000/top/episode_000007.mp4")
        );
    }

    #[test]
    fn test_episode_key_display() {
        let key = EpisodeKey::new("chunk-002", "000123");
        assert_eq!(key.to_string(), "chunk-002/episode_000123");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_videos_discovered() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let blobs = tmp.path().join("blobs");
        fs::create_dir_all(&blobs).unwrap();
        for camera in ["top", "wrist"] {
            let blob = blobs.join(format!("{camera}-blob"));
            fs::write(&blob, b"").unwrap();
            let dir = tmp.path().join(VIDEOS_DIR).join("chunk-000").join(camera);
            fs::create_dir_all(&dir).unwrap();
            symlink(&blob, dir.join("episode_000001.mp4")).unwrap();
        }
        // Dangling links do not count as present videos.
        let dir = tmp.path().join(VIDEOS_DIR).join("chunk-000").join("top");
        symlink(blobs.join("gone"), dir.join("episode_000002.mp4")).unwrap();

        let keys = discover_episodes(tmp.path(), &cams(&["top", "wrist"]), &EpisodeRange::default());
        assert_eq!(keys, vec![EpisodeKey::new("chunk-000", "000001")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_chunk_dir_discovered() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let snapshot = tmp.path().join("snapshot");
        for camera in ["top", "wrist"] {
            let dir = snapshot.join(camera);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("episode_000003.mp4"), b"").unwrap();
        }
        let videos = tmp.path().join(VIDEOS_DIR);
        fs::create_dir_all(&videos).unwrap();
        symlink(&snapshot, videos.join("chunk-001")).unwrap();

        let keys = discover_episodes(tmp.path(), &cams(&["top", "wrist"]), &EpisodeRange::default());
        assert_eq!(keys, vec![EpisodeKey::new("chunk-001", "000003")]);
    }
}
