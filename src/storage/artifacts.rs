//! Episode artifact persistence.
//!
//! Two flat files per analyzed episode: the validated record as JSON, named
//! by the configured pattern, and the raw model text as
//! `episode_<id>_raw.txt`. Both live in the output directory, which is
//! created on first write.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::config::OutputConfig;
use crate::error::ArtifactError;
use crate::validation::EpisodeRecord;

/// File name of the raw-response artifact for an episode.
pub fn raw_filename(episode_id: &str) -> String {
    format!("episode_{episode_id}_raw.txt")
}

/// Writes episode artifacts under an output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output: OutputConfig,
}

impl ArtifactStore {
    pub fn new(output: OutputConfig) -> Self {
        Self { output }
    }

    /// Returns the output directory.
    pub fn dir(&self) -> &Path {
        &self.output.dir
    }

    /// Path the episode JSON is written to.
    pub fn episode_path(&self, episode_id: &str) -> PathBuf {
        self.output.dir.join(self.output.episode_filename(episode_id))
    }

    /// Path the raw model text is written to.
    pub fn raw_path(&self, episode_id: &str) -> PathBuf {
        self.output.dir.join(raw_filename(episode_id))
    }

    /// Writes the validated record and returns its path.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError` if the directory cannot be created, the record
    /// cannot be serialized, or the file cannot be written.
    pub async fn write_episode_output(
        &self,
        episode_id: &str,
        record: &EpisodeRecord,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.episode_path(episode_id);
        let json = serde_json::to_string_pretty(record)?;
        write_file(&path, json.as_bytes()).await?;
        debug!(path = %path.display(), "Episode record written");
        Ok(path)
    }

    /// Writes the raw model text and returns its path.
    pub async fn persist_raw(&self, episode_id: &str, raw_text: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.raw_path(episode_id);
        write_file(&path, raw_text.as_bytes()).await?;
        debug!(path = %path.display(), bytes = raw_text.len(), "Raw response written");
        Ok(path)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ArtifactError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
    }
    fs::write(path, contents)
        .await
        .map_err(|source| ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Segment;
    use serde_json::Map;
    use tempfile::TempDir;

    fn store(dir: &Path, pattern: &str) -> ArtifactStore {
        ArtifactStore::new(OutputConfig {
            dir: dir.to_path_buf(),
            filename_pattern: pattern.to_string(),
        })
    }

    fn record() -> EpisodeRecord {
        EpisodeRecord {
            episode_id: "000004".to_string(),
            skill_score: Some(2),
            segments: vec![Segment {
                start_frame: 1,
                end_frame: 3,
                action: "grasp sponge".to_string(),
                visual_state: String::new(),
                memory_context: String::new(),
            }],
            overall_summary: "Wipes the table.".to_string(),
            skill_comment: String::new(),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_write_episode_output_creates_dir() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("nested/out");
        let store = store(&out, "episode_{episode_id}.json");

        let path = store.write_episode_output("000004", &record()).await.unwrap();

        assert_eq!(path, out.join("episode_000004.json"));
        let written: EpisodeRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, record());
    }

    #[tokio::test]
    async fn test_pattern_with_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let store = store(tmp.path(), "labels/{episode_id}.json");

        let path = store.write_episode_output("000004", &record()).await.unwrap();
        assert_eq!(path, tmp.path().join("labels/000004.json"));
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_persist_raw() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp.path().join("out"), "{episode_id}.json");

        let path = store.persist_raw("000009", "not json at all").await.unwrap();

        assert_eq!(path, tmp.path().join("out/episode_000009_raw.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "not json at all");
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = store(&blocker.join("out"), "{episode_id}.json");

        let err = store.persist_raw("000001", "x").await.unwrap_err();
        assert!(matches!(err, ArtifactError::CreateDir { .. }));
    }
}
