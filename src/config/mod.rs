//! Pipeline configuration.
//!
//! The configuration is read from a YAML file into loosely-typed raw structs
//! and then validated into [`PipelineConfig`]. Every validation failure is a
//! [`ConfigError`] and is fatal at startup, before any episode is processed.

pub mod prompt;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub use prompt::{load_prompt_config, PromptConfig};

/// Placeholder that must appear in `output.filename_pattern`.
pub const EPISODE_ID_PLACEHOLDER: &str = "{episode_id}";

/// Width episode ids are zero-padded to.
pub const EPISODE_ID_WIDTH: usize = 6;

const DEFAULT_TARGET_FPS: f64 = 1.0;
const DEFAULT_DEBUG_DIR: &str = "./debug_videos";
const DEFAULT_SCRATCH_DIR: &str = "/dev/shm/vlm_labeler";
const DEFAULT_PROMPT_PATH: &str = "./config/prompt.yaml";
const DEFAULT_NUM_WORKERS: usize = 1;

/// Crop rectangle in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Optional geometric transform for one camera, applied crop -> resize -> rotate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePreprocessingSpec {
    /// Crop rectangle. A zero-area crop is ignored.
    pub crop: Option<CropRect>,
    /// Resize target as (width, height).
    pub resize: Option<(u32, u32)>,
    /// Rotation in degrees, counter-clockwise.
    pub rotate_deg: Option<f64>,
}

impl FramePreprocessingSpec {
    /// Returns true if this spec leaves frames untouched.
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && self.resize.is_none() && self.rotate_deg.is_none()
    }
}

/// Required cameras and their preprocessing.
#[derive(Debug, Clone, Default)]
pub struct CamerasConfig {
    /// Camera identifiers, in stitch order. Never empty after validation.
    pub targets: Vec<String>,
    /// Per-camera preprocessing keyed by camera id.
    pub preprocessing: BTreeMap<String, FramePreprocessingSpec>,
}

impl CamerasConfig {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            preprocessing: BTreeMap::new(),
        }
    }

    pub fn with_preprocessing(
        mut self,
        camera: impl Into<String>,
        spec: FramePreprocessingSpec,
    ) -> Self {
        self.preprocessing.insert(camera.into(), spec);
        self
    }

    /// Preprocessing for a camera, if any.
    pub fn preprocessing_for(&self, camera: &str) -> Option<&FramePreprocessingSpec> {
        self.preprocessing.get(camera)
    }
}

/// Inclusive episode id range. Bounds compare lexicographically on the
/// zero-padded ids; an absent bound is unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeRange {
    pub start_id: Option<String>,
    pub end_id: Option<String>,
}

impl EpisodeRange {
    pub fn new(start_id: Option<&str>, end_id: Option<&str>) -> Self {
        Self {
            start_id: start_id.map(str::to_string),
            end_id: end_id.map(str::to_string),
        }
    }

    pub fn contains(&self, episode_id: &str) -> bool {
        let start_ok = self
            .start_id
            .as_deref()
            .map_or(true, |start| episode_id >= start);
        let end_ok = self.end_id.as_deref().map_or(true, |end| episode_id <= end);
        start_ok && end_ok
    }
}

/// Frame synthesis and worker settings.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Output frame rate of the synthesized video.
    pub target_fps: f64,
    /// Copy each synthesized video to `debug_dir`.
    pub debug_keep_video: bool,
    /// Persistent location for debug copies.
    pub debug_dir: PathBuf,
    /// Fast scratch location for synthesized videos.
    pub scratch_dir: PathBuf,
    /// Number of parallel episode workers.
    pub num_workers: usize,
    /// TrueType font used for the burned-in frame label.
    pub label_font: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            debug_keep_video: false,
            debug_dir: PathBuf::from(DEFAULT_DEBUG_DIR),
            scratch_dir: default_scratch_dir(),
            num_workers: DEFAULT_NUM_WORKERS,
            label_font: None,
        }
    }
}

/// Analysis-service settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub model_name: String,
    /// Override for the API base URL.
    pub api_base: Option<String>,
}

/// Where episode artifacts are written.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// File name pattern; contains [`EPISODE_ID_PLACEHOLDER`].
    pub filename_pattern: String,
}

impl OutputConfig {
    /// File name of the episode JSON artifact.
    pub fn episode_filename(&self, episode_id: &str) -> String {
        self.filename_pattern
            .replace(EPISODE_ID_PLACEHOLDER, episode_id)
    }
}

/// Fully validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dataset_root: PathBuf,
    pub episodes: EpisodeRange,
    pub cameras: CamerasConfig,
    pub processing: ProcessingConfig,
    pub gemini: GeminiConfig,
    pub output: OutputConfig,
    pub prompt_path: PathBuf,
}

impl PipelineConfig {
    /// Loads and validates configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, is empty, is not
    /// valid YAML, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(path.to_path_buf()));
        }
        Self::from_yaml_str(&content).map_err(|err| match err {
            ConfigError::Empty(_) => ConfigError::Empty(path.to_path_buf()),
            other => other,
        })
    }

    /// Parses and validates configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Empty(PathBuf::new()));
        }
        let raw: Option<RawConfig> = serde_yaml::from_str(content)?;
        let raw = raw.ok_or_else(|| ConfigError::Empty(PathBuf::new()))?;
        raw.validate()
    }
}

fn default_scratch_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        PathBuf::from(DEFAULT_SCRATCH_DIR)
    } else {
        std::env::temp_dir().join("vlm_labeler")
    }
}

/// Normalizes an episode id bound from YAML.
///
/// Integers and digit-only strings are zero-padded to [`EPISODE_ID_WIDTH`];
/// any other string is kept verbatim.
pub fn normalize_episode_id(value: &serde_yaml::Value, key: &str) -> Result<Option<String>, ConfigError> {
    match value {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::Number(n) => match n.as_u64() {
            Some(id) => Ok(Some(format!("{:0width$}", id, width = EPISODE_ID_WIDTH))),
            None => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("episode ids must be non-negative integers, got {n}"),
            }),
        },
        serde_yaml::Value::String(s) => {
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                Ok(Some(format!("{:0>width$}", s, width = EPISODE_ID_WIDTH)))
            } else {
                Ok(Some(s.clone()))
            }
        }
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("episode ids must be str or int, got {other:?}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Raw YAML shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    dataset: Option<RawDataset>,
    #[serde(default)]
    episodes: Option<RawEpisodes>,
    cameras: Option<RawCameras>,
    #[serde(default)]
    processing: Option<RawProcessing>,
    gemini: Option<RawGemini>,
    output: Option<RawOutput>,
    prompt_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEpisodes {
    #[serde(default)]
    start_id: serde_yaml::Value,
    #[serde(default)]
    end_id: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct RawCameras {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    preprocessing: BTreeMap<String, RawPreprocessing>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPreprocessing {
    crop: Option<Vec<i64>>,
    resize: Option<Vec<i64>>,
    rotate_deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProcessing {
    target_fps: Option<f64>,
    debug_keep_video: Option<bool>,
    debug_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    num_workers: Option<usize>,
    label_font: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawGemini {
    model_name: Option<String>,
    api_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    dir: Option<PathBuf>,
    filename_pattern: Option<String>,
}

impl RawConfig {
    fn validate(self) -> Result<PipelineConfig, ConfigError> {
        let dataset_root = self
            .dataset
            .and_then(|d| d.root)
            .ok_or_else(|| ConfigError::MissingField("dataset.root".to_string()))?;

        let raw_episodes = self.episodes.unwrap_or_default();
        let episodes = EpisodeRange {
            start_id: normalize_episode_id(&raw_episodes.start_id, "episodes.start_id")?,
            end_id: normalize_episode_id(&raw_episodes.end_id, "episodes.end_id")?,
        };

        let raw_cameras = self
            .cameras
            .ok_or_else(|| ConfigError::MissingField("cameras.targets".to_string()))?;
        if raw_cameras.targets.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "cameras.targets".to_string(),
                message: "must list at least one camera".to_string(),
            });
        }
        let mut preprocessing = BTreeMap::new();
        for (camera, raw) in raw_cameras.preprocessing {
            let spec = raw.validate(&camera)?;
            preprocessing.insert(camera, spec);
        }
        let cameras = CamerasConfig {
            targets: raw_cameras.targets,
            preprocessing,
        };

        let raw_processing = self.processing.unwrap_or_default();
        let defaults = ProcessingConfig::default();
        let target_fps = raw_processing.target_fps.unwrap_or(defaults.target_fps);
        if !(target_fps.is_finite() && target_fps > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "processing.target_fps".to_string(),
                message: format!("must be a positive number, got {target_fps}"),
            });
        }
        let num_workers = raw_processing.num_workers.unwrap_or(defaults.num_workers);
        if num_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.num_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let processing = ProcessingConfig {
            target_fps,
            debug_keep_video: raw_processing
                .debug_keep_video
                .unwrap_or(defaults.debug_keep_video),
            debug_dir: raw_processing.debug_dir.unwrap_or(defaults.debug_dir),
            scratch_dir: raw_processing.scratch_dir.unwrap_or(defaults.scratch_dir),
            num_workers,
            label_font: raw_processing.label_font,
        };

        let raw_gemini = self
            .gemini
            .ok_or_else(|| ConfigError::MissingField("gemini.model_name".to_string()))?;
        let model_name = raw_gemini
            .model_name
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("gemini.model_name".to_string()))?;
        let gemini = GeminiConfig {
            model_name,
            api_base: raw_gemini.api_base,
        };

        let raw_output = self
            .output
            .ok_or_else(|| ConfigError::MissingField("output".to_string()))?;
        let dir = raw_output
            .dir
            .ok_or_else(|| ConfigError::MissingField("output.dir".to_string()))?;
        let filename_pattern = raw_output
            .filename_pattern
            .ok_or_else(|| ConfigError::MissingField("output.filename_pattern".to_string()))?;
        if !filename_pattern.contains(EPISODE_ID_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                key: "output.filename_pattern".to_string(),
                message: format!("must include '{EPISODE_ID_PLACEHOLDER}'"),
            });
        }

        Ok(PipelineConfig {
            dataset_root,
            episodes,
            cameras,
            processing,
            gemini,
            output: OutputConfig {
                dir,
                filename_pattern,
            },
            prompt_path: self
                .prompt_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROMPT_PATH)),
        })
    }
}

impl RawPreprocessing {
    fn validate(self, camera: &str) -> Result<FramePreprocessingSpec, ConfigError> {
        let crop = match self.crop {
            None => None,
            Some(values) => {
                let [x, y, w, h] = <[i64; 4]>::try_from(values).map_err(|v| {
                    ConfigError::InvalidValue {
                        key: format!("cameras.preprocessing.{camera}.crop"),
                        message: format!("expected [x, y, width, height], got {} values", v.len()),
                    }
                })?;
                let clamp = |v: i64| v.clamp(0, i64::from(u32::MAX)) as u32;
                Some(CropRect {
                    x: clamp(x),
                    y: clamp(y),
                    width: clamp(w),
                    height: clamp(h),
                })
            }
        };

        let resize = match self.resize {
            None => None,
            Some(values) => {
                let key = format!("cameras.preprocessing.{camera}.resize");
                let [w, h] = <[i64; 2]>::try_from(values).map_err(|v| ConfigError::InvalidValue {
                    key: key.clone(),
                    message: format!("expected [width, height], got {} values", v.len()),
                })?;
                if w <= 0 || h <= 0 || w > i64::from(u32::MAX) || h > i64::from(u32::MAX) {
                    return Err(ConfigError::InvalidValue {
                        key,
                        message: format!("dimensions must be positive, got [{w}, {h}]"),
                    });
                }
                Some((w as u32, h as u32))
            }
        };

        Ok(FramePreprocessingSpec {
            crop,
            resize,
            rotate_deg: self.rotate_deg,
        })
    }
}
