//! Frame synthesis: one downsampled, stitched, frame-labeled video per episode.
//!
//! All cameras of an episode are read in lockstep. Every `stride`-th tick the
//! camera frames are preprocessed, normalized to a common height, stitched
//! left to right and labeled `Frame: N`, where N counts synthesized frames
//! starting at 1. That label is the only timing reference the analysis model
//! is told to trust, so N must match the frame count reported in
//! [`EpisodeMedia`].

pub mod ffmpeg;
pub mod transform;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CamerasConfig, PipelineConfig, ProcessingConfig};
use crate::discovery::{camera_video_path, EpisodeKey};
use crate::error::SynthesisError;

use ffmpeg::{probe_video, FfmpegReader, FfmpegWriter};
use transform::{hstack, normalize_heights, preprocess_frame, FrameLabeler};

/// Result of synthesizing one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMedia {
    pub chunk_id: String,
    pub episode_id: String,
    /// Synthesized video, usually in scratch storage.
    pub video_path: PathBuf,
    /// Number of synthesized frames; the highest valid `Frame: N` label.
    pub frame_count: u32,
}

impl EpisodeMedia {
    /// Removes the scratch video. A file that is already gone is not an error.
    pub fn discard(&self) {
        match std::fs::remove_file(&self.video_path) {
            Ok(()) => debug!(path = %self.video_path.display(), "Removed scratch video"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.video_path.display(), error = %e, "Failed to remove scratch video"),
        }
    }
}

/// A camera stream yielding frames in order.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SynthesisError>;
}

/// Destination for synthesized frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SynthesisError>;
}

/// Produces the synthesized video for an episode.
///
/// Returns `None` on any structural failure (missing or unreadable camera
/// video, no frames). Failures are logged, never propagated.
pub trait FrameSynthesizer: Send + Sync {
    fn synthesize(&self, key: &EpisodeKey) -> Option<EpisodeMedia>;
}

/// Source-frame sampling stride: `max(1, floor(native / target))`.
///
/// Non-integer ratios drift (29.97 fps sampled at 1 fps keeps every 29th
/// frame); this is accepted. An unknown native rate counts as 1 fps.
pub fn sampling_stride(native_fps: Option<f64>, target_fps: f64) -> u32 {
    let native = native_fps.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(1.0);
    if !(target_fps.is_finite() && target_fps > 0.0) {
        return 1;
    }
    let ratio = (native / target_fps).floor();
    if ratio < 1.0 {
        1
    } else {
        ratio.min(f64::from(u32::MAX)) as u32
    }
}

/// Counters from one lockstep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthesisStats {
    /// Lockstep ticks read from every camera.
    pub ticks_read: u64,
    /// Composite frames written.
    pub frames_written: u32,
}

/// Runs the lockstep sampling loop.
///
/// `sources` are in stitch order, paired with their camera id. The sink is
/// opened through `open_sink` with the first composite's dimensions, so a
/// run that produces no composite never opens one. `annotate` receives each
/// composite and its 1-based synthesized index before it is written.
pub fn synthesize_frames<S, K, F, A>(
    sources: &mut [(String, S)],
    cameras: &CamerasConfig,
    stride: u32,
    mut open_sink: F,
    annotate: A,
) -> Result<(Option<K>, SynthesisStats), SynthesisError>
where
    S: FrameSource,
    K: FrameSink,
    F: FnMut(u32, u32) -> Result<K, SynthesisError>,
    A: Fn(&mut RgbImage, u32),
{
    let stride = u64::from(stride.max(1));
    let mut sink: Option<K> = None;
    let mut stats = SynthesisStats::default();

    if sources.is_empty() {
        return Ok((sink, stats));
    }

    loop {
        let mut frames = Vec::with_capacity(sources.len());
        let mut exhausted = false;
        for (_, source) in sources.iter_mut() {
            match source.next_frame()? {
                Some(frame) => frames.push(frame),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        if exhausted {
            break;
        }

        let position = stats.ticks_read;
        stats.ticks_read += 1;
        if position % stride != 0 {
            continue;
        }

        let processed: Vec<RgbImage> = frames
            .into_iter()
            .zip(sources.iter())
            .map(|(frame, (camera, _))| preprocess_frame(frame, cameras.preprocessing_for(camera)))
            .collect();
        let mut composite = hstack(&normalize_heights(processed));

        let index = stats.frames_written + 1;
        annotate(&mut composite, index);

        if sink.is_none() {
            let (width, height) = composite.dimensions();
            sink = Some(open_sink(width, height)?);
        }
        if let Some(sink) = sink.as_mut() {
            sink.write_frame(&composite)?;
        }
        stats.frames_written = index;
    }

    Ok((sink, stats))
}

/// Synthesizer backed by the `ffmpeg` binaries.
pub struct FfmpegSynthesizer {
    dataset_root: PathBuf,
    cameras: CamerasConfig,
    processing: ProcessingConfig,
    labeler: Arc<FrameLabeler>,
}

impl FfmpegSynthesizer {
    pub fn new(
        dataset_root: impl Into<PathBuf>,
        cameras: CamerasConfig,
        processing: ProcessingConfig,
        labeler: Arc<FrameLabeler>,
    ) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            cameras,
            processing,
            labeler,
        }
    }

    pub fn from_config(config: &PipelineConfig, labeler: Arc<FrameLabeler>) -> Self {
        Self::new(
            config.dataset_root.clone(),
            config.cameras.clone(),
            config.processing.clone(),
            labeler,
        )
    }

    /// Scratch location of the synthesized video for an episode.
    pub fn scratch_path(&self, key: &EpisodeKey) -> PathBuf {
        self.processing
            .scratch_dir
            .join(&key.chunk_id)
            .join(format!("episode_{}.mp4", key.episode_id))
    }

    /// Synthesizes an episode, reporting why it failed.
    pub fn try_synthesize(&self, key: &EpisodeKey) -> Result<EpisodeMedia, SynthesisError> {
        let mut paths = Vec::with_capacity(self.cameras.targets.len());
        for camera in &self.cameras.targets {
            let path = camera_video_path(&self.dataset_root, &key.chunk_id, camera, &key.episode_id);
            if !path.is_file() {
                return Err(SynthesisError::MissingVideo {
                    camera: camera.clone(),
                    path,
                });
            }
            paths.push((camera.clone(), path));
        }

        let mut sources = Vec::with_capacity(paths.len());
        let mut native_fps = None;
        for (index, (camera, path)) in paths.iter().enumerate() {
            let with_camera = |e: SynthesisError| unopenable(camera, path, e);
            let probe = probe_video(path).map_err(with_camera)?;
            if index == 0 {
                native_fps = probe.fps;
            }
            let reader = FfmpegReader::open(path, &probe).map_err(with_camera)?;
            sources.push((camera.clone(), reader));
        }

        let stride = sampling_stride(native_fps, self.processing.target_fps);
        let output_path = self.scratch_path(key);
        debug!(
            episode_id = %key.episode_id,
            native_fps = ?native_fps,
            target_fps = self.processing.target_fps,
            stride,
            "Sampling episode"
        );

        let target_fps = self.processing.target_fps;
        let (writer, stats) = synthesize_frames(
            &mut sources,
            &self.cameras,
            stride,
            |width, height| FfmpegWriter::create(&output_path, width, height, target_fps),
            |frame, index| self.labeler.burn(frame, index),
        )?;
        drop(sources);

        let Some(writer) = writer else {
            return Err(SynthesisError::NoFrames(key.episode_id.clone()));
        };
        let video_path = writer.finish()?;

        if self.processing.debug_keep_video {
            self.keep_debug_copy(&video_path, &key.episode_id);
        }

        info!(
            chunk_id = %key.chunk_id,
            episode_id = %key.episode_id,
            frames = stats.frames_written,
            source_ticks = stats.ticks_read,
            "Episode video synthesized"
        );

        Ok(EpisodeMedia {
            chunk_id: key.chunk_id.clone(),
            episode_id: key.episode_id.clone(),
            video_path,
            frame_count: stats.frames_written,
        })
    }

    fn keep_debug_copy(&self, video_path: &Path, episode_id: &str) {
        let debug_dir = &self.processing.debug_dir;
        let debug_path = debug_dir.join(format!("episode_{episode_id}.mp4"));
        let result = std::fs::create_dir_all(debug_dir)
            .and_then(|_| std::fs::copy(video_path, &debug_path));
        match result {
            Ok(_) => debug!(path = %debug_path.display(), "Copied debug video"),
            Err(e) => warn!(path = %debug_path.display(), error = %e, "Failed to copy debug video"),
        }
    }
}

impl FrameSynthesizer for FfmpegSynthesizer {
    fn synthesize(&self, key: &EpisodeKey) -> Option<EpisodeMedia> {
        match self.try_synthesize(key) {
            Ok(media) => Some(media),
            Err(e) => {
                warn!(
                    chunk_id = %key.chunk_id,
                    episode_id = %key.episode_id,
                    error = %e,
                    "Frame synthesis failed"
                );
                None
            }
        }
    }
}

/// Attaches the camera to a probe or decoder failure. Probe errors already
/// name the path, so only their message is kept.
fn unopenable(camera: &str, path: &Path, err: SynthesisError) -> SynthesisError {
    let reason = match err {
        SynthesisError::Probe { message, .. } => message,
        SynthesisError::Unopenable { reason, .. } => reason,
        other => other.to_string(),
    };
    SynthesisError::Unopenable {
        camera: camera.to_string(),
        path: path.to_path_buf(),
        reason,
    }
}
