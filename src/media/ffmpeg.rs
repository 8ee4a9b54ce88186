//! Video decoding and encoding through the `ffmpeg`/`ffprobe` binaries.
//!
//! Frames cross the process boundary as raw `rgb24` buffers: the reader pipes
//! decoded frames out of `ffmpeg` on stdout, the writer pipes composite frames
//! into an encoding `ffmpeg` on stdin.

use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{FrameSink, FrameSource};
use crate::error::SynthesisError;

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// Stream properties needed to decode and sample a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    /// Native frame rate, if the container reports a usable one.
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Parses an ffprobe rational such as `30000/1001` or `25`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_probe_json(path: &Path, stdout: &[u8]) -> Result<VideoProbe, SynthesisError> {
    let output: ProbeOutput = serde_json::from_slice(stdout).map_err(|e| SynthesisError::Probe {
        path: path.to_path_buf(),
        message: format!("invalid ffprobe JSON: {e}"),
    })?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| SynthesisError::Probe {
            path: path.to_path_buf(),
            message: "no video stream".to_string(),
        })?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(SynthesisError::Probe {
            path: path.to_path_buf(),
            message: "stream has no dimensions".to_string(),
        });
    };
    if width == 0 || height == 0 {
        return Err(SynthesisError::Probe {
            path: path.to_path_buf(),
            message: format!("invalid dimensions {width}x{height}"),
        });
    }
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    Ok(VideoProbe { width, height, fps })
}

/// Reads dimensions and frame rate of the first video stream.
pub fn probe_video(path: &Path) -> Result<VideoProbe, SynthesisError> {
    let output = Command::new(FFPROBE)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| SynthesisError::Spawn {
            program: FFPROBE,
            source,
        })?;

    if !output.status.success() {
        return Err(SynthesisError::Probe {
            path: path.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    parse_probe_json(path, &output.stdout)
}

/// Decodes a video into RGB frames, one `next_frame` call per source frame.
pub struct FfmpegReader {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Child,
    stdout: BufReader<ChildStdout>,
    buffer: Vec<u8>,
}

impl FfmpegReader {
    /// Starts decoding `path`, whose stream was described by `probe`.
    pub fn open(path: &Path, probe: &VideoProbe) -> Result<Self, SynthesisError> {
        let mut child = Command::new(FFMPEG)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SynthesisError::Spawn {
                program: FFMPEG,
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "decoder stdout unavailable"))?;
        let frame_bytes = probe.width as usize * probe.height as usize * 3;

        Ok(Self {
            path: path.to_path_buf(),
            width: probe.width,
            height: probe.height,
            child,
            stdout: BufReader::with_capacity(frame_bytes.max(8192), stdout),
            buffer: vec![0u8; frame_bytes],
        })
    }
}

impl FrameSource for FfmpegReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SynthesisError> {
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => Ok(RgbImage::from_raw(self.width, self.height, self.buffer.clone())),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(path = %self.path.display(), "End of stream");
                Ok(None)
            }
            Err(e) => Err(SynthesisError::Io(e)),
        }
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Encodes RGB frames into an MP4 file at a fixed frame rate.
pub struct FfmpegWriter {
    output: PathBuf,
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    frames_written: u32,
}

impl FfmpegWriter {
    /// Starts an encoder for `width`x`height` frames. Odd dimensions are
    /// padded to even by the encoder.
    pub fn create(output: &Path, width: u32, height: u32, fps: f64) -> Result<Self, SynthesisError> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut child = Command::new(FFMPEG)
            .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(format!("{fps}"))
            .args([
                "-i",
                "pipe:0",
                "-vf",
                "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-c:v",
                "mpeg4",
                "-q:v",
                "3",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SynthesisError::Spawn {
                program: FFMPEG,
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SynthesisError::Encoder("encoder stdin unavailable".to_string()))?;

        Ok(Self {
            output: output.to_path_buf(),
            width,
            height,
            child,
            stdin: Some(BufWriter::new(stdin)),
            frames_written: 0,
        })
    }

    /// Closes the encoder input and waits for the file to be finalized.
    pub fn finish(mut self) -> Result<PathBuf, SynthesisError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        let status = self.child.wait()?;
        if !status.success() {
            return Err(SynthesisError::Encoder(format!(
                "ffmpeg exited with {status} after {} frames while writing {}",
                self.frames_written,
                self.output.display()
            )));
        }
        debug!(
            path = %self.output.display(),
            frames = self.frames_written,
            "Encoder finished"
        );
        Ok(self.output.clone())
    }
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SynthesisError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SynthesisError::Encoder("encoder already finished".to_string()))?;

        if frame.dimensions() == (self.width, self.height) {
            stdin.write_all(frame.as_raw())?;
        } else {
            warn!(
                expected = ?(self.width, self.height),
                got = ?frame.dimensions(),
                "Composite size changed mid-episode, resizing"
            );
            let resized = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            stdin.write_all(resized.as_raw())?;
        }
        self.frames_written += 1;
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            // Dropped without finish(): abandon the partial file.
            self.stdin = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
            let _ = std::fs::remove_file(&self.output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("0/1"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe_json() {
        let json = br#"{"streams":[{"width":640,"height":480,"avg_frame_rate":"0/0","r_frame_rate":"30/1"}]}"#;
        let probe = parse_probe_json(Path::new("a.mp4"), json).unwrap();

        assert_eq!(probe.width, 640);
        assert_eq!(probe.height, 480);
        assert_eq!(probe.fps, Some(30.0));
    }

    #[test]
    fn test_parse_probe_json_no_stream() {
        let err = parse_probe_json(Path::new("a.mp4"), br#"{"streams":[]}"#).unwrap_err();
        assert!(matches!(err, SynthesisError::Probe { .. }));

        let err = parse_probe_json(Path::new("a.mp4"), b"not json").unwrap_err();
        assert!(matches!(err, SynthesisError::Probe { .. }));
    }
}
