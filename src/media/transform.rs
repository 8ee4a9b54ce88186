//! Per-frame geometry: camera preprocessing, height normalization, stitching
//! and the burned-in frame label.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;
use tracing::debug;

use crate::config::FramePreprocessingSpec;
use crate::error::ConfigError;

/// Height of the black band the label is drawn on.
pub const LABEL_BAND_HEIGHT: u32 = 40;

const LABEL_FONT_PX: f32 = 28.0;
const LABEL_MARGIN_X: i32 = 10;
const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BAND_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Label font compiled into the binary: DejaVu Sans Mono, under the Bitstream
/// Vera license shipped next to it in `assets/fonts/`.
const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono.ttf");
const EMBEDDED_FONT_NAME: &str = "embedded DejaVu Sans Mono";

/// Applies one camera's spec to a frame: crop, then resize, then rotate.
pub fn preprocess_frame(frame: RgbImage, spec: Option<&FramePreprocessingSpec>) -> RgbImage {
    let Some(spec) = spec.filter(|s| !s.is_identity()) else {
        return frame;
    };

    let mut processed = frame;

    if let Some(crop) = spec.crop {
        let (fw, fh) = processed.dimensions();
        let x = crop.x.min(fw);
        let y = crop.y.min(fh);
        let w = crop.width.min(fw - x);
        let h = crop.height.min(fh - y);
        if w > 0 && h > 0 {
            processed = imageops::crop_imm(&processed, x, y, w, h).to_image();
        } else {
            debug!(?crop, width = fw, height = fh, "Crop outside frame, ignored");
        }
    }

    if let Some((width, height)) = spec.resize {
        if processed.dimensions() != (width, height) {
            processed = imageops::resize(&processed, width, height, FilterType::Triangle);
        }
    }

    if let Some(degrees) = spec.rotate_deg {
        processed = rotate(processed, degrees);
    }

    processed
}

/// Rotates counter-clockwise. Quarter turns are exact and swap dimensions;
/// other angles rotate about the centre and keep the frame size.
pub fn rotate(frame: RgbImage, degrees: f64) -> RgbImage {
    let normalized = degrees.rem_euclid(360.0);
    let quarter = normalized / 90.0;
    if (quarter - quarter.round()).abs() < 1e-9 {
        return match quarter.round() as u32 % 4 {
            0 => frame,
            1 => imageops::rotate270(&frame),
            2 => imageops::rotate180(&frame),
            _ => imageops::rotate90(&frame),
        };
    }
    let theta = -(normalized.to_radians() as f32);
    rotate_about_center(&frame, theta, Interpolation::Bilinear, BAND_COLOR)
}

/// Scales every frame to the first frame's height, preserving aspect ratio.
pub fn normalize_heights(frames: Vec<RgbImage>) -> Vec<RgbImage> {
    let Some(target_height) = frames.first().map(RgbImage::height) else {
        return frames;
    };

    frames
        .into_iter()
        .map(|frame| {
            let (w, h) = frame.dimensions();
            if h == target_height || h == 0 {
                return frame;
            }
            let scale = f64::from(target_height) / f64::from(h);
            let new_width = ((f64::from(w) * scale) as u32).max(1);
            imageops::resize(&frame, new_width, target_height, FilterType::Triangle)
        })
        .collect()
}

/// Concatenates equal-height frames left to right.
pub fn hstack(frames: &[RgbImage]) -> RgbImage {
    let height = frames.iter().map(RgbImage::height).max().unwrap_or(0);
    let width = frames.iter().map(RgbImage::width).sum();
    let mut out = RgbImage::new(width, height);
    let mut x = 0i64;
    for frame in frames {
        imageops::replace(&mut out, frame, x, 0);
        x += i64::from(frame.width());
    }
    out
}

/// Text of the burned-in label for a 1-based synthesized frame index.
pub fn frame_label(frame_index: u32) -> String {
    format!("Frame: {frame_index}")
}

/// Draws the `Frame: N` label onto synthesized frames.
pub struct FrameLabeler {
    font: FontArc,
    scale: PxScale,
    source: String,
}

impl std::fmt::Debug for FrameLabeler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLabeler")
            .field("source", &self.source)
            .field("scale", &self.scale)
            .finish()
    }
}

impl FrameLabeler {
    /// Loads a TrueType font from `path`.
    pub fn from_font_path(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| ConfigError::InvalidValue {
            key: "processing.label_font".to_string(),
            message: format!("{}: {e}", path.display()),
        })?;
        Ok(Self::with_font(font, path.display().to_string()))
    }

    /// Uses the font compiled into the binary.
    pub fn embedded() -> Result<Self, ConfigError> {
        let font = FontArc::try_from_slice(EMBEDDED_FONT).map_err(|e| ConfigError::InvalidValue {
            key: "processing.label_font".to_string(),
            message: format!("{EMBEDDED_FONT_NAME}: {e}"),
        })?;
        Ok(Self::with_font(font, EMBEDDED_FONT_NAME.to_string()))
    }

    /// Uses the configured font if given, otherwise the embedded one.
    pub fn load(configured: Option<&Path>) -> Result<Self, ConfigError> {
        match configured {
            Some(path) => Self::from_font_path(path),
            None => Self::embedded(),
        }
    }

    fn with_font(font: FontArc, source: String) -> Self {
        Self {
            font,
            scale: PxScale::from(LABEL_FONT_PX),
            source,
        }
    }

    /// Where the font came from, for logging.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Paints the bottom band black and writes `Frame: {frame_index}` in green.
    pub fn burn(&self, frame: &mut RgbImage, frame_index: u32) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let band = LABEL_BAND_HEIGHT.min(height);
        let top = (height - band) as i32;
        draw_filled_rect_mut(frame, Rect::at(0, top).of_size(width, band), BAND_COLOR);

        let text_y = top + ((band as f32 - LABEL_FONT_PX).max(0.0) / 2.0) as i32;
        draw_text_mut(
            frame,
            LABEL_COLOR,
            LABEL_MARGIN_X,
            text_y,
            self.scale,
            &self.font,
            &frame_label(frame_index),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CropRect;

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn test_no_spec_is_identity() {
        let frame = solid(8, 4, 7);
        let out = preprocess_frame(frame.clone(), None);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_empty_spec_is_identity() {
        let spec = FramePreprocessingSpec::default();
        assert!(spec.is_identity());

        let frame = solid(8, 4, 7);
        assert_eq!(preprocess_frame(frame.clone(), Some(&spec)), frame);

        let spec = FramePreprocessingSpec {
            rotate_deg: Some(90.0),
            ..Default::default()
        };
        assert!(!spec.is_identity());
        assert_eq!(preprocess_frame(frame, Some(&spec)).dimensions(), (4, 8));
    }

    #[test]
    fn test_crop_then_resize() {
        let spec = FramePreprocessingSpec {
            crop: Some(CropRect {
                x: 2,
                y: 1,
                width: 4,
                height: 2,
            }),
            resize: Some((8, 4)),
            rotate_deg: None,
        };
        let out = preprocess_frame(solid(10, 10, 3), Some(&spec));
        assert_eq!(out.dimensions(), (8, 4));
    }

    #[test]
    fn test_crop_clamped_to_frame() {
        let spec = FramePreprocessingSpec {
            crop: Some(CropRect {
                x: 6,
                y: 0,
                width: 100,
                height: 100,
            }),
            ..Default::default()
        };
        let out = preprocess_frame(solid(10, 5, 3), Some(&spec));
        assert_eq!(out.dimensions(), (4, 5));
    }

    #[test]
    fn test_zero_area_crop_ignored() {
        let spec = FramePreprocessingSpec {
            crop: Some(CropRect {
                x: 0,
                y: 0,
                width: 0,
                height: 5,
            }),
            ..Default::default()
        };
        let out = preprocess_frame(solid(10, 5, 3), Some(&spec));
        assert_eq!(out.dimensions(), (10, 5));
    }

    #[test]
    fn test_rotate_quarter_turns() {
        let mut frame = solid(4, 2, 0);
        frame.put_pixel(3, 0, Rgb([255, 0, 0]));

        // Counter-clockwise 90: top-right corner moves to top-left.
        let ccw = rotate(frame.clone(), 90.0);
        assert_eq!(ccw.dimensions(), (2, 4));
        assert_eq!(*ccw.get_pixel(0, 0), Rgb([255, 0, 0]));

        let half = rotate(frame.clone(), 180.0);
        assert_eq!(half.dimensions(), (4, 2));
        assert_eq!(*half.get_pixel(0, 1), Rgb([255, 0, 0]));

        let cw = rotate(frame.clone(), -90.0);
        assert_eq!(cw.dimensions(), (2, 4));
        assert_eq!(*cw.get_pixel(1, 3), Rgb([255, 0, 0]));

        assert_eq!(rotate(frame.clone(), 360.0), frame);
    }

    #[test]
    fn test_rotate_arbitrary_keeps_size() {
        let out = rotate(solid(20, 10, 200), 30.0);
        assert_eq!(out.dimensions(), (20, 10));
    }

    #[test]
    fn test_normalize_heights_preserves_aspect() {
        let frames = vec![solid(40, 30, 1), solid(20, 60, 2), solid(10, 30, 3)];
        let out = normalize_heights(frames);

        assert_eq!(out[0].dimensions(), (40, 30));
        assert_eq!(out[1].dimensions(), (10, 30));
        assert_eq!(out[2].dimensions(), (10, 30));
    }

    #[test]
    fn test_hstack_places_frames_side_by_side() {
        let out = hstack(&[solid(3, 2, 10), solid(5, 2, 20)]);

        assert_eq!(out.dimensions(), (8, 2));
        assert_eq!(*out.get_pixel(0, 0), Rgb([10, 10, 10]));
        assert_eq!(*out.get_pixel(2, 1), Rgb([10, 10, 10]));
        assert_eq!(*out.get_pixel(3, 0), Rgb([20, 20, 20]));
        assert_eq!(*out.get_pixel(7, 1), Rgb([20, 20, 20]));
    }

    #[test]
    fn test_frame_label_text() {
        assert_eq!(frame_label(1), "Frame: 1");
        assert_eq!(frame_label(120), "Frame: 120");
    }

    #[test]
    fn test_burn_draws_band_and_text() {
        let labeler = FrameLabeler::load(None).unwrap();
        assert_eq!(labeler.source(), EMBEDDED_FONT_NAME);
        let mut frame = solid(200, 100, 255);
        labeler.burn(&mut frame, 1);

        // Above the band is untouched.
        assert_eq!(*frame.get_pixel(100, 10), Rgb([255, 255, 255]));
        // Band corner is black.
        assert_eq!(*frame.get_pixel(199, 99), Rgb([0, 0, 0]));
        // Some green text pixels landed inside the band.
        let green = (0..200u32)
            .flat_map(|x| (60..100u32).map(move |y| (x, y)))
            .filter(|&(x, y)| frame.get_pixel(x, y).0[1] > 128 && frame.get_pixel(x, y).0[0] < 64)
            .count();
        assert!(green > 0);
    }

    #[test]
    fn test_missing_font_path_is_config_error() {
        let err = FrameLabeler::load(Some(Path::new("/nonexistent/font.ttf"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_configured_font_path_is_loaded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("label.ttf");
        std::fs::write(&path, EMBEDDED_FONT).unwrap();

        let labeler = FrameLabeler::load(Some(&path)).unwrap();
        assert_eq!(labeler.source(), path.display().to_string());

        std::fs::write(&path, b"not a font").unwrap();
        let err = FrameLabeler::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "processing.label_font"));
    }
}
