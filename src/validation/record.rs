//! Labeled episode record types and value coercion.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lowest valid skill score.
pub const MIN_SKILL_SCORE: i64 = 1;

/// Highest valid skill score.
pub const MAX_SKILL_SCORE: i64 = 3;

/// One labeled action interval. Frame indices are 1-based and inclusive,
/// referring to the burned-in `Frame: N` labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_frame: i64,
    pub end_frame: i64,
    /// What the robot does during the interval.
    #[serde(default)]
    pub action: String,
    /// Scene state visible during the interval.
    #[serde(default)]
    pub visual_state: String,
    /// Context carried over from earlier segments.
    #[serde(default)]
    pub memory_context: String,
}

/// Validated labeling output for one episode.
///
/// Top-level keys the model returned beyond the known fields are kept in
/// `extra` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode_id: String,
    /// Skill rating in `1..=3`, or null when missing or invalid.
    pub skill_score: Option<i64>,
    pub segments: Vec<Segment>,
    pub overall_summary: String,
    pub skill_comment: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EpisodeRecord {
    /// Highest frame index referenced by any segment.
    pub fn last_frame(&self) -> Option<i64> {
        self.segments.iter().map(|s| s.end_frame.max(s.start_frame)).max()
    }
}

/// Coerces a JSON value to an integer.
///
/// Accepts integers, finite floats (truncated toward zero) and strings that
/// parse as an integer after trimming. Everything else, including booleans
/// and null, is rejected.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            let f = n.as_f64()?;
            let truncated = f.trunc();
            (f.is_finite() && truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64)
                .then_some(truncated as i64)
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Coerces a JSON value to free text. Missing and null become empty.
pub fn coerce_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
