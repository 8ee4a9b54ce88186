//! Tolerant repair of model output into an [`EpisodeRecord`].
//!
//! Out-of-range or malformed fields are repaired and reported as warnings
//! rather than rejected. Only a response with no parsable JSON object, or a
//! top-level value that is not an object, yields no record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::record::{coerce_int, coerce_text, EpisodeRecord, Segment, MAX_SKILL_SCORE, MIN_SKILL_SCORE};
use crate::utils::json_extraction::extract_json_object;

/// Keys of [`EpisodeRecord`] that are rebuilt rather than copied through.
const KNOWN_KEYS: &[&str] = &[
    "episode_id",
    "skill_score",
    "segments",
    "overall_summary",
    "skill_comment",
];

static NULL: Value = Value::Null;

/// Result of parsing one raw model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEpisode {
    pub episode: Option<EpisodeRecord>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub raw_text: String,
}

impl ParsedEpisode {
    pub fn is_ok(&self) -> bool {
        self.episode.is_some()
    }
}

/// Result of repairing an already-parsed payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairReport {
    pub record: Option<EpisodeRecord>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Extracts, parses and repairs a raw model response.
///
/// # Arguments
///
/// * `episode_id` - Id written into the record, overriding any in the payload
/// * `max_frame` - Synthesized frame count; upper bound for segment frames
/// * `raw_text` - Response text exactly as returned by the model
pub fn parse_model_response(episode_id: &str, max_frame: u32, raw_text: &str) -> ParsedEpisode {
    let mut parsed = ParsedEpisode {
        episode: None,
        warnings: Vec::new(),
        errors: Vec::new(),
        raw_text: raw_text.to_string(),
    };

    let Some(block) = extract_json_object(raw_text) else {
        parsed
            .errors
            .push("No JSON object found in model response.".to_string());
        return parsed;
    };

    let payload: Value = match serde_json::from_str(&block) {
        Ok(value) => value,
        Err(e) => {
            parsed.errors.push(format!("Failed to parse JSON: {e}"));
            return parsed;
        }
    };

    let report = validate_episode_payload(episode_id, max_frame, &payload);
    parsed.episode = report.record;
    parsed.warnings.extend(report.warnings);
    parsed.errors.extend(report.errors);
    parsed
}

/// Repairs a parsed payload against the episode's frame bound.
pub fn validate_episode_payload(episode_id: &str, max_frame: u32, payload: &Value) -> RepairReport {
    let mut report = RepairReport::default();

    let Value::Object(object) = payload else {
        report
            .errors
            .push("Payload is not a JSON object.".to_string());
        return report;
    };

    let skill_score = repair_skill_score(object.get("skill_score"), &mut report.warnings);

    let segments = match object.get("segments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => repair_segments(items, i64::from(max_frame), &mut report.warnings),
        Some(_) => {
            report
                .warnings
                .push("segments is not a list; replacing with empty list.".to_string());
            Vec::new()
        }
    };
    if segments.is_empty() {
        report
            .warnings
            .push("No valid segments found after validation.".to_string());
    }

    let overall_summary = coerce_text(object.get("overall_summary"));
    if overall_summary.is_empty() {
        report
            .warnings
            .push("overall_summary missing; inserting empty string.".to_string());
    }

    let extra: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    report.record = Some(EpisodeRecord {
        episode_id: episode_id.to_string(),
        skill_score,
        segments,
        overall_summary,
        skill_comment: coerce_text(object.get("skill_comment")),
        extra,
    });
    debug!(
        episode_id,
        warnings = report.warnings.len(),
        "Payload repaired"
    );
    report
}

fn repair_skill_score(value: Option<&Value>, warnings: &mut Vec<String>) -> Option<i64> {
    let value = value.unwrap_or(&NULL);
    if value.is_null() {
        warnings.push("skill_score missing; setting to null.".to_string());
        return None;
    }
    match coerce_int(value) {
        Some(score) if (MIN_SKILL_SCORE..=MAX_SKILL_SCORE).contains(&score) => Some(score),
        Some(score) => {
            warnings.push(format!(
                "skill_score {score} out of range {MIN_SKILL_SCORE}-{MAX_SKILL_SCORE}; setting to null."
            ));
            None
        }
        None => {
            warnings.push(format!(
                "skill_score is not an integer: {value}; setting to null."
            ));
            None
        }
    }
}

/// Repairs segments in input order.
///
/// A running cursor, starting at 1, holds the previous segment's end. Each
/// segment's start is raised to the cursor, which can leave a segment with
/// `start_frame > end_frame`; ordering takes priority and that result is
/// kept as is.
fn repair_segments(items: &[Value], max_frame: i64, warnings: &mut Vec<String>) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(items.len());
    let mut prev_end: i64 = 1;

    for (index, item) in items.iter().enumerate() {
        let Value::Object(fields) = item else {
            warnings.push(format!("Skipping segment {index}: not a JSON object."));
            continue;
        };

        let raw_start = fields.get("start_frame").unwrap_or(&NULL);
        let raw_end = fields.get("end_frame").unwrap_or(&NULL);
        let (Some(mut start), Some(mut end)) = (coerce_int(raw_start), coerce_int(raw_end)) else {
            warnings.push(format!(
                "Skipping segment {index} with invalid frame indices (start_frame={raw_start}, end_frame={raw_end})."
            ));
            continue;
        };

        if start < 1 {
            warnings.push(format!("start_frame clipped to 1 from {start}"));
            start = 1;
        }
        if end < start {
            warnings.push(format!(
                "end_frame raised to start_frame for segment ({start}, {end})."
            ));
            end = start;
        }
        if end > max_frame {
            warnings.push(format!("end_frame clipped to {max_frame} from {end}"));
            end = max_frame;
        }
        if start < prev_end {
            warnings.push(format!(
                "start_frame raised to maintain monotonic order ({start} -> {prev_end})."
            ));
            start = prev_end;
        }

        segments.push(Segment {
            start_frame: start,
            end_frame: end,
            action: coerce_text(fields.get("action")),
            visual_state: coerce_text(fields.get("visual_state")),
            memory_context: coerce_text(fields.get("memory_context")),
        });
        prev_end = end;
    }

    segments
}
