//! Model-response validation and repair.
//!
//! Turns arbitrary response text into an [`EpisodeRecord`] whose segments
//! respect the episode's synthesized frame range, together with the
//! warnings and errors produced along the way.

pub mod record;
pub mod repair;

pub use record::{coerce_int, coerce_text, EpisodeRecord, Segment, MAX_SKILL_SCORE, MIN_SKILL_SCORE};
pub use repair::{parse_model_response, validate_episode_payload, ParsedEpisode, RepairReport};
