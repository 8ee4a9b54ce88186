//! Prompt composition for episode analysis.

use crate::config::PromptConfig;

/// Fixed labeling instructions sent with every episode.
pub const RULE_PROMPT: &str = r#"SYSTEM: You are a robotics perception expert specializing in fine-grained manipulation analysis.
TASK: Analyze this video and produce a structured action log with memory awareness and an assessment of task quality.

TIMING RULES:
- Ignore the video player's duration and time bar.
- The only valid time reference is the burned-in text "Frame: X" at the bottom of each frame.
- Use those integers directly for `start_frame` and `end_frame`.

SEGMENTATION:
- Split the episode into primitive actions such as approach, grasp, in-hand manipulation, place, retreat and failure sequences.
- Describe failures explicitly: drops, missed grasps, getting stuck, long idle pauses, human intervention.

MEMORY & CONTEXT:
- Track object permanence. When an object is placed inside a container or becomes occluded, state where it is (for example "The red block is inside the closed top drawer.").
- Keep a short rolling memory: describe recent actions in detail and summarize older actions that no longer matter.

TASK QUALITY ASSESSMENT:
- Assign a `skill_score` from 1 to 3 for the whole episode:
  - 3: Excellent. Succeeds on the first attempt along a direct path with no noticeable collisions or stalls.
  - 2: Recovered. Succeeds but needs retries or recovery, or is visibly inefficient.
  - 1: Failure. Task not completed, or unsafe behavior such as unrecovered drops, major collisions or human intervention.
- Give a short `skill_comment` explaining the score.

OUTPUT FORMAT:
- Return strictly valid JSON following the schema below. Do NOT wrap it in Markdown code fences and do not add commentary."#;

/// Expected response schema and constraints.
pub const SCHEMA_PROMPT: &str = r#"Expected JSON schema:
{
  "overall_summary": "Short natural language summary of the entire episode.",
  "skill_score": 1,
  "skill_comment": "Why this score was chosen.",
  "segments": [
    {
      "start_frame": 12,
      "end_frame": 20,
      "action": "What the robot does and to which object.",
      "visual_state": "What is visibly present.",
      "memory_context": "What must be inferred from earlier events (object permanence)."
    }
  ]
}
Rules:
- `skill_score` must be an integer between 1 and 3.
- `start_frame` and `end_frame` must be integers read from the burned-in frame index.
- Ensure 1 <= start_frame <= end_frame.
- Prefer non-empty segments; include failures and idle periods as explicit segments."#;

/// Header introducing the dataset-specific context.
const DATASET_CONTEXT_HEADER: &str = "DATASET CONTEXT:";

/// Composes the full prompt for one episode.
///
/// Parts are trimmed, empty parts dropped, and the rest joined by a blank
/// line. When `max_frame_count` is known and non-zero, the schema block ends
/// with the highest valid frame index.
pub fn build_prompt(prompt: &PromptConfig, max_frame_count: Option<u32>) -> String {
    let schema = match max_frame_count.filter(|&n| n > 0) {
        Some(n) => format!("{SCHEMA_PROMPT}\nMax valid frame index for this episode: {n}."),
        None => SCHEMA_PROMPT.to_string(),
    };

    let parts = [
        RULE_PROMPT,
        prompt.base_system_prompt.as_str(),
        DATASET_CONTEXT_HEADER,
        prompt.dataset_specific_context.as_str(),
        schema.as_str(),
    ];

    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
