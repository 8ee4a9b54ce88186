//! JSON object extraction from model responses.
//!
//! Model output often wraps the payload in conversational text or markdown
//! fences. Extraction first tries the whole response as JSON and otherwise
//! scans for brace-delimited blocks, keeping the longest one.
//!
//! # Example
//!
//! ```
//! use vlm_labeler::utils::json_extraction::extract_json_object;
//!
//! let response = "Here is the result: {\"a\":1} done";
//! assert_eq!(extract_json_object(response).as_deref(), Some("{\"a\":1}"));
//! ```

/// Finds the index of the brace closing the object that opens at the start
/// of `s`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
///
/// # Arguments
///
/// * `s` - A string starting with '{'
///
/// # Returns
///
/// The byte index of the matching '}', or `None` if the object never closes.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Collects every top-level balanced `{...}` block in `content`, in order.
pub fn brace_blocks(content: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while let Some(rel_start) = content[offset..].find('{') {
        let start = offset + rel_start;
        match find_matching_brace(&content[start..]) {
            Some(rel_end) => {
                let end = start + rel_end + 1;
                blocks.push(&content[start..end]);
                offset = end;
            }
            None => {
                // Unclosed here; a later brace may still open a complete block.
                offset = start + 1;
            }
        }
    }

    blocks
}

/// Extracts the JSON text to parse from a model response.
///
/// Returns the whole response if it already parses as JSON (of any type).
/// Otherwise returns the longest balanced `{...}` block; the first of equal
/// length wins. When no block is balanced, the span from the first `{` to
/// the last `}` is returned so the caller reports a parse error rather than
/// a missing object.
pub fn extract_json_object(content: &str) -> Option<String> {
    if serde_json::from_str::<serde_json::Value>(content).is_ok() {
        return Some(content.to_string());
    }

    let longest = brace_blocks(content)
        .into_iter()
        .fold(None::<&str>, |best, block| match best {
            Some(b) if b.len() >= block.len() => Some(b),
            _ => Some(block),
        });
    if let Some(block) = longest {
        return Some(block.to_string());
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| content[start..=end].to_string())
}
