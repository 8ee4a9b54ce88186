//! Shared utility functions.

pub mod json_extraction;

pub use json_extraction::{brace_blocks, extract_json_object, find_matching_brace};

use std::any::Any;

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
