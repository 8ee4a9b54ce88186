//! Prompt resource loading.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Free-text system context supplied alongside the built-in labeling rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptConfig {
    pub base_system_prompt: String,
    pub dataset_specific_context: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPrompt {
    #[serde(default)]
    base_system_prompt: Option<String>,
    #[serde(default)]
    dataset_specific_context: Option<String>,
}

/// Loads the prompt YAML at `path`. Both keys are optional and trimmed.
///
/// # Errors
///
/// Returns `ConfigError::PromptNotFound` if the file does not exist, or a
/// read/YAML error if it cannot be parsed.
pub fn load_prompt_config(path: &Path) -> Result<PromptConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::PromptNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_prompt_config(&content)
}

/// Parses prompt YAML text. An empty document yields empty prompts.
pub fn parse_prompt_config(content: &str) -> Result<PromptConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(PromptConfig::default());
    }
    let raw: Option<RawPrompt> = serde_yaml::from_str(content)?;
    let raw = raw.unwrap_or_default();
    Ok(PromptConfig {
        base_system_prompt: raw.base_system_prompt.unwrap_or_default().trim().to_string(),
        dataset_specific_context: raw
            .dataset_specific_context
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_trims() {
        let yaml = "base_system_prompt: |\n  Be precise.\n\ndataset_specific_context: \"  Two-arm kitchen rig.  \"\n";
        let prompt = parse_prompt_config(yaml).unwrap();

        assert_eq!(prompt.base_system_prompt, "Be precise.");
        assert_eq!(prompt.dataset_specific_context, "Two-arm kitchen rig.");
    }

    #[test]
    fn test_parse_prompt_missing_keys() {
        let prompt = parse_prompt_config("base_system_prompt: hi\n").unwrap();
        assert_eq!(prompt.base_system_prompt, "hi");
        assert!(prompt.dataset_specific_context.is_empty());

        assert_eq!(parse_prompt_config("").unwrap(), PromptConfig::default());
    }

    #[test]
    fn test_load_prompt_missing_file() {
        let err = load_prompt_config(Path::new("/nonexistent/prompt.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::PromptNotFound(_)));
    }
}
