//! Model provisioning configuration.

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the model identifier in command templates.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Model provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Attempts allowed before a model is reported unstable.
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Command run inside the backend to fetch/load a model.
    pub pull_command: String,

    /// Command that exits 0 when the model is already present.
    pub check_command: Option<String>,

    /// Models provisioned as part of `start`.
    pub ensure: Vec<ModelSpec>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
            pull_command: "ollama pull {model}".to_string(),
            check_command: Some("ollama show {model}".to_string()),
            ensure: Vec::new(),
        }
    }
}

/// A model artifact that must exist inside a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier, e.g. `codellama:13b`.
    pub id: String,

    /// Service the model is loaded into.
    pub service: String,
}

impl ModelSpec {
    /// Creates a model spec.
    pub fn new(id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
        }
    }
}

/// Splits a command template into words, then substitutes the model
/// identifier inside each word. The identifier never adds words.
pub fn render_command(
    template: &str,
    model: &str,
) -> Result<Vec<String>, shell_words::ParseError> {
    Ok(shell_words::split(template)?
        .into_iter()
        .map(|word| word.replace(MODEL_PLACEHOLDER, model))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_config_default() {
        let config = ModelsConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.pull_command.contains(MODEL_PLACEHOLDER));
        assert!(config.ensure.is_empty());
    }

    #[test]
    fn test_render_command() {
        assert_eq!(
            render_command("ollama run {model} --verbose", "codellama:13b").unwrap(),
            vec!["ollama", "run", "codellama:13b", "--verbose"]
        );
    }

    #[test]
    fn test_render_command_keeps_model_in_one_word() {
        assert_eq!(
            render_command("sh -c 'ollama pull {model}'", "it's").unwrap(),
            vec!["sh", "-c", "ollama pull it's"]
        );
        assert_eq!(
            render_command("ollama pull {model}", "llama2 --insecure").unwrap(),
            vec!["ollama", "pull", "llama2 --insecure"]
        );
    }

    #[test]
    fn test_render_command_unbalanced_template() {
        assert!(render_command("ollama pull '{model}", "llama2").is_err());
    }
}
