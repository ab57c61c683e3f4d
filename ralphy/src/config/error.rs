/// Failures while locating, parsing or validating `config.yaml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// YAML syntax or shape mismatch.
    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Config IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Every rule violation found, not just the first.
    #[error("Config validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidOverride { key: String, value: String },
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        let location = err
            .location()
            .map(|loc| format!(" (line {}, column {})", loc.line(), loc.column()))
            .unwrap_or_default();
        let message = err.to_string();
        if location.is_empty() || message.contains("line ") {
            ConfigError::ParseError(message)
        } else {
            ConfigError::ParseError(format!("{message}{location}"))
        }
    }
}
