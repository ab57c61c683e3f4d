use std::path::Path;

use tracing::debug;

use super::error::ConfigError;
use super::paths::resolve_config_path;
use crate::types::RalphyConfig;

pub const ENV_RUNTIME: &str = "RALPHY_RUNTIME";
pub const ENV_MAX_PARALLEL: &str = "RALPHY_MAX_PARALLEL";
pub const ENV_MODEL: &str = "RALPHY_MODEL";
pub const ENV_BASE_BRANCH: &str = "RALPHY_BASE_BRANCH";

/// Read and parse a config file. The file must exist.
pub fn read_config(path: &Path) -> Result<RalphyConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(RalphyConfig::default());
    }
    let config: RalphyConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Read a config file and apply `RALPHY_*` environment overrides.
pub fn read_config_with_env(path: &Path) -> Result<RalphyConfig, ConfigError> {
    let config = read_config(path)?;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Resolve the config for the current directory.
///
/// A missing file is not an error: defaults are used and overrides still
/// apply. Validation is left to the caller so CLI flags can be merged first.
pub fn load_config(start_dir: Option<&Path>) -> Result<RalphyConfig, ConfigError> {
    let (path, location) = resolve_config_path(start_dir);
    if path.exists() {
        debug!(path = %path.display(), ?location, "Loading config");
        return read_config_with_env(&path);
    }
    debug!("No config file found, using defaults");
    apply_env_overrides(RalphyConfig::default(), |key| std::env::var(key).ok())
}

/// Apply environment overrides using `lookup` to resolve variables.
pub fn apply_env_overrides<F>(
    mut config: RalphyConfig,
    lookup: F,
) -> Result<RalphyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_RUNTIME) {
        config.runtime = value.parse().map_err(|_| ConfigError::InvalidOverride {
            key: ENV_RUNTIME.to_string(),
            value: value.clone(),
        })?;
    }
    if let Some(value) = lookup(ENV_MAX_PARALLEL) {
        config.execution.max_parallel =
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidOverride {
                    key: ENV_MAX_PARALLEL.to_string(),
                    value: value.clone(),
                })?;
    }
    if let Some(value) = lookup(ENV_MODEL) {
        if !value.trim().is_empty() {
            config.execution.model = Some(value);
        }
    }
    if let Some(value) = lookup(ENV_BASE_BRANCH) {
        if !value.trim().is_empty() {
            config.execution.base_branch = Some(value);
        }
    }
    Ok(config)
}

/// Check value ranges that serde cannot express.
pub fn validate_config(config: &RalphyConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    let exec = &config.execution;

    if exec.max_parallel == 0 {
        errors.push("execution.max_parallel must be at least 1".to_string());
    }
    if exec.max_retries == 0 {
        errors.push("execution.max_retries must be at least 1".to_string());
    }
    if exec.poll_interval_ms == 0 {
        errors.push("execution.poll_interval_ms must be greater than 0".to_string());
    }
    if exec.draft_pr && !exec.create_pr {
        errors.push("execution.draft_pr requires execution.create_pr".to_string());
    }
    if config.source.kind == crate::types::SourceKind::Github
        && config.source.github_repo.is_none()
    {
        errors.push("source.github_repo is required for the github source".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentRuntime, SourceKind};
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_read_config_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let result = read_config(&tmp.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_read_config_parses_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "runtime: codex\nsource:\n  kind: yaml\n  path: work.yaml\nexecution:\n  max_retries: 1\n",
        )
        .unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.runtime, AgentRuntime::Codex);
        assert_eq!(config.source.kind, SourceKind::Yaml);
        assert_eq!(config.source.resolved_path().as_deref(), Some("work.yaml"));
        assert_eq!(config.execution.max_retries, 1);
    }

    #[test]
    fn test_read_config_empty_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "\n").unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.execution.max_parallel, 3);
    }

    #[test]
    fn test_read_config_invalid_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "runtime: [unterminated\n").unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_applied() {
        let config = apply_env_overrides(
            RalphyConfig::default(),
            lookup_from(&[
                (ENV_RUNTIME, "opencode"),
                (ENV_MAX_PARALLEL, "6"),
                (ENV_MODEL, "sonnet"),
                (ENV_BASE_BRANCH, "develop"),
            ]),
        )
        .unwrap();
        assert_eq!(config.runtime, AgentRuntime::Opencode);
        assert_eq!(config.execution.max_parallel, 6);
        assert_eq!(config.execution.model.as_deref(), Some("sonnet"));
        assert_eq!(config.execution.base_branch.as_deref(), Some("develop"));
    }

    #[test]
    fn test_env_override_invalid_value() {
        let result = apply_env_overrides(
            RalphyConfig::default(),
            lookup_from(&[(ENV_MAX_PARALLEL, "lots")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidOverride { ref key, .. }) if key == ENV_MAX_PARALLEL
        ));
    }

    #[test]
    fn test_no_env_leaves_config_untouched() {
        let config = apply_env_overrides(RalphyConfig::default(), lookup_from(&[])).unwrap();
        assert_eq!(config.runtime, AgentRuntime::Claude);
        assert_eq!(config.execution.model, None);
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&RalphyConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = RalphyConfig::default();
        config.execution.max_parallel = 0;
        config.execution.max_retries = 0;
        config.execution.draft_pr = true;
        match validate_config(&config) {
            Err(ConfigError::ValidationError(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_github_requires_repo() {
        let mut config = RalphyConfig::default();
        config.source.kind = SourceKind::Github;
        assert!(validate_config(&config).is_err());
        config.source.github_repo = Some("acme/widgets".into());
        assert!(validate_config(&config).is_ok());
    }
}
