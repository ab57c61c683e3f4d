use serde::{Deserialize, Serialize};

use super::enums::{AgentRuntime, DecoderProfile, SourceKind};

/// Where pending tasks come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// Task file for the markdown and yaml sources. Falls back to
    /// `PRD.md` / `tasks.yaml` when unset.
    #[serde(default)]
    pub path: Option<String>,
    /// `owner/repo` for the github source.
    #[serde(default)]
    pub github_repo: Option<String>,
    #[serde(default)]
    pub github_label: Option<String>,
}

impl SourceConfig {
    /// Task file path with the per-kind default applied.
    pub fn resolved_path(&self) -> Option<String> {
        match self.kind {
            SourceKind::Markdown => Some(self.path.clone().unwrap_or_else(default_prd_file)),
            SourceKind::Yaml => Some(self.path.clone().unwrap_or_else(default_yaml_file)),
            SourceKind::Github => None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Markdown,
            path: None,
            github_repo: None,
            github_label: None,
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: u32,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_iterations: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Pause between sequential iterations.
    #[serde(default)]
    pub delay_seconds: u64,
    /// Defaults to the branch checked out when the run starts.
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub branch_per_task: bool,
    #[serde(default)]
    pub create_pr: bool,
    #[serde(default)]
    pub draft_pr: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Overrides the runtime's default output decoder.
    #[serde(default)]
    pub decoder: Option<DecoderProfile>,
    #[serde(default)]
    pub skip_tests: bool,
    #[serde(default)]
    pub skip_lint: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            model: None,
            parallel: false,
            max_parallel: default_max_parallel(),
            max_iterations: 0,
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            delay_seconds: 0,
            base_branch: None,
            branch_per_task: false,
            create_pr: false,
            draft_pr: false,
            poll_interval_ms: default_poll_interval_ms(),
            decoder: None,
            skip_tests: false,
            skip_lint: false,
            dry_run: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RalphyConfig {
    #[serde(default)]
    pub runtime: AgentRuntime,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RalphyConfig {
    /// Decoder profile in effect: explicit override, else the runtime's own.
    pub fn decoder(&self) -> DecoderProfile {
        self.execution
            .decoder
            .unwrap_or_else(|| self.runtime.default_decoder())
    }
}

// Default value helpers
fn default_prd_file() -> String {
    "PRD.md".to_string()
}

fn default_yaml_file() -> String {
    "tasks.yaml".to_string()
}

fn default_max_parallel() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RalphyConfig::default();
        assert_eq!(config.runtime, AgentRuntime::Claude);
        assert_eq!(config.source.kind, SourceKind::Markdown);
        assert_eq!(config.source.resolved_path(), Some("PRD.md".to_string()));
        assert!(!config.execution.parallel);
        assert_eq!(config.execution.max_parallel, 3);
        assert_eq!(config.execution.max_iterations, 0);
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.retry_delay_seconds, 5);
        assert_eq!(config.execution.delay_seconds, 0);
        assert_eq!(config.execution.poll_interval_ms, 300);
        assert_eq!(config.execution.base_branch, None);
        assert!(!config.execution.create_pr);
        assert!(!config.execution.draft_pr);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
runtime: opencode
execution:
  parallel: true
  max_parallel: 5
"#;
        let config: RalphyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.runtime, AgentRuntime::Opencode);
        assert!(config.execution.parallel);
        assert_eq!(config.execution.max_parallel, 5);
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.poll_interval_ms, 300);
        assert_eq!(config.source.kind, SourceKind::Markdown);
    }

    #[test]
    fn test_empty_yaml_document() {
        let config: RalphyConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.execution.max_parallel, 3);
    }

    #[test]
    fn test_config_yaml_roundtrip() {
        let mut config = RalphyConfig::default();
        config.source.kind = SourceKind::Github;
        config.source.github_repo = Some("acme/widgets".to_string());
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: RalphyConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.source.kind, SourceKind::Github);
        assert_eq!(parsed.source.github_repo.as_deref(), Some("acme/widgets"));
        assert_eq!(parsed.source.resolved_path(), None);
    }

    #[test]
    fn test_yaml_source_default_path() {
        let source = SourceConfig {
            kind: SourceKind::Yaml,
            ..Default::default()
        };
        assert_eq!(source.resolved_path(), Some("tasks.yaml".to_string()));
    }

    #[test]
    fn test_decoder_override() {
        let mut config = RalphyConfig::default();
        assert_eq!(config.decoder(), DecoderProfile::StreamJson);
        config.execution.decoder = Some(DecoderProfile::Auto);
        assert_eq!(config.decoder(), DecoderProfile::Auto);
    }
}
