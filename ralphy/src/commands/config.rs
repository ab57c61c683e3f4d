//! Config command - Show the configuration in effect

use colored::Colorize;

use crate::config::loader::{ENV_BASE_BRANCH, ENV_MAX_PARALLEL, ENV_MODEL, ENV_RUNTIME};
use crate::config::{load_config, resolve_config_path};
use crate::types::RalphyConfig;

/// Resolved configuration rendered as YAML.
pub fn render(config: &RalphyConfig) -> anyhow::Result<String> {
    Ok(serde_yaml::to_string(config)?)
}

pub fn run() -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let (config_path, location) = resolve_config_path(Some(&cwd));

    println!("{}", "\nRalphy Configuration\n".bold());
    println!("{}", "Config location:".dimmed());
    if config_path.exists() {
        println!("  {} {} ({:?})", "●".green(), config_path.display(), location);
    } else {
        println!(
            "  {} {} (not found, using defaults)",
            "○".red(),
            config_path.display()
        );
    }

    let config = match load_config(Some(&cwd)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n{}", "Error reading config:".red());
            eprintln!("  {}", format!("{}", e).dimmed());
            return Err(e.into());
        }
    };

    println!("{}", "\nCurrent settings:".dimmed());
    for line in render(&config)?.lines() {
        println!("  {}", line.cyan());
    }

    println!("{}", "\nEnvironment overrides:".dimmed());
    let mut has_overrides = false;
    for var in [ENV_RUNTIME, ENV_MAX_PARALLEL, ENV_MODEL, ENV_BASE_BRANCH] {
        if let Ok(val) = std::env::var(var) {
            println!("  {}={}", var, val.yellow());
            has_overrides = true;
        }
    }
    if !has_overrides {
        println!("  {}", "(none)".dimmed());
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::read_config;

    #[test]
    fn test_render_defaults() {
        let yaml = render(&RalphyConfig::default()).unwrap();
        assert!(yaml.contains("runtime: claude"));
        assert!(yaml.contains("max_parallel: 3"));
        assert!(yaml.contains("poll_interval_ms: 300"));
    }

    #[test]
    fn test_rendered_config_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let mut config = RalphyConfig::default();
        config.execution.max_parallel = 6;
        config.execution.branch_per_task = true;
        std::fs::write(&path, render(&config).unwrap()).unwrap();

        let loaded = read_config(&path).unwrap();
        assert_eq!(loaded.execution.max_parallel, 6);
        assert!(loaded.execution.branch_per_task);
    }
}
