use std::env;
use std::path::{Path, PathBuf};

/// Directory holding project-local state and config
pub const LOCAL_DIR: &str = ".ralphy";
pub const CONFIG_FILE: &str = "config.yaml";

/// Whether config was found locally or globally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    Local,
    Global,
}

/// Get the global config directory (~/.config/ralphy or $XDG_CONFIG_HOME/ralphy)
pub fn get_global_config_dir() -> PathBuf {
    let base = if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config")
    } else {
        PathBuf::from(".config")
    };
    base.join("ralphy")
}

pub fn get_global_config_path() -> PathBuf {
    get_global_config_dir().join(CONFIG_FILE)
}

/// Walk up from start_dir looking for .ralphy/config.yaml
pub fn find_local_config(start_dir: Option<&Path>) -> Option<PathBuf> {
    let start = match start_dir {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().ok()?,
    };

    let mut dir = start.as_path();

    loop {
        let config_path = dir.join(LOCAL_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => break,
        }
    }

    None
}

/// Resolve which config file applies.
/// Priority: local config (walk up tree) > global config
pub fn resolve_config_path(start_dir: Option<&Path>) -> (PathBuf, ConfigLocation) {
    match find_local_config(start_dir) {
        Some(local) => (local, ConfigLocation::Local),
        None => (get_global_config_path(), ConfigLocation::Global),
    }
}
