pub mod error;
pub mod loader;
pub mod paths;

pub use error::ConfigError;
pub use loader::{load_config, read_config, read_config_with_env, validate_config};
pub use paths::{find_local_config, resolve_config_path, ConfigLocation};
