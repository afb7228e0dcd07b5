pub mod parse;
pub mod types;
pub mod watcher;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_configuration, load_settings, ConfigError};
pub use types::{Configuration, ConnectionEndpoint, FieldSpec, Settings};

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(text, |caps: &regex::Captures| {
        let var_name = caps.get(1).unwrap().as_str();
        std::env::var(var_name).unwrap_or_else(|_| caps.get(0).unwrap().as_str().to_string())
    })
    .to_string()
}

/// Resolves the settings file path from an explicit argument or the default
/// locations. Returns the first existing path from:
/// 1. Explicit path (if provided)
/// 2. ~/.config/udaq/udaq.yml
/// 3. /etc/udaq/udaq.yml
pub fn resolve_settings_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_settings = home_dir.join(".config/udaq/udaq.yml");
        if user_settings.exists() {
            return Some(user_settings);
        }
    }

    let system_settings = PathBuf::from("/etc/udaq/udaq.yml");
    if system_settings.exists() {
        return Some(system_settings);
    }

    None
}
