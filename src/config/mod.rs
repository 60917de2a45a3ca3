pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{build_config, default_config_yaml, load_config, ConfigError, Overrides};
pub use types::{Config, CursorStoreKind, DbType, OutputTarget};

/// Replace `$env{NAME}` references in raw config text before YAML parsing.
/// Unset variables stay as written so the YAML error points at them.
pub fn expand_env_vars(text: &str) -> String {
    static ENV_REF: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = ENV_REF
        .get_or_init(|| Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
    else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// `~` and `~/...` resolve against the home directory; other paths pass through.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) if rest.as_os_str().is_empty() => home,
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Config file for this run: `--config` wins, then the per-user file, then
/// the system-wide one. `None` means built-in defaults.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    let user = dirs::home_dir().map(|home| home.join(".config/dblogtail/config.yml"));
    user.into_iter()
        .chain(std::iter::once(PathBuf::from("/etc/dblogtail/config.yml")))
        .find(|candidate| candidate.exists())
}
