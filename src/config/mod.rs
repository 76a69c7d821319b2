pub mod generate;
pub mod parse;
pub mod types;

use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub use parse::{load_config, ConfigError};
pub use types::{
    Config, HarvesterConfig, OutputConfig, OutputKind, ProspectorConfig, PublishMode,
    TailbeatConfig,
};

/// `$env{NAME}` references in config files. Shell-style `${NAME}` is left
/// alone since it can be part of a glob.
static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

pub const SYSTEM_CONFIG_PATH: &str = "/etc/tailbeat/config.yml";

/// Substitute every `$env{NAME}` in `text`. Returns the expanded text and the
/// sorted names that are not set; their references are kept as written.
///
/// Values are inserted verbatim, so a value that itself looks like a
/// reference is not expanded again or reported.
pub fn expand_env_vars(text: &str) -> (String, Vec<String>) {
    let mut missing = Vec::new();
    let expanded = ENV_REF.replace_all(text, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing.push(caps[1].to_string());
            caps[0].to_string()
        })
    });

    let expanded = expanded.into_owned();
    missing.sort();
    missing.dedup();
    (expanded, missing)
}

/// `~` or `~/rest` relative to the home directory. `~user` forms and paths
/// without a leading tilde come back unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match dirs::home_dir() {
        Some(home) if rest.as_os_str().is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Places a config is looked for when none is given, most specific first.
pub fn default_config_paths() -> Vec<PathBuf> {
    let user = dirs::home_dir()
        .map(|home| home.join(".config").join("tailbeat").join("config.yml"));
    user.into_iter()
        .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)))
        .collect()
}

/// The explicit path, with `~` expanded, or the first default location that
/// holds a file.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(expand_tilde(path)),
        None => default_config_paths().into_iter().find(|path| path.is_file()),
    }
}
