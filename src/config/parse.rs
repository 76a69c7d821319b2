use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::harvester::encoding::find_encoding;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Shape of the files found in `config_dir`. Only their prospectors are used.
#[derive(Debug, serde::Deserialize)]
struct ConfigFragment {
    tailbeat: FragmentSection,
}

#[derive(Debug, serde::Deserialize)]
struct FragmentSection {
    #[serde(default)]
    prospectors: Vec<ProspectorConfig>,
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = read_expanded(path)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })?;

    if let Some(config_dir) = config.tailbeat.config_dir.clone() {
        let config_dir = expand_tilde(&config_dir);
        for file in config_dir_files(&config_dir)? {
            let fragment = read_expanded(&file)?;
            let fragment: ConfigFragment = serde_yaml::from_str(&fragment).map_err(|e| {
                ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("in file '{}': {}", file.display(), e),
                ))
            })?;
            tracing::debug!(
                file = %file.display(),
                prospectors = fragment.tailbeat.prospectors.len(),
                "Merging prospectors from config_dir"
            );
            config
                .tailbeat
                .prospectors
                .extend(fragment.tailbeat.prospectors);
        }
    }

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Parse a config from a YAML string, without `config_dir` merging.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_checked(yaml)?;
    let mut config: Config = serde_yaml::from_str(&yaml)?;
    expand_paths(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn read_expanded(path: &Path) -> Result<String, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    expand_checked(&yaml_string)
}

/// A file is returned as-is; a directory yields its `*.yml` files, sorted.
fn config_dir_files(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let metadata = fs::metadata(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("could not use config_dir '{}': {}", path.display(), e),
        ))
    })?;

    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.extension().is_some_and(|ext| ext == "yml") && entry_path.is_file() {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

/// Expand `$env{}` references, failing on any that are not set.
fn expand_checked(yaml: &str) -> Result<String, ConfigError> {
    let (yaml, unexpanded_vars) = expand_env_vars(yaml);
    if unexpanded_vars.is_empty() {
        return Ok(yaml);
    }

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=/path/to/directory\n\
             2. Replace $env{{{0}}} in the config file with an actual path",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export LOG_DIR=/var/log)\n\
             2. Replace the variables in the config file with actual paths",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in registry, output and glob paths.
fn expand_paths(config: &mut Config) {
    config.tailbeat.registry_file = expand_tilde(&config.tailbeat.registry_file);

    for prospector in &mut config.tailbeat.prospectors {
        for pattern in &mut prospector.paths {
            if pattern.starts_with('~') {
                *pattern = expand_tilde(Path::new(pattern.as_str()))
                    .to_string_lossy()
                    .into_owned();
            }
        }
    }

    if let OutputKind::File { path } = &mut config.output.kind {
        *path = expand_tilde(path);
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    let tailbeat = &config.tailbeat;

    if tailbeat.prospectors.is_empty() {
        errors.push("no prospectors configured, what files do you want me to watch?".to_string());
    }

    if tailbeat.spool_size == 0 {
        errors.push("spool_size must be greater than 0".to_string());
    }

    if tailbeat.idle_timeout.is_zero() {
        errors.push("idle_timeout must be greater than 0".to_string());
    }

    for (idx, prospector) in tailbeat.prospectors.iter().enumerate() {
        let name = format!("prospector #{}", idx);

        if prospector.paths.is_empty() {
            errors.push(format!("{}: paths must not be empty", name));
        }

        for pattern in &prospector.paths {
            if pattern == "-" {
                errors.push(format!("{}: reading from stdin ('-') is not supported", name));
                continue;
            }
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(format!("{}: invalid glob '{}': {}", name, pattern, e));
            }
        }

        if prospector.scan_frequency.is_zero() {
            errors.push(format!("{}: scan_frequency must be greater than 0", name));
        }

        let harvester = &prospector.harvester;

        if find_encoding(&harvester.encoding).is_none() {
            errors.push(format!("{}: unknown encoding('{}')", name, harvester.encoding));
        }

        if harvester.buffer_size == 0 {
            errors.push(format!("{}: harvester_buffer_size must be greater than 0", name));
        }

        if harvester.backoff_factor < 1 {
            errors.push(format!("{}: backoff_factor must be at least 1", name));
        }

        if harvester.backoff.is_zero() {
            errors.push(format!("{}: backoff must be greater than 0", name));
        }

        if harvester.max_backoff < harvester.backoff {
            errors.push(format!(
                "{}: max_backoff ({:?}) must not be smaller than backoff ({:?})",
                name, harvester.max_backoff, harvester.backoff
            ));
        }
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(ConfigError::Validation(errors.remove(0))),
        _ => Err(ConfigError::ValidationList(errors)),
    }
}
