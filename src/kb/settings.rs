//! In-place edits of a knowledge base's `.env` and `settings.yaml`.

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while patching settings files.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The `.env` file to update does not exist.
    #[error("environment file not found: {0}")]
    EnvFileMissing(PathBuf),

    /// Reading or writing a settings file failed.
    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing YAML could not be parsed or the result serialized.
    #[error("invalid YAML in '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The YAML document root is not a mapping.
    #[error("'{0}' does not contain a YAML mapping")]
    NotAMapping(PathBuf),

    /// A dotted path with an empty segment.
    #[error("invalid settings path: '{0}'")]
    InvalidPath(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError + '_ {
    move |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Set `key=value` in an existing dotenv file.
///
/// An existing assignment of `key` is replaced where it stands; every other
/// line, comments included, is kept. A missing key is appended.
pub fn update_env_file(path: &Path, key: &str, value: &str) -> Result<(), SettingsError> {
    if !path.is_file() {
        return Err(SettingsError::EnvFileMissing(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(io_error(path))?;

    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        if assigned_key(line) == Some(key) {
            if !replaced {
                lines.push(format!("{}={}", key, value));
                replaced = true;
            }
            // later duplicates are dropped so the file has one assignment
            continue;
        }
        lines.push(line.to_string());
    }
    if !replaced {
        lines.push(format!("{}={}", key, value));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(path, out).map_err(io_error(path))
}

/// The key assigned by a dotenv line, if any.
fn assigned_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    trimmed.split_once('=').map(|(key, _)| key.trim())
}

/// Apply dotted-path edits (`llm.model` and friends) to a YAML file.
///
/// A missing file is treated as an empty document. Missing intermediate
/// mappings are created, and an intermediate that holds a scalar or list is
/// replaced by a mapping.
pub fn update_yaml_config(path: &Path, updates: &[(&str, &str)]) -> Result<(), SettingsError> {
    let mut doc = if path.exists() {
        let content = fs::read_to_string(path).map_err(io_error(path))?;
        match serde_yaml::from_str::<Value>(&content).map_err(|source| SettingsError::Yaml {
            path: path.to_path_buf(),
            source,
        })? {
            Value::Null => Value::Mapping(Mapping::new()),
            mapping @ Value::Mapping(_) => mapping,
            _ => return Err(SettingsError::NotAMapping(path.to_path_buf())),
        }
    } else {
        Value::Mapping(Mapping::new())
    };

    for (dotted, value) in updates {
        set_path(&mut doc, dotted, value)?;
    }

    let out = serde_yaml::to_string(&doc).map_err(|source| SettingsError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, out).map_err(io_error(path))
}

fn set_path(doc: &mut Value, dotted: &str, value: &str) -> Result<(), SettingsError> {
    let keys: Vec<&str> = dotted.split('.').collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err(SettingsError::InvalidPath(dotted.to_string()));
    }
    let (last, parents) = keys
        .split_last()
        .ok_or_else(|| SettingsError::InvalidPath(dotted.to_string()))?;

    let mut current = doc;
    for key in parents {
        let map = ensure_mapping(current, dotted)?;
        current = map
            .entry(Value::String((*key).to_string()))
            .or_insert(Value::Null);
    }
    ensure_mapping(current, dotted)?.insert(
        Value::String((*last).to_string()),
        Value::String(value.to_string()),
    );
    Ok(())
}

/// Turn `value` into a mapping, replacing any scalar or sequence.
fn ensure_mapping<'a>(
    value: &'a mut Value,
    dotted: &str,
) -> Result<&'a mut Mapping, SettingsError> {
    if !value.is_mapping() {
        *value = Value::Mapping(Mapping::new());
    }
    value
        .as_mapping_mut()
        .ok_or_else(|| SettingsError::InvalidPath(dotted.to_string()))
}
