//! Layered configuration loading.
//!
//! Uses `figment` for layering: family defaults -> config file -> environment
//! -> `key=value` overrides. Keys that no field consumes are ignored, so a
//! config file can carry extra bookkeeping entries such as `family`.

use super::ExperimentConfig;
use super::families::{DEFAULT_FAMILY, family};
use crate::error::ConfigError;
use figment::{
    Figment,
    error::Kind,
    providers::{Env, Format, Json, Serialized, Toml},
};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable prefix (`BERT_LAYOUT_OPTIMIZER__LR=1e-3`).
pub const ENV_PREFIX: &str = "BERT_LAYOUT_";

/// Where the base configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in family defaults, written `family:<name>`.
    Family(String),
    /// A TOML or JSON file, layered over its family's defaults.
    File(PathBuf),
}

impl ConfigSource {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("family:") {
            Some(name) => Self::Family(name.trim().to_string()),
            None => Self::File(PathBuf::from(raw)),
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Family(name) => write!(f, "family:{name}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Split a `key=value` override.
pub fn parse_override(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidOverride {
            raw: raw.to_string(),
        }),
    }
}

/// Load and validate a configuration.
///
/// Priority (highest to lowest):
/// 1. `overrides` (dotted keys, e.g. `optimizer.lr=1e-3`)
/// 2. Environment variables prefixed with `BERT_LAYOUT_`, `__` for nesting
/// 3. The config file, when the source is a file
/// 4. Defaults of the family named by the file's `family` key or the source
pub fn load_config(
    source: &ConfigSource,
    overrides: &[(String, String)],
) -> Result<ExperimentConfig, ConfigError> {
    let figment = match source {
        ConfigSource::Family(name) => Figment::from(Serialized::defaults(family(name)?())),
        ConfigSource::File(path) => {
            let file = file_figment(path)?;
            let family_name = file
                .find_value("family")
                .ok()
                .and_then(|v| v.into_string())
                .unwrap_or_else(|| DEFAULT_FAMILY.to_string());
            Figment::from(Serialized::defaults(family(&family_name)?())).merge(file)
        }
    };

    let mut figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
    for (key, raw) in overrides {
        figment = figment.merge(Serialized::default(key.as_str(), override_value(raw)));
    }

    let config: ExperimentConfig = figment.extract().map_err(map_figment_error)?;
    config.validate()?;
    Ok(config)
}

fn file_figment(path: &Path) -> Result<Figment, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    Ok(if is_json {
        Figment::from(Json::file(path))
    } else {
        Figment::from(Toml::file(path))
    })
}

/// Interpret an override value as a TOML value, falling back to a string.
fn override_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn map_figment_error(err: figment::Error) -> ConfigError {
    let field = err.path.join(".");
    match err.kind {
        Kind::UnknownVariant(value, expected) => ConfigError::UnknownVariant {
            field,
            value,
            expected: expected.iter().map(|s| s.to_string()).collect(),
        },
        Kind::Message(message) if field.is_empty() => ConfigError::Parse { message },
        kind => ConfigError::InvalidValue {
            field,
            message: kind.to_string(),
        },
    }
}
