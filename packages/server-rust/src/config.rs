//! Backend configuration file: loading, format detection and `$VAR` expansion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backend::ToolPolicy;

/// `${NAME}` (anything up to the closing brace) or `$NAME`.
const ENV_REFERENCE: &str = r"\$\{([^}]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse config file (tried both YAML and JSON): {0}")]
    Unrecognized(serde_yaml::Error),
    #[error("invalid environment reference pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, BackendConfig>,
}

/// One backend entry. Exactly one of `command` or `url` selects the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "_extensions", default)]
    pub extensions: Extensions,
}

/// Relay-specific settings nested under `_extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extensions {
    #[serde(default)]
    pub disabled: bool,
    /// Use the legacy HTTP+SSE transport for `url` backends.
    #[serde(default)]
    pub sse: bool,
    #[serde(default)]
    pub tools: ToolPolicy,
}

/// Reads, expands and parses the configuration file at `path`.
///
/// `.json` is parsed as JSON, `.yaml`/`.yml` as YAML; any other extension is
/// tried as YAML first, then JSON.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let expanded = expand_env(&raw)?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(serde_json::from_str(&expanded)?),
        Some("yaml" | "yml") => Ok(serde_yaml::from_str(&expanded)?),
        _ => match serde_yaml::from_str(&expanded) {
            Ok(config) => Ok(config),
            Err(yaml_err) => {
                serde_json::from_str(&expanded).map_err(|_| ConfigError::Unrecognized(yaml_err))
            }
        },
    }
}

/// Expands `$NAME` and `${NAME}` against the process environment.
/// Unset variables expand to the empty string.
///
/// # Errors
///
/// Only if the reference pattern fails to compile.
pub fn expand_env(input: &str) -> Result<String, ConfigError> {
    expand_with(input, |name| std::env::var(name).ok())
}

/// [`expand_env`] with an explicit variable lookup.
///
/// # Errors
///
/// Only if the reference pattern fails to compile.
pub fn expand_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let pattern = Regex::new(ENV_REFERENCE)?;
    let expanded = pattern.replace_all(input, |caps: &Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        lookup(name).unwrap_or_default()
    });
    Ok(expanded.into_owned())
}

/// SHA-256 of each environment value, truncated to 8 hex characters, keyed
/// by variable name. Lets operators confirm a secret changed without logging it.
#[must_use]
pub fn env_checksums(env: &BTreeMap<String, String>) -> Vec<(&str, String)> {
    env.iter()
        .map(|(key, value)| {
            let mut digest = hex::encode(Sha256::digest(value.as_bytes()));
            digest.truncate(8);
            (key.as_str(), digest)
        })
        .collect()
}
