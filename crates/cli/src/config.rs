use anyhow::{bail, Context, Result};
use lexaxis_contexts::{EvaluatorConfig, ModelId};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_FILE: &str = "lexaxis.toml";
pub const ORACLE_MODE_ENV: &str = "LEXAXIS_ORACLE_MODE";
pub const ORACLE_ENDPOINT_ENV: &str = "LEXAXIS_ORACLE_ENDPOINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleMode {
    #[default]
    Http,
    Stub,
}

impl FromStr for OracleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stub" => Ok(Self::Stub),
            other => bail!("Unsupported oracle mode '{other}' (expected 'http' or 'stub')"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub mode: OracleMode,
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            mode: OracleMode::Http,
            endpoint: "http://127.0.0.1:8700".to_string(),
            timeout_ms: 60_000,
        }
    }
}

/// `lexaxis.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexaxisConfig {
    pub model: ModelId,
    pub contexts: EvaluatorConfig,
    pub oracle: OracleConfig,
}

impl LexaxisConfig {
    /// Reads `path`, or `lexaxis.toml` in the working directory when present, else defaults.
    /// Environment overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: Option<PathBuf> = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.is_file().then_some(default)
            }
        };
        let mut config = match &path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::parse(&raw).with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(mode) = env::var(ORACLE_MODE_ENV) {
            self.oracle.mode = mode
                .parse()
                .with_context(|| format!("Invalid {ORACLE_MODE_ENV}"))?;
        }
        if let Ok(endpoint) = env::var(ORACLE_ENDPOINT_ENV) {
            self.oracle.endpoint = endpoint;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.contexts.validate()?;
        if self.oracle.mode == OracleMode::Http {
            if self.oracle.endpoint.trim().is_empty() {
                bail!("oracle.endpoint must not be empty");
            }
            if self.oracle.timeout_ms == 0 {
                bail!("oracle.timeout_ms must be positive");
            }
        }
        Ok(())
    }
}
