use super::ui::Theme;
use super::OutputFormat;
use calcfield::expr::{CompilerConfig, Limits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings resolved from the config file; command-line flags win over these.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    loaded: bool,
    data: RawConfig,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let require = explicit.is_some();
        let path = explicit.or_else(default_config_path);
        let (data, loaded) = match path.as_ref() {
            Some(config_path) if config_path.exists() => (read_file(config_path)?, true),
            Some(config_path) if require => {
                return Err(ConfigError::Missing {
                    path: config_path.clone(),
                })
            }
            _ => (RawConfig::default(), false),
        };
        Ok(Self { path, loaded, data })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.data.output.format
    }

    pub fn theme(&self) -> Option<Theme> {
        self.data.output.theme
    }

    /// Compiler settings with per-flag overrides applied.
    pub fn compiler_config(
        &self,
        max_depth: Option<usize>,
        max_nodes: Option<usize>,
    ) -> CompilerConfig {
        let defaults = Limits::default();
        CompilerConfig {
            limits: Limits {
                max_depth: max_depth
                    .or(self.data.limits.max_depth)
                    .unwrap_or(defaults.max_depth),
                max_nodes: max_nodes
                    .or(self.data.limits.max_nodes)
                    .unwrap_or(defaults.max_nodes),
            },
        }
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    limits: LimitsSection,
    #[serde(default)]
    output: OutputSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct LimitsSection {
    max_depth: Option<usize>,
    max_nodes: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct OutputSection {
    format: Option<OutputFormat>,
    theme: Option<Theme>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("CLI config {path} does not exist")]
    Missing { path: PathBuf },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("calcfield").join("config.toml"))
}
