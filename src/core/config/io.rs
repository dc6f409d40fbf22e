use crate::core::config::data::{path_display, McpConfig};
use directories::ProjectDirs;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const CONFIG_FILE_NAME: &str = "mcp.json";

/// Errors that can occur when loading `mcp.json`.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid JSON or does not match the server schema.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A server entry is internally inconsistent (e.g. both `command` and `url`).
    Invalid { server: String, message: String },

    /// No per-user configuration directory could be determined.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path_display(path),
                    source
                )
            }
            ConfigError::Invalid { server, message } => {
                write!(f, "Invalid MCP server '{server}': {message}")
            }
            ConfigError::NoConfigDir => write!(f, "Unable to determine config directory"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } | ConfigError::NoConfigDir => None,
        }
    }
}

/// Per-user configuration directory shared by `mcp.json` and the tool cache.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "mcpmux", "mcpmux").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Writes `contents` next to `path` and atomically moves it into place.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());

    if let Some(dir) = parent {
        fs::create_dir_all(dir)?;
    }

    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };

    temp_file.write_all(contents)?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

impl McpConfig {
    /// Loads and validates `mcp.json`. A missing file is an empty config.
    pub fn load_from_path(config_path: &Path) -> Result<McpConfig, ConfigError> {
        if !config_path.exists() {
            return Ok(McpConfig::default());
        }

        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        let config: McpConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source,
            })?;
        config
            .validate()
            .map_err(|(server, message)| ConfigError::Invalid { server, message })?;
        Ok(config)
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let contents = serde_json::to_string_pretty(self)?;
        write_atomically(config_path, contents.as_bytes())?;
        Ok(())
    }
}
