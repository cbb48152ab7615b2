//! Configuration loading for Warden.
//!
//! Reads the `[filesystem]` table of a TOML file and turns it into a validated
//! [`AccessPolicy`]. Everything downstream only ever sees the policy.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use warden_types::{
    AccessPolicy, DEFAULT_MAX_FILE_SIZE_BYTES, DEFAULT_MAX_SEARCH_RESULTS,
    DEFAULT_MAX_WRITE_SIZE_BYTES, DEFAULT_SEARCH_TIMEOUT, PolicyError, normalize_lexically,
};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "WARDEN_CONFIG";

const MAX_SEARCH_RESULTS_LIMIT: usize = 10_000;
const MIN_SEARCH_TIMEOUT_SECS: f64 = 1.0;
const MAX_SEARCH_TIMEOUT_SECS: f64 = 300.0;

const fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl ConfigError {
    /// The file the error came from, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid { .. } | ConfigError::Policy(_) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WardenConfig {
    /// Filesystem access settings. Absent means the default policy with an
    /// empty whitelist, which denies everything.
    pub filesystem: Option<FileSystemAccessConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSystemAccessConfig {
    pub enabled: bool,
    /// Entries may use `~` and `${VAR}`; relative entries resolve against the
    /// working directory.
    pub allowed_directories: Vec<String>,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Option<Vec<String>>,
    pub blocked_patterns: Vec<String>,
    /// Prepend the built-in denial list to `blocked_patterns`.
    #[serde(default = "default_true")]
    pub include_default_patterns: bool,
    pub max_search_results: usize,
    pub search_timeout_seconds: f64,
    pub follow_symlinks: bool,
    pub allow_write: bool,
    pub allow_delete: bool,
    pub max_write_size_bytes: u64,
    pub allowed_write_extensions: Option<Vec<String>>,
}

impl Default for FileSystemAccessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_directories: Vec::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: None,
            blocked_patterns: Vec::new(),
            include_default_patterns: true,
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            search_timeout_seconds: DEFAULT_SEARCH_TIMEOUT.as_secs_f64(),
            follow_symlinks: false,
            allow_write: false,
            allow_delete: false,
            max_write_size_bytes: DEFAULT_MAX_WRITE_SIZE_BYTES,
            allowed_write_extensions: None,
        }
    }
}

impl FileSystemAccessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size_bytes == 0 {
            return Err(invalid("max_file_size_bytes", "must be positive"));
        }
        if self.max_write_size_bytes == 0 {
            return Err(invalid("max_write_size_bytes", "must be positive"));
        }
        if !(1..=MAX_SEARCH_RESULTS_LIMIT).contains(&self.max_search_results) {
            return Err(invalid(
                "max_search_results",
                format!("must be between 1 and {MAX_SEARCH_RESULTS_LIMIT}"),
            ));
        }
        if !(MIN_SEARCH_TIMEOUT_SECS..=MAX_SEARCH_TIMEOUT_SECS)
            .contains(&self.search_timeout_seconds)
        {
            return Err(invalid(
                "search_timeout_seconds",
                format!("must be between {MIN_SEARCH_TIMEOUT_SECS} and {MAX_SEARCH_TIMEOUT_SECS}"),
            ));
        }
        if let Some(entry) = self
            .allowed_directories
            .iter()
            .find(|entry| entry.trim().is_empty())
        {
            return Err(invalid(
                "allowed_directories",
                format!("empty entry {entry:?}"),
            ));
        }
        Ok(())
    }

    /// Validate and build the policy, resolving directory entries against
    /// the current working directory.
    pub fn to_policy(&self) -> Result<AccessPolicy, ConfigError> {
        let cwd = env::current_dir().map_err(|source| ConfigError::Read {
            path: PathBuf::from("."),
            source,
        })?;
        self.to_policy_in(&cwd)
    }

    /// Like [`Self::to_policy`] but with an explicit base for relative entries.
    pub fn to_policy_in(&self, base: &Path) -> Result<AccessPolicy, ConfigError> {
        self.validate()?;

        let directories: Vec<PathBuf> = self
            .allowed_directories
            .iter()
            .map(|entry| resolve_directory(entry, base))
            .collect();
        for dir in &directories {
            if !dir.is_dir() {
                tracing::warn!(directory = %dir.display(), "Allowed directory does not exist");
            }
        }

        let mut builder = AccessPolicy::builder()
            .enabled(self.enabled)
            .allowed_directories(directories)
            .max_file_size_bytes(self.max_file_size_bytes)
            .max_search_results(self.max_search_results)
            .search_timeout(Duration::from_secs_f64(self.search_timeout_seconds))
            .follow_symlinks(self.follow_symlinks)
            .allow_write(self.allow_write)
            .allow_delete(self.allow_delete)
            .max_write_size_bytes(self.max_write_size_bytes);

        if self.include_default_patterns {
            for pattern in &self.blocked_patterns {
                builder = builder.deny_pattern(pattern);
            }
        } else {
            builder = builder.denied_patterns(&self.blocked_patterns);
        }
        if let Some(exts) = &self.allowed_extensions {
            builder = builder.allowed_extensions(exts);
        }
        if let Some(exts) = &self.allowed_write_extensions {
            builder = builder.allowed_write_extensions(exts);
        }

        Ok(builder.build()?)
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Expand `${VAR}` references. Unset variables expand to nothing; an
/// unterminated `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if !name.is_empty() {
            out.push_str(&env::var(name).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_home(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(value)
}

/// Turn one configured entry into an absolute directory path.
///
/// Existing directories are canonicalized so the whitelist compares against
/// the same form the resolver produces.
fn resolve_directory(entry: &str, base: &Path) -> PathBuf {
    let expanded = expand_home(expand_env_vars(entry.trim()).as_str());
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    let normalized = normalize_lexically(&absolute);
    std::fs::canonicalize(&normalized).unwrap_or(normalized)
}

impl WardenConfig {
    /// Load from `explicit`, else `$WARDEN_CONFIG`, else the default location.
    ///
    /// A missing file at the default location yields `Ok(None)`; a missing
    /// file that was asked for by name is a read error.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let path = match named {
            Some(path) => path,
            None => match config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(None),
            },
        };

        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::parse(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, source);
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    /// The access policy this config describes.
    pub fn access_policy(&self) -> Result<AccessPolicy, ConfigError> {
        match &self.filesystem {
            Some(fs) => fs.to_policy(),
            None => FileSystemAccessConfig::default().to_policy(),
        }
    }
}

/// Default config location: `<config_dir>/warden/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("warden").join("config.toml"))
}
