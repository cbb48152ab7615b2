//! Immutable access policy.
//!
//! An [`AccessPolicy`] is built once per session (or narrowed once per request
//! by an outer authorization layer) and then only read. All fields are private;
//! the only way to obtain a different posture is to build or narrow a new value.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10_000_000;
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 100;
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WRITE_SIZE_BYTES: u64 = 1_000_000;

/// Case-insensitive substrings that are always refused, whitelist or not.
pub const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    ".env",
    "credentials",
    "secrets",
    ".ssh",
    ".gnupg",
    ".git/config",
    ".netrc",
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    ".password",
    "token",
];

#[must_use]
pub fn default_denied_patterns() -> Vec<String> {
    DEFAULT_DENIED_PATTERNS
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("allowed directory must be absolute: {}", path.display())]
    RelativeDirectory { path: PathBuf },
    #[error("allowed directory must not contain '..': {}", path.display())]
    ParentTraversal { path: PathBuf },
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },
    #[error("narrowed directory is outside the current whitelist: {}", path.display())]
    OutsideScope { path: PathBuf },
}

/// Lower-case an extension and give it a leading dot (`"PY"` -> `".py"`).
///
/// Returns `None` for blank input.
#[must_use]
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim();
    if trimmed.is_empty() || trimmed == "." {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with('.') {
        Some(lower)
    } else {
        Some(format!(".{lower}"))
    }
}

fn normalize_extensions<I, S>(exts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    exts.into_iter()
        .filter_map(|e| normalize_extension(e.as_ref()))
        .collect()
}

fn push_pattern(patterns: &mut Vec<String>, raw: &str) {
    let lower = raw.trim().to_lowercase();
    if !lower.is_empty() && !patterns.contains(&lower) {
        patterns.push(lower);
    }
}

fn validate_directory(path: &Path) -> Result<(), PolicyError> {
    if !path.is_absolute() {
        return Err(PolicyError::RelativeDirectory {
            path: path.to_path_buf(),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PolicyError::ParentTraversal {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Immutable filesystem access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    enabled: bool,
    allowed_directories: Vec<PathBuf>,
    /// Whitelists of the policies this one was narrowed from, outermost first.
    /// A path must fall inside every layer.
    enclosing: Vec<Vec<PathBuf>>,
    max_file_size_bytes: u64,
    allowed_extensions: Option<BTreeSet<String>>,
    denied_patterns: Vec<String>,
    max_search_results: usize,
    search_timeout: Duration,
    follow_symlinks: bool,
    allow_write: bool,
    allow_delete: bool,
    max_write_size_bytes: u64,
    allowed_write_extensions: Option<BTreeSet<String>>,
}

impl AccessPolicy {
    #[must_use]
    pub fn builder() -> AccessPolicyBuilder {
        AccessPolicyBuilder::default()
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn allowed_directories(&self) -> &[PathBuf] {
        &self.allowed_directories
    }

    #[must_use]
    pub fn enclosing_layers(&self) -> &[Vec<PathBuf>] {
        &self.enclosing
    }

    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    #[must_use]
    pub fn allowed_extensions(&self) -> Option<&BTreeSet<String>> {
        self.allowed_extensions.as_ref()
    }

    #[must_use]
    pub fn denied_patterns(&self) -> &[String] {
        &self.denied_patterns
    }

    #[must_use]
    pub fn max_search_results(&self) -> usize {
        self.max_search_results
    }

    #[must_use]
    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    #[must_use]
    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    #[must_use]
    pub fn allow_write(&self) -> bool {
        self.allow_write
    }

    #[must_use]
    pub fn allow_delete(&self) -> bool {
        self.allow_delete
    }

    #[must_use]
    pub fn max_write_size_bytes(&self) -> u64 {
        self.max_write_size_bytes
    }

    /// First denial pattern contained in `haystack` (case-insensitive).
    #[must_use]
    pub fn matched_denied_pattern(&self, haystack: &str) -> Option<&str> {
        let lower = haystack.to_lowercase();
        self.denied_patterns
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Whether a normalized extension (`".py"`, or `""` for none) may be read.
    #[must_use]
    pub fn extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions
            .as_ref()
            .is_none_or(|set| set.contains(extension))
    }

    /// Write-side extension check; falls back to the read list when unset.
    #[must_use]
    pub fn write_extension_allowed(&self, extension: &str) -> bool {
        match &self.allowed_write_extensions {
            Some(set) => set.contains(extension),
            None => self.extension_allowed(extension),
        }
    }

    /// Derive a stricter policy scoped to `directories`.
    ///
    /// The current whitelist becomes an enclosing layer, so the narrowed policy
    /// can never admit a path the current one refuses. Extra patterns are added
    /// to, never substituted for, the existing denial list.
    pub fn narrowed<D, P, S>(
        &self,
        directories: D,
        extra_denied_patterns: P,
    ) -> Result<AccessPolicy, PolicyError>
    where
        D: IntoIterator<Item = PathBuf>,
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut narrowed_dirs = Vec::new();
        for dir in directories {
            validate_directory(&dir)?;
            if !self
                .allowed_directories
                .iter()
                .any(|allowed| dir.starts_with(allowed))
            {
                return Err(PolicyError::OutsideScope { path: dir });
            }
            if !narrowed_dirs.contains(&dir) {
                narrowed_dirs.push(dir);
            }
        }

        let mut denied_patterns = self.denied_patterns.clone();
        for pat in extra_denied_patterns {
            push_pattern(&mut denied_patterns, pat.as_ref());
        }

        let mut enclosing = self.enclosing.clone();
        enclosing.push(self.allowed_directories.clone());

        Ok(AccessPolicy {
            allowed_directories: narrowed_dirs,
            enclosing,
            denied_patterns,
            ..self.clone()
        })
    }

    #[must_use]
    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            enabled: self.enabled,
            allowed_directories: self.allowed_directories.len(),
            max_file_size_bytes: self.max_file_size_bytes,
            allowed_extensions: self
                .allowed_extensions
                .as_ref()
                .map(|set| set.iter().cloned().collect()),
            max_search_results: self.max_search_results,
            search_timeout_seconds: self.search_timeout.as_secs_f64(),
            follow_symlinks: self.follow_symlinks,
            allow_write: self.allow_write,
            allow_delete: self.allow_delete,
            max_write_size_bytes: if self.allow_write {
                self.max_write_size_bytes
            } else {
                0
            },
        }
    }
}

/// Diagnostic snapshot of a policy. Carries counts, not paths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub enabled: bool,
    pub allowed_directories: usize,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Option<Vec<String>>,
    pub max_search_results: usize,
    pub search_timeout_seconds: f64,
    pub follow_symlinks: bool,
    pub allow_write: bool,
    pub allow_delete: bool,
    pub max_write_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct AccessPolicyBuilder {
    enabled: bool,
    allowed_directories: Vec<PathBuf>,
    max_file_size_bytes: u64,
    allowed_extensions: Option<BTreeSet<String>>,
    denied_patterns: Vec<String>,
    max_search_results: usize,
    search_timeout: Duration,
    follow_symlinks: bool,
    allow_write: bool,
    allow_delete: bool,
    max_write_size_bytes: u64,
    allowed_write_extensions: Option<BTreeSet<String>>,
}

impl Default for AccessPolicyBuilder {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_directories: Vec::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: None,
            denied_patterns: default_denied_patterns(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            follow_symlinks: false,
            allow_write: false,
            allow_delete: false,
            max_write_size_bytes: DEFAULT_MAX_WRITE_SIZE_BYTES,
            allowed_write_extensions: None,
        }
    }
}

impl AccessPolicyBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn allow_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.allowed_directories.push(dir.into());
        self
    }

    pub fn allowed_directories<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.allowed_directories = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = Some(normalize_extensions(exts));
        self
    }

    /// Replace the denial list (defaults included) with `patterns`.
    pub fn denied_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.denied_patterns.clear();
        for pat in patterns {
            push_pattern(&mut self.denied_patterns, pat.as_ref());
        }
        self
    }

    /// Append one pattern to the denial list.
    pub fn deny_pattern(mut self, pattern: impl AsRef<str>) -> Self {
        push_pattern(&mut self.denied_patterns, pattern.as_ref());
        self
    }

    pub fn max_search_results(mut self, max: usize) -> Self {
        self.max_search_results = max;
        self
    }

    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn allow_write(mut self, allow: bool) -> Self {
        self.allow_write = allow;
        self
    }

    pub fn allow_delete(mut self, allow: bool) -> Self {
        self.allow_delete = allow;
        self
    }

    pub fn max_write_size_bytes(mut self, bytes: u64) -> Self {
        self.max_write_size_bytes = bytes;
        self
    }

    pub fn allowed_write_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_write_extensions = Some(normalize_extensions(exts));
        self
    }

    pub fn build(self) -> Result<AccessPolicy, PolicyError> {
        for dir in &self.allowed_directories {
            validate_directory(dir)?;
        }
        if self.max_file_size_bytes == 0 {
            return Err(PolicyError::NonPositive {
                field: "max_file_size_bytes",
            });
        }
        if self.max_search_results == 0 {
            return Err(PolicyError::NonPositive {
                field: "max_search_results",
            });
        }
        if self.search_timeout.is_zero() {
            return Err(PolicyError::NonPositive {
                field: "search_timeout",
            });
        }

        let mut allowed_directories: Vec<PathBuf> = Vec::new();
        for dir in self.allowed_directories {
            if !allowed_directories.contains(&dir) {
                allowed_directories.push(dir);
            }
        }

        Ok(AccessPolicy {
            enabled: self.enabled,
            allowed_directories,
            enclosing: Vec::new(),
            max_file_size_bytes: self.max_file_size_bytes,
            allowed_extensions: self.allowed_extensions,
            denied_patterns: self.denied_patterns,
            max_search_results: self.max_search_results,
            search_timeout: self.search_timeout,
            follow_symlinks: self.follow_symlinks,
            allow_write: self.allow_write,
            allow_delete: self.allow_delete,
            max_write_size_bytes: self.max_write_size_bytes,
            allowed_write_extensions: self.allowed_write_extensions,
        })
    }
}
