//! Bounded single and batch reads, directory listing and access dry-runs.

use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use warden_types::{DenialReason, FileTypeExpectation};

use crate::ToolError;
use crate::resolver::{Access, AllowedPath, PathResolver};
use crate::walk::{Budget, Completion, WalkEnd, WalkOptions, authorize_directory, walk_allowed_files};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub size: u64,
}

/// One entry of a batch read, in input order.
#[derive(Debug)]
pub enum BatchItem {
    Ok(FileContent),
    Err(ToolError),
    /// The deadline or cancellation fired before this item was read.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub directory: String,
    pub files: Vec<String>,
    pub completion: Completion,
}

/// Result of a dry-run access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheck {
    /// Canonical path when it lies inside the whitelist.
    pub path: Option<PathBuf>,
    pub can_access: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FileReader {
    resolver: PathResolver,
}

impl FileReader {
    #[must_use]
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Everything `read_file` checks before it opens the file.
    fn authorize_read(&self, input: &str) -> Result<AllowedPath, ToolError> {
        self.resolver
            .resolve(input, Access::Read)
            .into_allowed()
            .and_then(require_regular_file)
    }

    pub fn read_file(&self, input: &str) -> Result<FileContent, ToolError> {
        let target = self.authorize_read(input).inspect_err(|err| {
            warn!(kind = %err.kind(), "Read denied");
        })?;
        let policy = self.resolver.policy();
        let bytes = read_bounded(
            &target.path,
            policy.max_file_size_bytes(),
            policy.follow_symlinks(),
        )?;
        let size = bytes.len() as u64;
        info!(path = %target.path.display(), size, "Read file");
        Ok(FileContent {
            path: target.display(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            size,
        })
    }

    /// Read each path independently. Once `budget` is exhausted the remaining
    /// items are reported as interrupted.
    #[must_use]
    pub fn read_files(&self, inputs: &[String], budget: &Budget) -> Vec<BatchItem> {
        inputs
            .iter()
            .map(|input| {
                if budget.exhausted() {
                    return BatchItem::Interrupted;
                }
                match self.read_file(input) {
                    Ok(content) => BatchItem::Ok(content),
                    Err(err) => BatchItem::Err(err),
                }
            })
            .collect()
    }

    /// List files (never directories) under `input`, bounded by the result cap
    /// and `budget`.
    pub fn list_directory(
        &self,
        input: &str,
        recursive: bool,
        budget: &Budget,
    ) -> Result<Listing, ToolError> {
        let dir = authorize_directory(&self.resolver, input).inspect_err(|err| {
            warn!(kind = %err.kind(), "Listing denied");
        })?;
        let cap = self.resolver.policy().max_search_results();

        let mut files = Vec::new();
        let mut truncated = false;
        let end = walk_allowed_files(
            &self.resolver,
            &dir,
            WalkOptions {
                recursive,
                max_depth: None,
            },
            budget,
            |file| {
                if files.len() == cap {
                    truncated = true;
                    return ControlFlow::Break(());
                }
                files.push(file.display());
                ControlFlow::Continue(())
            },
        );
        let completion = Completion::from_flags(truncated, end == WalkEnd::Interrupted);
        debug!(count = files.len(), ?completion, "Listed directory");
        Ok(Listing {
            directory: dir.display(),
            files,
            completion,
        })
    }

    /// Dry run of `read_file`: same checks, metadata only.
    #[must_use]
    pub fn check_access(&self, input: &str) -> AccessCheck {
        let target = self.resolver.resolve(input, Access::Read);
        let path = target.canonical().map(Path::to_path_buf);
        match target.into_allowed().and_then(require_regular_file) {
            Ok(_) => AccessCheck {
                path,
                can_access: true,
                reason: "Access allowed".to_string(),
            },
            Err(err) => AccessCheck {
                path,
                can_access: false,
                reason: err.to_string(),
            },
        }
    }
}

fn require_regular_file(target: AllowedPath) -> Result<AllowedPath, ToolError> {
    match &target.metadata {
        None => Err(ToolError::not_found()),
        Some(meta) if meta.is_file() => Ok(target),
        Some(_) => Err(DenialReason::WrongFileType {
            expected: FileTypeExpectation::RegularFile,
        }
        .into()),
    }
}

/// Open for reading. Without symlink following the final component must not
/// be a link at open time either.
pub(crate) fn open_readonly(path: &Path, follow_symlinks: bool) -> Result<File, ToolError> {
    let mut options = std::fs::OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        // A fifo swapped in after the stat must not block the open.
        let mut flags = libc::O_NONBLOCK;
        if !follow_symlinks {
            flags |= libc::O_NOFOLLOW;
        }
        options.custom_flags(flags);
    }
    #[cfg(not(unix))]
    let _ = follow_symlinks;
    options.open(path).map_err(|err| ToolError::io(&err))
}

/// Read at most `limit` bytes, failing if the file holds more.
///
/// The size is re-checked on the open handle and again while reading, so a
/// file that grew after the resolver's stat is still refused.
pub(crate) fn read_bounded(
    path: &Path,
    limit: u64,
    follow_symlinks: bool,
) -> Result<Vec<u8>, ToolError> {
    let file = open_readonly(path, follow_symlinks)?;
    let meta = file.metadata().map_err(|err| ToolError::io(&err))?;
    if !meta.is_file() {
        return Err(DenialReason::WrongFileType {
            expected: FileTypeExpectation::RegularFile,
        }
        .into());
    }
    if meta.len() > limit {
        return Err(DenialReason::FileTooLarge {
            size: meta.len(),
            limit,
        }
        .into());
    }

    let mut bytes = Vec::with_capacity(meta.len() as usize);
    file.take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| ToolError::io(&err))?;
    let size = bytes.len() as u64;
    if size > limit {
        return Err(DenialReason::FileTooLarge { size, limit }.into());
    }
    Ok(bytes)
}
