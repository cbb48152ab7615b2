//! Policy-bounded directory traversal shared by listing and search.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_types::{DenialReason, FileTypeExpectation};

use crate::ToolError;
use crate::resolver::{Access, AllowedPath, Decision, PathResolver};

/// Wall-clock deadline plus caller cancellation, polled between steps.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Instant,
    cancel: CancellationToken,
}

impl Budget {
    #[must_use]
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86_400));
        Self { deadline, cancel }
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// How a bounded listing or search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Complete,
    Truncated,
    TimedOut,
    TimedOutTruncated,
}

impl Completion {
    #[must_use]
    pub const fn from_flags(truncated: bool, timed_out: bool) -> Self {
        match (truncated, timed_out) {
            (false, false) => Self::Complete,
            (true, false) => Self::Truncated,
            (false, true) => Self::TimedOut,
            (true, true) => Self::TimedOutTruncated,
        }
    }

    #[must_use]
    pub const fn truncated(self) -> bool {
        matches!(self, Self::Truncated | Self::TimedOutTruncated)
    }

    #[must_use]
    pub const fn timed_out(self) -> bool {
        matches!(self, Self::TimedOut | Self::TimedOutTruncated)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkOptions {
    pub recursive: bool,
    /// Directory levels below the root; `Some(0)` means the root's own entries.
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkEnd {
    Finished,
    Stopped,
    Interrupted,
}

/// Resolve `input` and require an allowed, existing directory.
pub(crate) fn authorize_directory(
    resolver: &PathResolver,
    input: &str,
) -> Result<AllowedPath, ToolError> {
    let dir = resolver.resolve(input, Access::Read).into_allowed()?;
    if !dir.exists() {
        return Err(ToolError::Io {
            message: "Directory not found",
        });
    }
    if !dir.is_dir() {
        return Err(DenialReason::WrongFileType {
            expected: FileTypeExpectation::Directory,
        }
        .into());
    }
    Ok(dir)
}

/// Visit every file under `root` that individually passes the resolver, in
/// file-name order. Subdirectories are re-validated before they are entered;
/// denied ones are skipped silently along with everything beneath them.
pub(crate) fn walk_allowed_files<F>(
    resolver: &PathResolver,
    root: &AllowedPath,
    options: WalkOptions,
    budget: &Budget,
    mut visit: F,
) -> WalkEnd
where
    F: FnMut(AllowedPath) -> ControlFlow<()>,
{
    let scope = resolver.scope();
    let policy = resolver.policy();

    let mut builder = WalkBuilder::new(&root.path);
    builder
        .standard_filters(false)
        .follow_links(policy.follow_symlinks())
        .sort_by_file_name(|a, b| a.cmp(b));
    if !options.recursive {
        builder.max_depth(Some(1));
    } else if let Some(depth) = options.max_depth {
        builder.max_depth(Some(depth.saturating_add(1)));
    }

    let filter_resolver = resolver.clone();
    let filter_scope = scope.clone();
    builder.filter_entry(move |entry| {
        if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            return true;
        }
        let target = filter_resolver.resolve_entry(&filter_scope, entry.path(), Access::Read);
        if let Decision::Denied(reason) = target.decision() {
            debug!(kind = %reason.kind(), "Skipping denied directory");
            return false;
        }
        true
    });

    for result in builder.build() {
        if budget.exhausted() {
            return WalkEnd::Interrupted;
        }
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.depth() == 0 || entry.file_type().is_none_or(|ft| ft.is_dir()) {
            continue;
        }
        match resolver
            .resolve_entry(&scope, entry.path(), Access::Read)
            .into_allowed()
        {
            Ok(file) if file.is_file() => {
                if visit(file).is_break() {
                    return WalkEnd::Stopped;
                }
            }
            Ok(_) => {}
            Err(err) => debug!(kind = %err.kind(), "Skipping denied file"),
        }
    }
    WalkEnd::Finished
}
