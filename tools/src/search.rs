//! Bounded `find` and `grep` over allowed directories.

use std::ops::ControlFlow;

use globset::{Glob, GlobMatcher};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ToolError;
use crate::reader::read_bounded;
use crate::resolver::{AllowedPath, PathResolver};
use crate::walk::{Budget, Completion, WalkEnd, WalkOptions, authorize_directory, walk_allowed_files};

/// Bytes inspected for a NUL when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8192;
/// Lines scanned between budget checks inside one file.
const LINES_PER_BUDGET_CHECK: usize = 1024;
/// Upper bound on compiled regex size.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrepMatch {
    pub file: String,
    /// 1-based.
    pub line: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    pub directory: String,
    pub files: Vec<String>,
    pub completion: Completion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepResult {
    pub directory: String,
    pub matches: Vec<GrepMatch>,
    pub completion: Completion,
}

#[derive(Debug, Clone)]
pub struct GrepRequest<'a> {
    pub pattern: &'a str,
    pub directory: &'a str,
    pub case_sensitive: bool,
    pub recursive: bool,
    pub file_pattern: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct SearchEngine {
    resolver: PathResolver,
}

impl SearchEngine {
    #[must_use]
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    /// Files under `directory` whose name matches `name_pattern` (glob,
    /// default `*`), at most `max_depth` levels below it.
    pub fn find(
        &self,
        directory: &str,
        name_pattern: Option<&str>,
        max_depth: Option<usize>,
        budget: &Budget,
    ) -> Result<FindResult, ToolError> {
        let matcher = compile_glob("name_pattern", name_pattern)?;
        let root = self.authorize_root(directory)?;
        let cap = self.resolver.policy().max_search_results();

        let mut files = Vec::new();
        let mut truncated = false;
        let end = walk_allowed_files(
            &self.resolver,
            &root,
            WalkOptions {
                recursive: true,
                max_depth,
            },
            budget,
            |file| {
                if !name_matches(matcher.as_ref(), &file) {
                    return ControlFlow::Continue(());
                }
                if files.len() == cap {
                    truncated = true;
                    return ControlFlow::Break(());
                }
                files.push(file.display());
                ControlFlow::Continue(())
            },
        );

        let completion = Completion::from_flags(truncated, end == WalkEnd::Interrupted);
        info!(count = files.len(), ?completion, "Find completed");
        Ok(FindResult {
            directory: root.display(),
            files,
            completion,
        })
    }

    /// Line-oriented regex search. Binary files are skipped.
    pub fn grep(&self, request: &GrepRequest<'_>, budget: &Budget) -> Result<GrepResult, ToolError> {
        let regex = RegexBuilder::new(request.pattern)
            .case_insensitive(!request.case_sensitive)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|_| ToolError::invalid_argument("pattern", "invalid regular expression"))?;
        let matcher = compile_glob("file_pattern", request.file_pattern)?;
        let root = self.authorize_root(request.directory)?;
        let policy = self.resolver.policy();
        let cap = policy.max_search_results();

        let mut scan = GrepScan {
            regex: &regex,
            cap,
            budget,
            matches: Vec::new(),
            truncated: false,
            interrupted: false,
        };
        let end = walk_allowed_files(
            &self.resolver,
            &root,
            WalkOptions {
                recursive: request.recursive,
                max_depth: None,
            },
            budget,
            |file| {
                if !name_matches(matcher.as_ref(), &file) {
                    return ControlFlow::Continue(());
                }
                let bytes = match read_text_file(
                    &file,
                    policy.max_file_size_bytes(),
                    policy.follow_symlinks(),
                ) {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => {
                        debug!("Skipping binary file");
                        return ControlFlow::Continue(());
                    }
                    Err(err) => {
                        debug!(kind = %err.kind(), "Skipping unreadable file");
                        return ControlFlow::Continue(());
                    }
                };
                scan.scan_file(&file, &bytes)
            },
        );

        let timed_out = end == WalkEnd::Interrupted || scan.interrupted;
        let completion = Completion::from_flags(scan.truncated, timed_out);
        info!(count = scan.matches.len(), ?completion, "Grep completed");
        Ok(GrepResult {
            directory: root.display(),
            matches: scan.matches,
            completion,
        })
    }

    fn authorize_root(&self, directory: &str) -> Result<AllowedPath, ToolError> {
        authorize_directory(&self.resolver, directory).inspect_err(|err| {
            warn!(kind = %err.kind(), "Search root denied");
        })
    }
}

struct GrepScan<'a> {
    regex: &'a Regex,
    cap: usize,
    budget: &'a Budget,
    matches: Vec<GrepMatch>,
    truncated: bool,
    interrupted: bool,
}

impl GrepScan<'_> {
    fn scan_file(&mut self, file: &AllowedPath, bytes: &[u8]) -> ControlFlow<()> {
        let text = String::from_utf8_lossy(bytes);
        let display = file.display();
        for (idx, line) in text.lines().enumerate() {
            if idx % LINES_PER_BUDGET_CHECK == 0 && idx > 0 && self.budget.exhausted() {
                self.interrupted = true;
                return ControlFlow::Break(());
            }
            if !self.regex.is_match(line) {
                continue;
            }
            if self.matches.len() == self.cap {
                self.truncated = true;
                return ControlFlow::Break(());
            }
            self.matches.push(GrepMatch {
                file: display.clone(),
                line: idx + 1,
                content: line.to_string(),
            });
        }
        ControlFlow::Continue(())
    }
}

fn compile_glob(key: &str, pattern: Option<&str>) -> Result<Option<GlobMatcher>, ToolError> {
    match pattern {
        None | Some("" | "*") => Ok(None),
        Some(raw) => Glob::new(raw)
            .map(|glob| Some(glob.compile_matcher()))
            .map_err(|_| ToolError::invalid_argument(key, "invalid glob pattern")),
    }
}

fn name_matches(matcher: Option<&GlobMatcher>, file: &AllowedPath) -> bool {
    let Some(matcher) = matcher else {
        return true;
    };
    file.path
        .file_name()
        .is_some_and(|name| matcher.is_match(name))
}

/// Read a file for scanning, or `None` when it looks binary.
fn read_text_file(
    file: &AllowedPath,
    limit: u64,
    follow_symlinks: bool,
) -> Result<Option<Vec<u8>>, ToolError> {
    let bytes = read_bounded(&file.path, limit, follow_symlinks)?;
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if head.contains(&0) {
        return Ok(None);
    }
    Ok(Some(bytes))
}
