//! Path canonicalization and classification against an [`AccessPolicy`].
//!
//! Every admit/deny decision in this crate goes through [`PathResolver`]. The
//! checks run in a fixed order so the reason reported is the least revealing
//! one that applies:
//!
//! 1. master switch, malformed input
//! 2. canonicalization of the parent chain as written, so a symlink is
//!    followed before any `..` after it; the final component is left
//!    unresolved
//! 3. whitelist membership (component-wise, every enclosing layer)
//! 4. final-component symlink policy
//! 5. denial patterns over the full path
//! 6. extension and size of an existing file
//!
//! Nothing is cached: the filesystem can change between calls.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use warden_types::{
    AccessPolicy, DenialReason, contains_unsafe_path_chars, normalize_extension,
    normalize_lexically,
};

use crate::ToolError;

/// What the caller intends to do with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read a file or enumerate a directory.
    Read,
    /// Create, overwrite, append to or delete a file.
    WriteFile,
    /// Create or delete a directory.
    WriteDirectory,
}

impl Access {
    const fn is_write(self) -> bool {
        matches!(self, Self::WriteFile | Self::WriteDirectory)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

/// Outcome of resolving one input path. Produced per call, never stored.
#[derive(Debug)]
pub struct ResolvedTarget {
    canonical: Option<PathBuf>,
    root: Option<PathBuf>,
    decision: Decision,
    metadata: Option<Metadata>,
}

impl ResolvedTarget {
    fn denied(reason: DenialReason) -> Self {
        Self {
            canonical: None,
            root: None,
            decision: Decision::Denied(reason),
            metadata: None,
        }
    }

    fn denied_inside(canonical: PathBuf, root: PathBuf, reason: DenialReason) -> Self {
        Self {
            canonical: Some(canonical),
            root: Some(root),
            decision: Decision::Denied(reason),
            metadata: None,
        }
    }

    /// Canonical path, present only when it lies inside the whitelist.
    #[must_use]
    pub fn canonical(&self) -> Option<&Path> {
        self.canonical.as_deref()
    }

    /// The allowed directory (canonical) that contains the target.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    #[must_use]
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }

    pub fn into_allowed(self) -> Result<AllowedPath, ToolError> {
        match (self.decision, self.canonical, self.root) {
            (Decision::Allowed, Some(path), Some(root)) => Ok(AllowedPath {
                path,
                root,
                metadata: self.metadata,
            }),
            (Decision::Denied(reason), _, _) => Err(ToolError::Denied(reason)),
            // An allowed decision always carries both paths.
            (Decision::Allowed, _, _) => Err(ToolError::Denied(DenialReason::OutsideWhitelist)),
        }
    }
}

/// A path that passed every check, with the `lstat` taken while checking.
#[derive(Debug)]
pub struct AllowedPath {
    pub path: PathBuf,
    pub root: PathBuf,
    /// `None` when the target does not exist.
    pub metadata: Option<Metadata>,
}

impl AllowedPath {
    #[must_use]
    pub fn exists(&self) -> bool {
        self.metadata.is_some()
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.metadata.as_ref().is_some_and(Metadata::is_file)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.metadata.as_ref().is_some_and(Metadata::is_dir)
    }

    #[must_use]
    pub fn display(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Whitelist roots canonicalized once for a call (or a traversal).
#[derive(Debug, Clone)]
pub struct Scope {
    configured: Vec<PathBuf>,
    roots: Vec<PathBuf>,
    layers: Vec<Vec<PathBuf>>,
}

impl Scope {
    fn new(policy: &AccessPolicy) -> Self {
        let canonical_all = |dirs: &[PathBuf]| -> Vec<PathBuf> {
            dirs.iter()
                .filter_map(|dir| fs::canonicalize(dir).ok())
                .collect()
        };
        Self {
            configured: policy.allowed_directories().to_vec(),
            roots: canonical_all(policy.allowed_directories()),
            layers: policy
                .enclosing_layers()
                .iter()
                .map(|layer| canonical_all(layer))
                .collect(),
        }
    }

    fn root_for(&self, canonical: &Path) -> Option<&Path> {
        let root = self
            .roots
            .iter()
            .filter(|root| canonical.starts_with(root))
            .max_by_key(|root| root.components().count())?;
        let in_every_layer = self
            .layers
            .iter()
            .all(|layer| layer.iter().any(|dir| canonical.starts_with(dir)));
        in_every_layer.then_some(root.as_path())
    }

    /// Literal (pre-symlink) membership, used to tell an escape from a miss.
    fn lexically_inside(&self, path: &Path) -> bool {
        self.configured
            .iter()
            .chain(self.roots.iter())
            .any(|dir| path.starts_with(dir))
    }

    #[must_use]
    pub fn is_root(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| root == canonical)
            || self.layers.iter().flatten().any(|dir| dir == canonical)
    }
}

/// Resolves caller-supplied paths against a shared, immutable policy.
#[derive(Debug, Clone)]
pub struct PathResolver {
    policy: Arc<AccessPolicy>,
}

impl PathResolver {
    #[must_use]
    pub fn new(policy: Arc<AccessPolicy>) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(&self.policy)
    }

    /// Resolve a caller-supplied path string.
    #[must_use]
    pub fn resolve(&self, input: &str, access: Access) -> ResolvedTarget {
        if !self.policy.enabled() {
            return ResolvedTarget::denied(DenialReason::Disabled);
        }
        match self.absolutize(input) {
            Ok(path) => self.check(&self.scope(), &path, access),
            Err(reason) => ResolvedTarget::denied(reason),
        }
    }

    /// Check an absolute path produced by a traversal under `scope`.
    #[must_use]
    pub fn resolve_entry(&self, scope: &Scope, path: &Path, access: Access) -> ResolvedTarget {
        if !self.policy.enabled() {
            return ResolvedTarget::denied(DenialReason::Disabled);
        }
        if !path.is_absolute() {
            return ResolvedTarget::denied(DenialReason::Malformed {
                detail: "path is not absolute",
            });
        }
        self.check(scope, path, access)
    }

    fn absolutize(&self, input: &str) -> Result<PathBuf, DenialReason> {
        if input.is_empty() {
            return Err(DenialReason::Malformed {
                detail: "path is empty",
            });
        }
        if contains_unsafe_path_chars(input) {
            return Err(DenialReason::Malformed {
                detail: "path contains control or invisible characters",
            });
        }

        let expanded = if input == "~" {
            home_dir()?
        } else if let Some(rest) = input.strip_prefix("~/") {
            home_dir()?.join(rest)
        } else {
            PathBuf::from(input)
        };

        if expanded.is_absolute() {
            return Ok(expanded);
        }
        let base = self
            .policy
            .allowed_directories()
            .first()
            .ok_or(DenialReason::Malformed {
                detail: "relative path with no allowed directory to resolve against",
            })?;
        Ok(base.join(expanded))
    }

    fn check(&self, scope: &Scope, path: &Path, access: Access) -> ResolvedTarget {
        // Text-only form, used to classify escapes and match patterns. Never
        // used to locate the target.
        let lexical = normalize_lexically(path);

        let anchored = match canonicalize_parent(path) {
            Ok(path) => path,
            Err(_) => {
                return ResolvedTarget::denied(DenialReason::Malformed {
                    detail: "path cannot be resolved",
                });
            }
        };

        let (canonical, final_symlink, metadata) = match fs::symlink_metadata(&anchored) {
            Ok(meta) if meta.file_type().is_symlink() => {
                if access.is_write() || !self.policy.follow_symlinks() {
                    (anchored.clone(), true, None)
                } else {
                    match fs::canonicalize(&anchored) {
                        Ok(target) => {
                            let meta = fs::metadata(&target).ok();
                            (target, false, meta)
                        }
                        // Dangling or looping link.
                        Err(_) => return ResolvedTarget::denied(DenialReason::SymlinkEscape),
                    }
                }
            }
            Ok(meta) => (anchored.clone(), false, Some(meta)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (anchored.clone(), false, None),
            Err(_) => {
                return ResolvedTarget::denied(DenialReason::Malformed {
                    detail: "path cannot be resolved",
                });
            }
        };

        let Some(root) = scope.root_for(&canonical).map(Path::to_path_buf) else {
            let reason = if scope.lexically_inside(&lexical) || scope.lexically_inside(&anchored) {
                DenialReason::SymlinkEscape
            } else {
                DenialReason::OutsideWhitelist
            };
            return ResolvedTarget::denied(reason);
        };

        if final_symlink {
            return ResolvedTarget::denied(DenialReason::SymlinkEscape);
        }

        let matched = [&canonical, &anchored, &lexical]
            .into_iter()
            .find_map(|p| self.policy.matched_denied_pattern(&p.to_string_lossy()));
        if let Some(pattern) = matched {
            return ResolvedTarget::denied_inside(
                canonical,
                root,
                DenialReason::BlockedPattern {
                    pattern: pattern.to_string(),
                },
            );
        }

        let is_file = metadata.as_ref().is_some_and(Metadata::is_file);
        match access {
            Access::Read if is_file => {
                let extension = extension_of(&canonical);
                if !self.policy.extension_allowed(&extension) {
                    return ResolvedTarget::denied_inside(
                        canonical,
                        root,
                        DenialReason::ExtensionNotAllowed { extension },
                    );
                }
                let size = metadata.as_ref().map_or(0, Metadata::len);
                let limit = self.policy.max_file_size_bytes();
                if size > limit {
                    return ResolvedTarget::denied_inside(
                        canonical,
                        root,
                        DenialReason::FileTooLarge { size, limit },
                    );
                }
            }
            Access::WriteFile => {
                let extension = extension_of(&canonical);
                if !self.policy.write_extension_allowed(&extension) {
                    return ResolvedTarget::denied_inside(
                        canonical,
                        root,
                        DenialReason::ExtensionNotAllowed { extension },
                    );
                }
            }
            Access::Read | Access::WriteDirectory => {}
        }

        ResolvedTarget {
            canonical: Some(canonical),
            root: Some(root),
            decision: Decision::Allowed,
            metadata,
        }
    }
}

fn home_dir() -> Result<PathBuf, DenialReason> {
    dirs::home_dir().ok_or(DenialReason::Malformed {
        detail: "home directory is unavailable",
    })
}

/// Normalized extension of a file name (`".py"`), or `""` when there is none.
#[must_use]
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| normalize_extension(&ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Canonicalize everything but the final component.
///
/// Works on the path as written: the OS resolves each existing component in
/// order, so `link/..` lands wherever `link` points. Walks up to the nearest
/// existing ancestor so paths that do not exist yet still resolve. The missing
/// tail cannot contain symlinks, and a `..` inside it is refused.
fn canonicalize_parent(path: &Path) -> io::Result<PathBuf> {
    let Some(file_name) = path.file_name() else {
        return fs::canonicalize(path);
    };
    let parent = path.parent().unwrap_or(path);

    let mut missing = Vec::new();
    let mut existing = parent;
    loop {
        match fs::symlink_metadata(existing) {
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // `None` for a trailing `..` below a missing directory.
                let Some(name) = existing.file_name() else {
                    return Err(err);
                };
                missing.push(name);
                existing = existing.parent().ok_or(err)?;
            }
            Err(err) => return Err(err),
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    for part in missing.into_iter().rev() {
        resolved.push(part);
    }
    resolved.push(file_name);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap().join("repo");
        fs::create_dir(&root).unwrap();
        (dir, root)
    }

    fn resolver_for(root: &Path) -> PathResolver {
        let policy = AccessPolicy::builder()
            .allow_directory(root)
            .max_file_size_bytes(16)
            .build()
            .unwrap();
        PathResolver::new(Arc::new(policy))
    }

    fn reason(target: &ResolvedTarget) -> Option<&DenialReason> {
        match target.decision() {
            Decision::Allowed => None,
            Decision::Denied(reason) => Some(reason),
        }
    }

    #[test]
    fn file_inside_root_is_allowed() {
        let (_dir, root) = setup();
        fs::write(root.join("main.py"), "print()").unwrap();
        let target = resolver_for(&root).resolve(&root.join("main.py").to_string_lossy(), Access::Read);
        assert!(target.is_allowed());
        assert_eq!(target.canonical(), Some(root.join("main.py").as_path()));
        assert_eq!(target.root(), Some(root.as_path()));
    }

    #[test]
    fn root_itself_is_allowed() {
        let (_dir, root) = setup();
        let target = resolver_for(&root).resolve(&root.to_string_lossy(), Access::Read);
        assert!(target.is_allowed());
    }

    #[test]
    fn relative_paths_join_first_root() {
        let (_dir, root) = setup();
        fs::write(root.join("a.txt"), "x").unwrap();
        let target = resolver_for(&root).resolve("./a.txt", Access::Read);
        assert_eq!(target.canonical(), Some(root.join("a.txt").as_path()));
    }

    #[test]
    fn dot_dot_escape_is_outside() {
        let (_dir, root) = setup();
        let resolver = resolver_for(&root);
        let target = resolver.resolve("../../../../etc/passwd", Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::OutsideWhitelist));
        assert!(target.canonical().is_none());
    }

    #[test]
    fn dot_dot_inside_missing_tail_is_refused() {
        let (_dir, root) = setup();
        fs::write(root.join("main.py"), "x").unwrap();
        let resolver = resolver_for(&root);
        let target = resolver.resolve("missing/../main.py", Access::Read);
        assert!(matches!(reason(&target), Some(DenialReason::Malformed { .. })));
        let target = resolver.resolve("missing/../new/file.py", Access::WriteFile);
        assert!(matches!(reason(&target), Some(DenialReason::Malformed { .. })));
    }

    #[test]
    fn dot_dot_through_existing_directory_resolves() {
        let (_dir, root) = setup();
        fs::create_dir(root.join("pkg")).unwrap();
        fs::write(root.join("main.py"), "x").unwrap();
        let target = resolver_for(&root).resolve("pkg/../main.py", Access::Read);
        assert!(target.is_allowed());
        assert_eq!(target.canonical(), Some(root.join("main.py").as_path()));
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let (_dir, root) = setup();
        let evil = root.with_file_name("repo-evil");
        fs::create_dir(&evil).unwrap();
        fs::write(evil.join("a.txt"), "x").unwrap();
        let target = resolver_for(&root).resolve(&evil.join("a.txt").to_string_lossy(), Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::OutsideWhitelist));
    }

    #[test]
    fn malformed_inputs() {
        let (_dir, root) = setup();
        let resolver = resolver_for(&root);
        for input in ["", "a\0b", "a\nb", "ma\u{200b}in.py", "\u{202e}yp.niam"] {
            let target = resolver.resolve(input, Access::Read);
            assert!(matches!(reason(&target), Some(DenialReason::Malformed { .. })));
        }
    }

    #[test]
    fn empty_whitelist_denies_everything() {
        let policy = AccessPolicy::builder().build().unwrap();
        let resolver = PathResolver::new(Arc::new(policy));
        let target = resolver.resolve("/", Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::OutsideWhitelist));
        let target = resolver.resolve("relative.txt", Access::Read);
        assert!(matches!(reason(&target), Some(DenialReason::Malformed { .. })));
    }

    #[test]
    fn disabled_policy_denies() {
        let (_dir, root) = setup();
        let policy = AccessPolicy::builder()
            .allow_directory(&root)
            .enabled(false)
            .build()
            .unwrap();
        let target = PathResolver::new(Arc::new(policy)).resolve(&root.to_string_lossy(), Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::Disabled));
    }

    #[test]
    fn blocked_pattern_reports_canonical_path() {
        let (_dir, root) = setup();
        fs::write(root.join(".env"), "KEY=1").unwrap();
        let target = resolver_for(&root).resolve(".env", Access::Read);
        assert_eq!(
            reason(&target),
            Some(&DenialReason::BlockedPattern {
                pattern: ".env".to_string()
            })
        );
        assert_eq!(target.canonical(), Some(root.join(".env").as_path()));
    }

    #[test]
    fn size_boundary() {
        let (_dir, root) = setup();
        fs::write(root.join("exact.txt"), [b'a'; 16]).unwrap();
        fs::write(root.join("over.txt"), [b'a'; 17]).unwrap();
        let resolver = resolver_for(&root);
        assert!(resolver.resolve("exact.txt", Access::Read).is_allowed());
        assert_eq!(
            reason(&resolver.resolve("over.txt", Access::Read)),
            Some(&DenialReason::FileTooLarge {
                size: 17,
                limit: 16
            })
        );
    }

    #[test]
    fn missing_files_resolve_without_metadata() {
        let (_dir, root) = setup();
        let allowed = resolver_for(&root)
            .resolve("new/dir/file.txt", Access::WriteFile)
            .into_allowed()
            .unwrap();
        assert_eq!(allowed.path, root.join("new/dir/file.txt"));
        assert!(!allowed.exists());
    }

    #[test]
    fn narrowed_policy_keeps_outer_layer() {
        let (_dir, root) = setup();
        let inner = root.join("student");
        fs::create_dir(&inner).unwrap();
        fs::write(root.join("other.txt"), "x").unwrap();
        fs::write(inner.join("mine.txt"), "x").unwrap();

        let policy = AccessPolicy::builder()
            .allow_directory(&root)
            .build()
            .unwrap()
            .narrowed([inner.clone()], Vec::<String>::new())
            .unwrap();
        let resolver = PathResolver::new(Arc::new(policy));
        assert!(resolver.resolve("mine.txt", Access::Read).is_allowed());
        assert_eq!(
            reason(&resolver.resolve(&root.join("other.txt").to_string_lossy(), Access::Read)),
            Some(&DenialReason::OutsideWhitelist)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_an_escape() {
        let (dir, root) = setup();
        let outside = fs::canonicalize(dir.path()).unwrap().join("outside.txt");
        fs::write(&outside, "secret").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link.txt")).unwrap();

        let target = resolver_for(&root).resolve("link.txt", Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::SymlinkEscape));

        let policy = AccessPolicy::builder()
            .allow_directory(&root)
            .follow_symlinks(true)
            .build()
            .unwrap();
        let target = PathResolver::new(Arc::new(policy)).resolve("link.txt", Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::SymlinkEscape));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_depends_on_follow_flag() {
        let (_dir, root) = setup();
        fs::write(root.join("real.txt"), "ok").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("alias.txt")).unwrap();

        let strict = resolver_for(&root).resolve("alias.txt", Access::Read);
        assert_eq!(reason(&strict), Some(&DenialReason::SymlinkEscape));

        let policy = AccessPolicy::builder()
            .allow_directory(&root)
            .follow_symlinks(true)
            .build()
            .unwrap();
        let resolver = PathResolver::new(Arc::new(policy));
        let followed = resolver.resolve("alias.txt", Access::Read);
        assert_eq!(followed.canonical(), Some(root.join("real.txt").as_path()));
        // Writes never go through a final symlink.
        assert_eq!(
            reason(&resolver.resolve("alias.txt", Access::WriteFile)),
            Some(&DenialReason::SymlinkEscape)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_parent_directory_is_resolved() {
        let (dir, root) = setup();
        let outside = fs::canonicalize(dir.path()).unwrap().join("elsewhere");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("data.txt"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("sub")).unwrap();

        let target = resolver_for(&root).resolve("sub/data.txt", Access::Read);
        assert_eq!(reason(&target), Some(&DenialReason::SymlinkEscape));
    }

    #[cfg(unix)]
    #[test]
    fn dot_dot_after_symlinked_directory_follows_the_link() {
        let (dir, root) = setup();
        let base = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(base.join("outside/deep")).unwrap();
        fs::write(base.join("outside/main.py"), "OUTSIDE").unwrap();
        fs::write(root.join("main.py"), "inside").unwrap();
        std::os::unix::fs::symlink(base.join("outside/deep"), root.join("link")).unwrap();

        // On paper this is `<root>/main.py`; the OS lands in `outside/`.
        for follow in [false, true] {
            let policy = AccessPolicy::builder()
                .allow_directory(&root)
                .follow_symlinks(follow)
                .build()
                .unwrap();
            let resolver = PathResolver::new(Arc::new(policy));
            let target = resolver.resolve("link/../main.py", Access::Read);
            assert_eq!(reason(&target), Some(&DenialReason::SymlinkEscape));
            assert!(target.canonical().is_none());
            let target = resolver.resolve("link/../new.py", Access::WriteFile);
            assert_eq!(reason(&target), Some(&DenialReason::SymlinkEscape));
        }
    }
}
