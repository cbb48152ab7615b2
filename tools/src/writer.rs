//! Gated write, append, mkdir and delete operations.
//!
//! Targets go through the same resolver as reads. On top of that, writes never
//! follow a final-component symlink, directories created on the way are
//! re-checked after creation, and allowed roots cannot be removed.

use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::Path;

use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{info, warn};
use warden_types::{DenialReason, FileTypeExpectation};

use crate::ToolError;
use crate::resolver::{Access, AllowedPath, PathResolver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathReceipt {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Truncate,
    Append,
}

#[derive(Debug, Clone)]
pub struct FileWriter {
    resolver: PathResolver,
}

impl FileWriter {
    #[must_use]
    pub fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    fn ensure_write_enabled(&self) -> Result<(), ToolError> {
        let policy = self.resolver.policy();
        if !policy.enabled() {
            return Err(DenialReason::Disabled.into());
        }
        if !policy.allow_write() {
            return Err(DenialReason::WriteDisabled.into());
        }
        Ok(())
    }

    fn ensure_delete_enabled(&self) -> Result<(), ToolError> {
        let policy = self.resolver.policy();
        if !policy.enabled() {
            return Err(DenialReason::Disabled.into());
        }
        if !policy.allow_delete() {
            return Err(DenialReason::DeleteDisabled.into());
        }
        Ok(())
    }

    fn authorize(&self, input: &str, access: Access) -> Result<AllowedPath, ToolError> {
        self.resolver
            .resolve(input, access)
            .into_allowed()
            .inspect_err(|err| warn!(kind = %err.kind(), "Write denied"))
    }

    pub fn write_file(
        &self,
        input: &str,
        content: &str,
        create_parents: bool,
    ) -> Result<WriteReceipt, ToolError> {
        self.ensure_write_enabled()?;
        let size = content.len() as u64;
        let limit = self.resolver.policy().max_write_size_bytes();
        if size > limit {
            return Err(DenialReason::FileTooLarge { size, limit }.into());
        }

        let target = self.authorize(input, Access::WriteFile)?;
        if target.is_dir() {
            return Err(DenialReason::WrongFileType {
                expected: FileTypeExpectation::RegularFile,
            }
            .into());
        }
        self.prepare_parent(&target.path, create_parents)?;

        let mut file = open_for_write(&target.path, WriteMode::Truncate)?;
        file.write_all(content.as_bytes())
            .map_err(|err| ToolError::io(&err))?;
        info!(path = %target.path.display(), size, "Wrote file");
        Ok(WriteReceipt {
            path: target.display(),
            size,
        })
    }

    /// Append to a file, creating it when missing. The resulting file must
    /// stay within the write size limit.
    pub fn append_file(&self, input: &str, content: &str) -> Result<WriteReceipt, ToolError> {
        self.ensure_write_enabled()?;
        let target = self.authorize(input, Access::WriteFile)?;
        if target.is_dir() {
            return Err(DenialReason::WrongFileType {
                expected: FileTypeExpectation::RegularFile,
            }
            .into());
        }

        let existing = target.metadata.as_ref().map_or(0, Metadata::len);
        let size = existing.saturating_add(content.len() as u64);
        let limit = self.resolver.policy().max_write_size_bytes();
        if size > limit {
            return Err(DenialReason::FileTooLarge { size, limit }.into());
        }
        self.prepare_parent(&target.path, false)?;

        let mut file = open_for_write(&target.path, WriteMode::Append)?;
        file.write_all(content.as_bytes())
            .map_err(|err| ToolError::io(&err))?;
        let size = file
            .metadata()
            .map_err(|err| ToolError::io(&err))?
            .len();
        info!(path = %target.path.display(), size, "Appended to file");
        Ok(WriteReceipt {
            path: target.display(),
            size,
        })
    }

    /// Create a directory. An existing directory is not an error.
    pub fn create_directory(&self, input: &str, parents: bool) -> Result<PathReceipt, ToolError> {
        self.ensure_write_enabled()?;
        let target = self.authorize(input, Access::WriteDirectory)?;
        if target.exists() {
            if target.is_dir() {
                return Ok(PathReceipt {
                    path: target.display(),
                });
            }
            return Err(ToolError::io(&io::Error::from(io::ErrorKind::AlreadyExists)));
        }

        let created = if parents {
            fs::create_dir_all(&target.path)
        } else {
            fs::create_dir(&target.path)
        };
        created.map_err(|err| ToolError::io(&err))?;
        self.validate_created(&target.path)?;
        info!(path = %target.path.display(), "Created directory");
        Ok(PathReceipt {
            path: target.display(),
        })
    }

    pub fn delete_file(&self, input: &str) -> Result<PathReceipt, ToolError> {
        self.ensure_delete_enabled()?;
        let target = self.authorize(input, Access::WriteFile)?;
        match &target.metadata {
            None => return Err(ToolError::not_found()),
            Some(meta) if meta.is_file() => {}
            Some(_) => {
                return Err(DenialReason::WrongFileType {
                    expected: FileTypeExpectation::RegularFile,
                }
                .into());
            }
        }
        fs::remove_file(&target.path).map_err(|err| ToolError::io(&err))?;
        info!(path = %target.path.display(), "Deleted file");
        Ok(PathReceipt {
            path: target.display(),
        })
    }

    /// Delete a directory. Recursive deletion is refused when anything
    /// beneath it matches a denial pattern.
    pub fn delete_directory(&self, input: &str, recursive: bool) -> Result<PathReceipt, ToolError> {
        self.ensure_delete_enabled()?;
        let target = self.authorize(input, Access::WriteDirectory)?;
        if !target.exists() {
            return Err(ToolError::Io {
                message: "Directory not found",
            });
        }
        if !target.is_dir() {
            return Err(DenialReason::WrongFileType {
                expected: FileTypeExpectation::Directory,
            }
            .into());
        }
        if target.path == target.root || self.resolver.scope().is_root(&target.path) {
            return Err(DenialReason::ProtectedRoot.into());
        }

        let removed = if recursive {
            self.ensure_no_blocked_descendants(&target.path)?;
            fs::remove_dir_all(&target.path)
        } else {
            fs::remove_dir(&target.path)
        };
        removed.map_err(|err| ToolError::io(&err))?;
        info!(path = %target.path.display(), recursive, "Deleted directory");
        Ok(PathReceipt {
            path: target.display(),
        })
    }

    /// Make sure the parent of `path` exists, creating it when asked.
    fn prepare_parent(&self, path: &Path, create: bool) -> Result<(), ToolError> {
        let parent = path.parent().ok_or(DenialReason::Malformed {
            detail: "path has no parent directory",
        })?;
        match fs::symlink_metadata(parent) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => {
                return Err(DenialReason::WrongFileType {
                    expected: FileTypeExpectation::Directory,
                }
                .into());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(ToolError::io(&err)),
        }
        if !create {
            return Err(ToolError::Io {
                message: "Parent directory not found",
            });
        }
        fs::create_dir_all(parent).map_err(|err| ToolError::io(&err))?;
        self.validate_created(parent)
    }

    /// A directory just created must still canonicalize to where it was
    /// resolved; a symlink swapped into the chain would move it.
    fn validate_created(&self, dir: &Path) -> Result<(), ToolError> {
        let canonical = fs::canonicalize(dir).map_err(|err| ToolError::io(&err))?;
        if canonical != dir {
            warn!("Created directory resolved elsewhere");
            return Err(DenialReason::SymlinkEscape.into());
        }
        self.resolver
            .resolve_entry(&self.resolver.scope(), &canonical, Access::WriteDirectory)
            .into_allowed()
            .map(|_| ())
    }

    fn ensure_no_blocked_descendants(&self, dir: &Path) -> Result<(), ToolError> {
        let policy = self.resolver.policy();
        let mut builder = WalkBuilder::new(dir);
        builder.standard_filters(false).follow_links(false);
        for entry in builder.build().flatten() {
            if let Some(pattern) = policy.matched_denied_pattern(&entry.path().to_string_lossy()) {
                return Err(DenialReason::BlockedPattern {
                    pattern: pattern.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn open_for_write(path: &Path, mode: WriteMode) -> Result<File, ToolError> {
    let mut options = fs::OpenOptions::new();
    options.create(true);
    match mode {
        WriteMode::Truncate => options.write(true).truncate(true),
        WriteMode::Append => options.append(true),
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW);
    }
    options.open(path).map_err(|err| ToolError::io(&err))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use warden_types::{AccessPolicy, AccessPolicyBuilder, ErrorKind};

    use super::*;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    fn writer(builder: AccessPolicyBuilder) -> FileWriter {
        FileWriter::new(PathResolver::new(Arc::new(builder.build().unwrap())))
    }

    fn open_writer(root: &Path) -> FileWriter {
        writer(
            AccessPolicy::builder()
                .allow_directory(root)
                .allow_write(true)
                .allow_delete(true)
                .max_write_size_bytes(32),
        )
    }

    #[test]
    fn gates_are_checked_first() {
        let (_dir, root) = fixture();
        let closed = writer(AccessPolicy::builder().allow_directory(&root));
        let err = closed.write_file("a.txt", "x", true).unwrap_err();
        assert_eq!(err.to_string(), "Write operations are disabled");
        let err = closed.delete_file("a.txt").unwrap_err();
        assert_eq!(err.to_string(), "Delete operations are disabled");

        let off = writer(
            AccessPolicy::builder()
                .allow_directory(&root)
                .allow_write(true)
                .enabled(false),
        );
        let err = off.write_file("a.txt", "x", true).unwrap_err();
        assert_eq!(err.to_string(), "Filesystem access is disabled");
    }

    #[test]
    fn write_creates_parents_and_overwrites() {
        let (_dir, root) = fixture();
        let w = open_writer(&root);
        let receipt = w.write_file("new/dir/a.txt", "hello", true).unwrap();
        assert_eq!(receipt.size, 5);
        assert_eq!(fs::read_to_string(root.join("new/dir/a.txt")).unwrap(), "hello");

        w.write_file("new/dir/a.txt", "bye", true).unwrap();
        assert_eq!(fs::read_to_string(root.join("new/dir/a.txt")).unwrap(), "bye");

        let err = w.write_file("missing/b.txt", "x", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(!root.join("missing").exists());
    }

    #[test]
    fn write_limits_and_patterns() {
        let (_dir, root) = fixture();
        let w = open_writer(&root);
        let err = w.write_file("big.txt", &"x".repeat(33), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
        let err = w.write_file(".env", "A=1", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlockedPattern);
        let err = w.write_file("/etc/evil.txt", "x", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn write_extension_list_falls_back_to_read_list() {
        let (_dir, root) = fixture();
        let w = writer(
            AccessPolicy::builder()
                .allow_directory(&root)
                .allow_write(true)
                .allowed_extensions(["py"]),
        );
        assert!(w.write_file("ok.py", "x", true).is_ok());
        let err = w.write_file("no.sh", "x", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtensionNotAllowed);
    }

    #[test]
    fn append_counts_resulting_size() {
        let (_dir, root) = fixture();
        let w = open_writer(&root);
        assert_eq!(w.append_file("log.txt", &"a".repeat(20)).unwrap().size, 20);
        assert_eq!(w.append_file("log.txt", &"b".repeat(12)).unwrap().size, 32);
        let err = w.append_file("log.txt", "c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    }

    #[test]
    fn directories_create_and_delete() {
        let (_dir, root) = fixture();
        let w = open_writer(&root);
        w.create_directory("a/b", true).unwrap();
        assert!(root.join("a/b").is_dir());
        // Existing directory is fine.
        w.create_directory("a/b", false).unwrap();
        assert!(w.create_directory("x/y", false).is_err());

        fs::write(root.join("a/b/f.txt"), "x").unwrap();
        let err = w.delete_directory("a", false).unwrap_err();
        assert_eq!(err.to_string(), "Directory is not empty");
        w.delete_directory("a", true).unwrap();
        assert!(!root.join("a").exists());
    }

    #[test]
    fn roots_are_protected() {
        let (_dir, root) = fixture();
        let w = open_writer(&root);
        let err = w
            .delete_directory(&root.to_string_lossy(), true)
            .unwrap_err();
        assert_eq!(err.to_string(), "Allowed directory roots cannot be removed");
        assert!(root.exists());
    }

    #[test]
    fn recursive_delete_refuses_blocked_contents() {
        let (_dir, root) = fixture();
        fs::create_dir(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/.env"), "A=1").unwrap();
        let err = open_writer(&root).delete_directory("pkg", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlockedPattern);
        assert!(root.join("pkg/.env").exists());
    }

    #[test]
    fn delete_file_checks_type() {
        let (_dir, root) = fixture();
        let w = open_writer(&root);
        fs::create_dir(root.join("d")).unwrap();
        assert_eq!(
            w.delete_file("d").unwrap_err().kind(),
            ErrorKind::InvalidPath
        );
        assert_eq!(
            w.delete_file("gone.txt").unwrap_err().kind(),
            ErrorKind::IoFailure
        );
        fs::write(root.join("f.txt"), "x").unwrap();
        w.delete_file("f.txt").unwrap();
        assert!(!root.join("f.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn writes_never_follow_final_symlink() {
        let (_dir, root) = fixture();
        let repo = root.join("repo");
        fs::create_dir(&repo).unwrap();
        fs::write(repo.join("real.txt"), "keep").unwrap();
        std::os::unix::fs::symlink(repo.join("real.txt"), repo.join("alias.txt")).unwrap();
        let w = writer(
            AccessPolicy::builder()
                .allow_directory(&repo)
                .allow_write(true)
                .follow_symlinks(true),
        );
        let err = w.write_file("alias.txt", "clobber", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SymlinkEscape);
        assert_eq!(fs::read_to_string(repo.join("real.txt")).unwrap(), "keep");
    }
}
