//! Error taxonomy and access-denial reasons.
//!
//! Every failure that crosses the dispatcher boundary is reduced to one of the
//! stable [`ErrorKind`] codes. Denial messages describe *why* a request was
//! refused (pattern, extension, size, whitelist) and never echo filesystem
//! paths.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, machine-readable failure codes.
///
/// Serialized in PascalCase (`"BlockedPattern"`, `"IOFailure"`, ...). These
/// strings are part of the envelope contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidPath,
    AccessDenied,
    BlockedPattern,
    ExtensionNotAllowed,
    FileTooLarge,
    SymlinkEscape,
    UnknownOperation,
    InvalidArguments,
    Timeout,
    #[serde(rename = "IOFailure")]
    IoFailure,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPath => "InvalidPath",
            Self::AccessDenied => "AccessDenied",
            Self::BlockedPattern => "BlockedPattern",
            Self::ExtensionNotAllowed => "ExtensionNotAllowed",
            Self::FileTooLarge => "FileTooLarge",
            Self::SymlinkEscape => "SymlinkEscape",
            Self::UnknownOperation => "UnknownOperation",
            Self::InvalidArguments => "InvalidArguments",
            Self::Timeout => "Timeout",
            Self::IoFailure => "IOFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the resolver (or a gated operation) refused a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// Empty input, control characters, or no base to resolve a relative path.
    Malformed { detail: &'static str },
    /// Canonical path is not within any allowed directory.
    OutsideWhitelist,
    /// Path lies under an allowed directory literally but a symlink leads out
    /// of it, or a final-component symlink is refused by policy.
    SymlinkEscape,
    BlockedPattern { pattern: String },
    ExtensionNotAllowed { extension: String },
    FileTooLarge { size: u64, limit: u64 },
    /// The target exists but is the wrong kind (directory vs regular file).
    WrongFileType { expected: FileTypeExpectation },
    /// The master switch is off.
    Disabled,
    WriteDisabled,
    DeleteDisabled,
    /// An allowed directory root itself may not be removed.
    ProtectedRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTypeExpectation {
    RegularFile,
    Directory,
}

impl DenialReason {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed { .. } | Self::WrongFileType { .. } => ErrorKind::InvalidPath,
            Self::OutsideWhitelist
            | Self::Disabled
            | Self::WriteDisabled
            | Self::DeleteDisabled
            | Self::ProtectedRoot => ErrorKind::AccessDenied,
            Self::SymlinkEscape => ErrorKind::SymlinkEscape,
            Self::BlockedPattern { .. } => ErrorKind::BlockedPattern,
            Self::ExtensionNotAllowed { .. } => ErrorKind::ExtensionNotAllowed,
            Self::FileTooLarge { .. } => ErrorKind::FileTooLarge,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { detail } => write!(f, "Invalid path: {detail}"),
            Self::OutsideWhitelist => f.write_str("Path is not within allowed directories"),
            Self::SymlinkEscape => f.write_str("Symbolic link leaves allowed directories"),
            Self::BlockedPattern { pattern } => {
                write!(f, "Path matches blocked pattern: {pattern}")
            }
            Self::ExtensionNotAllowed { extension } => {
                if extension.is_empty() {
                    f.write_str("Files without an extension are not allowed")
                } else {
                    write!(f, "File extension {extension} not allowed")
                }
            }
            Self::FileTooLarge { size, limit } => {
                write!(f, "File too large ({size} bytes > {limit} bytes)")
            }
            Self::WrongFileType { expected } => match expected {
                FileTypeExpectation::RegularFile => f.write_str("Path is not a regular file"),
                FileTypeExpectation::Directory => f.write_str("Path is not a directory"),
            },
            Self::Disabled => f.write_str("Filesystem access is disabled"),
            Self::WriteDisabled => f.write_str("Write operations are disabled"),
            Self::DeleteDisabled => f.write_str("Delete operations are disabled"),
            Self::ProtectedRoot => f.write_str("Allowed directory roots cannot be removed"),
        }
    }
}
