use std::io;

use warden_types::{DenialReason, ErrorKind};

/// Error types for filesystem operations.
///
/// Messages are safe to hand to the caller: they name the rule that fired,
/// never a filesystem path.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Denied(DenialReason),
    #[error("Invalid argument '{key}': {message}")]
    InvalidArguments { key: String, message: String },
    #[error("Unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error("Operation timed out")]
    Timeout,
    #[error("{message}")]
    Io { message: &'static str },
}

impl ToolError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Denied(reason) => reason.kind(),
            Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::Timeout => ErrorKind::Timeout,
            Self::Io { .. } => ErrorKind::IoFailure,
        }
    }

    pub fn invalid_argument(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Reduce an OS error to its category. The OS message can carry paths.
    #[must_use]
    pub fn io(err: &io::Error) -> Self {
        #[cfg(unix)]
        if err.raw_os_error() == Some(libc::ELOOP) {
            return Self::Denied(DenialReason::SymlinkEscape);
        }
        let message = match err.kind() {
            io::ErrorKind::NotFound => "File not found",
            io::ErrorKind::PermissionDenied => "Permission denied",
            io::ErrorKind::AlreadyExists => "Path already exists",
            io::ErrorKind::DirectoryNotEmpty => "Directory is not empty",
            io::ErrorKind::IsADirectory => "Path is a directory",
            io::ErrorKind::NotADirectory => "Path is not a directory",
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                "File content could not be read"
            }
            io::ErrorKind::StorageFull => "No space left on device",
            io::ErrorKind::ReadOnlyFilesystem => "Filesystem is read-only",
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => "Operation interrupted",
            _ => "I/O error",
        };
        Self::Io { message }
    }

    pub(crate) const fn not_found() -> Self {
        Self::Io {
            message: "File not found",
        }
    }
}

impl From<DenialReason> for ToolError {
    fn from(reason: DenialReason) -> Self {
        Self::Denied(reason)
    }
}
