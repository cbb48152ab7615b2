//! The closed set of operations the dispatcher can run.

use crate::{AccessPolicy, ArgKind, ArgumentSpec, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadFile,
    ListFiles,
    SearchCode,
    FindFiles,
    CheckFileAccess,
    WriteFile,
    AppendFile,
    CreateDirectory,
    DeleteFile,
    DeleteDirectory,
}

/// Whether an operation is always offered or needs a policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Read,
    Write,
    Delete,
}

const READ_FILE_ARGS: &[ArgumentSpec] = &[ArgumentSpec::required(
    "path",
    ArgKind::String,
    "Path to the file to read (relative to the first allowed directory, or absolute)",
)];

const LIST_FILES_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("directory", ArgKind::String, "Directory path to list"),
    ArgumentSpec::optional(
        "recursive",
        ArgKind::Boolean,
        "Whether to list files recursively (default: false)",
    ),
];

const SEARCH_CODE_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required(
        "pattern",
        ArgKind::String,
        "Regular expression pattern to search for",
    ),
    ArgumentSpec::required("directory", ArgKind::String, "Directory to search in"),
    ArgumentSpec::optional(
        "file_pattern",
        ArgKind::String,
        "File name glob (e.g. '*.py', '*.js'). Default: '*'",
    ),
    ArgumentSpec::optional(
        "case_sensitive",
        ArgKind::Boolean,
        "Whether the search is case-sensitive (default: true)",
    ),
    ArgumentSpec::optional(
        "recursive",
        ArgKind::Boolean,
        "Whether to search subdirectories (default: true)",
    ),
];

const FIND_FILES_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("directory", ArgKind::String, "Directory to search in"),
    ArgumentSpec::optional(
        "name_pattern",
        ArgKind::String,
        "File name glob (e.g. '*.py', 'test_*.js'). Default: '*'",
    ),
    ArgumentSpec::optional(
        "max_depth",
        ArgKind::Integer,
        "Maximum directory depth below the search root; 0 lists only its own files (default: unlimited)",
    ),
];

const CHECK_FILE_ACCESS_ARGS: &[ArgumentSpec] = &[ArgumentSpec::required(
    "path",
    ArgKind::String,
    "File path to check",
)];

const WRITE_FILE_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("path", ArgKind::String, "Path to the file to write"),
    ArgumentSpec::required("content", ArgKind::String, "Content to write to the file"),
    ArgumentSpec::optional(
        "create_parents",
        ArgKind::Boolean,
        "Create parent directories if they don't exist (default: true)",
    ),
];

const APPEND_FILE_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("path", ArgKind::String, "Path to the file to append to"),
    ArgumentSpec::required("content", ArgKind::String, "Content to append"),
];

const CREATE_DIRECTORY_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("path", ArgKind::String, "Directory to create"),
    ArgumentSpec::optional(
        "parents",
        ArgKind::Boolean,
        "Create missing parent directories (default: true)",
    ),
];

const DELETE_FILE_ARGS: &[ArgumentSpec] = &[ArgumentSpec::required(
    "path",
    ArgKind::String,
    "Path to the file to delete",
)];

const DELETE_DIRECTORY_ARGS: &[ArgumentSpec] = &[
    ArgumentSpec::required("path", ArgKind::String, "Directory to delete"),
    ArgumentSpec::optional(
        "recursive",
        ArgKind::Boolean,
        "Delete the directory and everything in it (default: false)",
    ),
];

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::ReadFile,
        Operation::ListFiles,
        Operation::SearchCode,
        Operation::FindFiles,
        Operation::CheckFileAccess,
        Operation::WriteFile,
        Operation::AppendFile,
        Operation::CreateDirectory,
        Operation::DeleteFile,
        Operation::DeleteDirectory,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::ListFiles => "list_files",
            Self::SearchCode => "search_code",
            Self::FindFiles => "find_files",
            Self::CheckFileAccess => "check_file_access",
            Self::WriteFile => "write_file",
            Self::AppendFile => "append_file",
            Self::CreateDirectory => "create_directory",
            Self::DeleteFile => "delete_file",
            Self::DeleteDirectory => "delete_directory",
        }
    }

    /// Exact-match lookup. Unknown names return `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    #[must_use]
    pub const fn gate(self) -> Gate {
        match self {
            Self::ReadFile
            | Self::ListFiles
            | Self::SearchCode
            | Self::FindFiles
            | Self::CheckFileAccess => Gate::Read,
            Self::WriteFile | Self::AppendFile | Self::CreateDirectory => Gate::Write,
            Self::DeleteFile | Self::DeleteDirectory => Gate::Delete,
        }
    }

    /// Read operations are always offered (a disabled policy answers with
    /// denials); write and delete operations only when their gate is open.
    #[must_use]
    pub fn is_available(self, policy: &AccessPolicy) -> bool {
        match self.gate() {
            Gate::Read => true,
            Gate::Write => policy.allow_write(),
            Gate::Delete => policy.allow_delete(),
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ReadFile => {
                "Read the contents of a file. Only files inside the allowed directories can be read."
            }
            Self::ListFiles => {
                "List files in a directory. Use this to explore the repository structure."
            }
            Self::SearchCode => {
                "Search for a regular expression in files. Returns matching lines with file paths and line numbers."
            }
            Self::FindFiles => "Find files by name pattern. Use this to locate specific files.",
            Self::CheckFileAccess => {
                "Check whether a file can be read without reading it. Returns the reason when access is denied."
            }
            Self::WriteFile => {
                "Write content to a file. Creates the file if it doesn't exist, overwrites it if it does."
            }
            Self::AppendFile => "Append content to the end of a file, creating it if needed.",
            Self::CreateDirectory => "Create a directory.",
            Self::DeleteFile => "Delete a file.",
            Self::DeleteDirectory => "Delete a directory. Non-empty directories need recursive=true.",
        }
    }

    #[must_use]
    pub const fn arguments(self) -> &'static [ArgumentSpec] {
        match self {
            Self::ReadFile => READ_FILE_ARGS,
            Self::ListFiles => LIST_FILES_ARGS,
            Self::SearchCode => SEARCH_CODE_ARGS,
            Self::FindFiles => FIND_FILES_ARGS,
            Self::CheckFileAccess => CHECK_FILE_ACCESS_ARGS,
            Self::WriteFile => WRITE_FILE_ARGS,
            Self::AppendFile => APPEND_FILE_ARGS,
            Self::CreateDirectory => CREATE_DIRECTORY_ARGS,
            Self::DeleteFile => DELETE_FILE_ARGS,
            Self::DeleteDirectory => DELETE_DIRECTORY_ARGS,
        }
    }

    #[must_use]
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition::from_args(self.name(), self.description(), self.arguments())
    }

    /// Descriptors for every operation the policy makes available.
    #[must_use]
    pub fn available(policy: &AccessPolicy) -> Vec<ToolDefinition> {
        Self::ALL
            .into_iter()
            .filter(|op| op.is_available(policy))
            .map(Self::definition)
            .collect()
    }
}
