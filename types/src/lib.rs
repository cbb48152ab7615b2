//! Core domain types for Warden.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the immutable [`AccessPolicy`], the error taxonomy, the
//! result envelope and the closed operation set with its descriptors.

mod denial;
mod envelope;
mod operation;
mod path;
mod policy;
mod tool;

pub use denial::{DenialReason, ErrorKind, FileTypeExpectation};
pub use envelope::ToolResult;
pub use operation::{Gate, Operation};
pub use path::{contains_unsafe_path_chars, is_unsafe_path_char, normalize_lexically};
pub use policy::{
    AccessPolicy, AccessPolicyBuilder, DEFAULT_DENIED_PATTERNS, DEFAULT_MAX_FILE_SIZE_BYTES,
    DEFAULT_MAX_SEARCH_RESULTS, DEFAULT_MAX_WRITE_SIZE_BYTES, DEFAULT_SEARCH_TIMEOUT,
    PolicyError, PolicySummary, default_denied_patterns, normalize_extension,
};
pub use tool::{ArgKind, ArgumentSpec, ToolDefinition, schema_for};
