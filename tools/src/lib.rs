//! Filesystem access engine for Warden.
//!
//! Turns caller-supplied paths and patterns into either a bounded filesystem
//! operation or a structured refusal:
//!
//! - [`PathResolver`] canonicalizes and classifies every path against the
//!   immutable [`AccessPolicy`](warden_types::AccessPolicy).
//! - [`FileReader`], [`SearchEngine`] and [`FileWriter`] perform the actual
//!   work, asking the resolver before every file and every directory entered.
//! - [`ToolDispatcher`] is the only surface meant for untrusted callers: a
//!   closed operation set, validated arguments, uniform envelopes.

mod dispatcher;
mod error;
mod reader;
mod resolver;
mod search;
mod walk;
mod writer;

pub use dispatcher::{ToolDispatcher, ValidatedArgs};
pub use error::ToolError;
pub use reader::{AccessCheck, BatchItem, FileContent, FileReader, Listing};
pub use resolver::{
    Access, AllowedPath, Decision, PathResolver, ResolvedTarget, Scope, extension_of,
};
pub use search::{FindResult, GrepMatch, GrepRequest, GrepResult, SearchEngine};
pub use walk::{Budget, Completion};
pub use writer::{FileWriter, PathReceipt, WriteReceipt};
