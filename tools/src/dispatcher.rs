//! Maps operation names and argument bags onto the engine and wraps every
//! outcome in a [`ToolResult`] envelope.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use warden_types::{
    AccessPolicy, ArgKind, ArgumentSpec, ErrorKind, Operation, ToolDefinition, ToolResult,
};

use crate::ToolError;
use crate::reader::FileReader;
use crate::resolver::PathResolver;
use crate::search::{GrepRequest, SearchEngine};
use crate::walk::{Budget, Completion};
use crate::writer::FileWriter;

/// Arguments after validation against an operation's table. Values are
/// already coerced to the declared kind.
#[derive(Debug, Clone, Default)]
pub struct ValidatedArgs {
    values: Map<String, Value>,
}

impl ValidatedArgs {
    pub fn parse(specs: &[ArgumentSpec], raw: &Value) -> Result<Self, ToolError> {
        let empty = Map::new();
        let object = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ToolError::invalid_argument(
                    "arguments",
                    "arguments must be a JSON object",
                ));
            }
        };

        if let Some(key) = object
            .keys()
            .find(|key| !specs.iter().any(|spec| spec.name == key.as_str()))
        {
            return Err(ToolError::invalid_argument(
                truncate_key(key),
                "unexpected argument",
            ));
        }

        let mut values = Map::new();
        for spec in specs {
            match object.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ToolError::invalid_argument(
                            spec.name,
                            "missing required argument",
                        ));
                    }
                }
                Some(value) => {
                    values.insert(spec.name.to_string(), coerce(spec, value)?);
                }
            }
        }
        Ok(Self { values })
    }

    pub fn string(&self, key: &str) -> Result<&str, ToolError> {
        self.opt_string(key)
            .ok_or_else(|| ToolError::invalid_argument(key, "missing required argument"))
    }

    #[must_use]
    pub fn opt_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    #[must_use]
    pub fn opt_usize(&self, key: &str) -> Option<usize> {
        self.values
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
    }
}

fn truncate_key(key: &str) -> String {
    const MAX_KEY_CHARS: usize = 64;
    key.chars().take(MAX_KEY_CHARS).collect()
}

fn coerce(spec: &ArgumentSpec, value: &Value) -> Result<Value, ToolError> {
    match (spec.kind, value) {
        (ArgKind::String, Value::String(_))
        | (ArgKind::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (ArgKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(ToolError::invalid_argument(spec.name, "expected a boolean")),
        },
        (ArgKind::Integer, Value::Number(n)) => n
            .as_u64()
            .map(Value::from)
            .ok_or_else(|| ToolError::invalid_argument(spec.name, "expected a non-negative integer")),
        (ArgKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| ToolError::invalid_argument(spec.name, "expected a non-negative integer")),
        (ArgKind::String, _) => Err(ToolError::invalid_argument(spec.name, "expected a string")),
        (ArgKind::Boolean, _) => Err(ToolError::invalid_argument(spec.name, "expected a boolean")),
        (ArgKind::Integer, _) => Err(ToolError::invalid_argument(
            spec.name,
            "expected a non-negative integer",
        )),
    }
}

fn completion_fields(fields: &mut Map<String, Value>, completion: Completion) {
    fields.insert("truncated".to_string(), Value::Bool(completion.truncated()));
    fields.insert("timed_out".to_string(), Value::Bool(completion.timed_out()));
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn payload<T: Serialize>(value: &T) -> Result<Map<String, Value>, ToolError> {
    serde_json::to_value(value)
        .map(object)
        .map_err(|_| ToolError::Io {
            message: "Failed to encode result",
        })
}

/// Entry point for callers: descriptors out, envelopes back.
///
/// Cheap to clone; every clone shares the same immutable policy.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    policy: Arc<AccessPolicy>,
    reader: FileReader,
    writer: FileWriter,
    search: SearchEngine,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(policy: AccessPolicy) -> Self {
        Self::from_shared(Arc::new(policy))
    }

    #[must_use]
    pub fn from_shared(policy: Arc<AccessPolicy>) -> Self {
        let resolver = PathResolver::new(Arc::clone(&policy));
        Self {
            reader: FileReader::new(resolver.clone()),
            writer: FileWriter::new(resolver.clone()),
            search: SearchEngine::new(resolver),
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Descriptors for the operations this policy offers.
    #[must_use]
    pub fn describe_operations(&self) -> Vec<ToolDefinition> {
        Operation::available(&self.policy)
    }

    pub async fn invoke(&self, name: &str, arguments: &Value) -> ToolResult {
        self.invoke_with_cancel(name, arguments, CancellationToken::new())
            .await
    }

    /// Run one operation. Never panics and never returns an error: every
    /// outcome, including a failed worker, becomes an envelope.
    pub async fn invoke_with_cancel(
        &self,
        name: &str,
        arguments: &Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let op = match self.lookup(name) {
            Ok(op) => op,
            Err(err) => return failure(&err),
        };
        let args = match ValidatedArgs::parse(op.arguments(), arguments) {
            Ok(args) => args,
            Err(err) => return failure(&err),
        };
        if cancel.is_cancelled() {
            return failure(&ToolError::Timeout);
        }

        let budget = Budget::new(self.policy.search_timeout(), cancel);
        let this = self.clone();
        let joined = tokio::task::spawn_blocking(move || this.execute(op, &args, &budget)).await;
        match joined {
            Ok(Ok(fields)) => {
                debug!(operation = op.name(), "Operation succeeded");
                ToolResult::success(fields)
            }
            Ok(Err(err)) => failure(&err),
            Err(join_err) => {
                error!(operation = op.name(), error = %join_err, "Operation worker failed");
                ToolResult::failure(ErrorKind::IoFailure, "Operation failed unexpectedly")
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Operation, ToolError> {
        Operation::from_name(name)
            .filter(|op| op.is_available(&self.policy))
            .ok_or_else(|| ToolError::UnknownOperation {
                name: truncate_key(name),
            })
    }

    fn execute(
        &self,
        op: Operation,
        args: &ValidatedArgs,
        budget: &Budget,
    ) -> Result<Map<String, Value>, ToolError> {
        match op {
            Operation::ReadFile => {
                payload(&self.reader.read_file(args.string("path")?)?)
            }
            Operation::ListFiles => {
                let listing = self.reader.list_directory(
                    args.string("directory")?,
                    args.bool_or("recursive", false),
                    budget,
                )?;
                let mut fields = object(json!({
                    "directory": listing.directory,
                    "count": listing.files.len(),
                    "files": listing.files,
                }));
                completion_fields(&mut fields, listing.completion);
                Ok(fields)
            }
            Operation::SearchCode => {
                let pattern = args.string("pattern")?;
                let request = GrepRequest {
                    pattern,
                    directory: args.string("directory")?,
                    case_sensitive: args.bool_or("case_sensitive", true),
                    recursive: args.bool_or("recursive", true),
                    file_pattern: args.opt_string("file_pattern"),
                };
                let result = self.search.grep(&request, budget)?;
                let mut fields = object(json!({
                    "pattern": pattern,
                    "directory": result.directory,
                    "count": result.matches.len(),
                    "matches": result.matches,
                }));
                completion_fields(&mut fields, result.completion);
                Ok(fields)
            }
            Operation::FindFiles => {
                let name_pattern = args.opt_string("name_pattern").unwrap_or("*");
                let result = self.search.find(
                    args.string("directory")?,
                    Some(name_pattern),
                    args.opt_usize("max_depth"),
                    budget,
                )?;
                let mut fields = object(json!({
                    "directory": result.directory,
                    "name_pattern": name_pattern,
                    "count": result.files.len(),
                    "files": result.files,
                }));
                completion_fields(&mut fields, result.completion);
                Ok(fields)
            }
            Operation::CheckFileAccess => {
                let check = self.reader.check_access(args.string("path")?);
                Ok(object(json!({
                    "path": check.path.map(|p| p.to_string_lossy().into_owned()),
                    "can_access": check.can_access,
                    "reason": check.reason,
                })))
            }
            Operation::WriteFile => {
                let receipt = self.writer.write_file(
                    args.string("path")?,
                    args.string("content")?,
                    args.bool_or("create_parents", true),
                )?;
                payload(&receipt)
            }
            Operation::AppendFile => {
                let receipt = self
                    .writer
                    .append_file(args.string("path")?, args.string("content")?)?;
                payload(&receipt)
            }
            Operation::CreateDirectory => {
                let receipt = self
                    .writer
                    .create_directory(args.string("path")?, args.bool_or("parents", true))?;
                payload(&receipt)
            }
            Operation::DeleteFile => {
                let receipt = self.writer.delete_file(args.string("path")?)?;
                payload(&receipt)
            }
            Operation::DeleteDirectory => {
                let receipt = self
                    .writer
                    .delete_directory(args.string("path")?, args.bool_or("recursive", false))?;
                payload(&receipt)
            }
        }
    }
}

fn failure(err: &ToolError) -> ToolResult {
    let kind = err.kind();
    if matches!(kind, ErrorKind::InvalidArguments | ErrorKind::UnknownOperation) {
        debug!(%kind, "Rejected call");
    } else {
        warn!(%kind, "Operation failed");
    }
    ToolResult::failure(kind, err.to_string())
}
