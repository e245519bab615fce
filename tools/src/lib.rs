//! Tool capability records, the tool registry, and built-in tools.
//!
//! A tool is described by a [`ToolDescriptor`]: a small tagged record holding
//! its approval policy, optional argument validator, executor, and the metadata
//! the orchestrator needs for gating (file mutation, risk, timeout).

pub mod builtins;
pub mod process;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use helm_types::ToolDefinition;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Argument validator. `Err` carries the message reported back to the model.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Risk level for approval prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Tool timed out: {tool} after {}s", .elapsed.as_secs())]
    Timeout { tool: String, elapsed: Duration },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Tool cancelled")]
    Cancelled,
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
}

impl ToolError {
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Whether a call must be confirmed by a human before it runs.
#[derive(Clone)]
pub enum ApprovalPolicy {
    Static(bool),
    /// Decided per call from its arguments.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl ApprovalPolicy {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    #[must_use]
    pub fn requires_approval(&self, args: &Value) -> bool {
        match self {
            Self::Static(required) => *required,
            Self::Predicate(f) => f(args),
        }
    }
}

impl fmt::Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(required) => f.debug_tuple("Static").field(required).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Per-call tool context.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub tool_call_id: String,
    pub working_dir: PathBuf,
    /// Fires when the owning turn is cancelled. Long-running tools must watch it.
    pub cancel: CancellationToken,
}

impl ToolCtx {
    pub fn new(
        tool_call_id: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            working_dir: working_dir.into(),
            cancel,
        }
    }
}

/// Runs one tool call.
pub trait ToolExecutor: Send + Sync {
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

/// Adapts an async closure into a [`ToolExecutor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value, ToolCtx) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin((self.f)(args, ctx.clone()))
    }
}

pub fn from_fn<F, Fut>(f: F) -> Arc<dyn ToolExecutor>
where
    F: Fn(Value, ToolCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}

/// Capability record for one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    definition: ToolDefinition,
    approval: ApprovalPolicy,
    validator: Option<Validator>,
    executor: Arc<dyn ToolExecutor>,
    mutates_files: bool,
    risk: RiskLevel,
    timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// A tool with no approval requirement, no validator, and low risk.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            definition: ToolDefinition::new(name, description, parameters),
            approval: ApprovalPolicy::Static(false),
            validator: None,
            executor,
            mutates_files: false,
            risk: RiskLevel::Low,
            timeout: None,
        }
    }

    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = approval;
        self
    }

    pub fn requires_approval(self, required: bool) -> Self {
        self.with_approval(ApprovalPolicy::Static(required))
    }

    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(f));
        self
    }

    /// Validate arguments against the tool's own parameter schema.
    pub fn with_schema_validation(self) -> Result<Self, ToolError> {
        let validator = jsonschema::validator_for(&self.definition.parameters).map_err(|e| {
            ToolError::BadArgs {
                message: format!("Invalid tool schema for {}: {e}", self.definition.name),
            }
        })?;
        Ok(self.with_validator(move |args| {
            validator.validate(args).map_err(|err| err.to_string())
        }))
    }

    /// Marks the tool as writing to the filesystem. Plan mode rejects such tools.
    pub fn file_mutating(mut self) -> Self {
        self.mutates_files = true;
        if self.risk < RiskLevel::Medium {
            self.risk = RiskLevel::Medium;
        }
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    #[must_use]
    pub fn needs_approval(&self, args: &Value) -> bool {
        self.approval.requires_approval(args)
    }

    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Runs the validator, if any.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        match &self.validator {
            Some(validator) => validator(args),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn is_file_mutating(&self) -> bool {
        self.mutates_files
    }

    #[must_use]
    pub fn risk_level(&self) -> RiskLevel {
        self.risk
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        self.executor.execute(args, ctx)
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.definition.name)
            .field("approval", &self.approval)
            .field("validator", &self.validator.is_some())
            .field("mutates_files", &self.mutates_files)
            .field("risk", &self.risk)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Tool registry keyed by name.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        let name = descriptor.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.tools.insert(name, descriptor);
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool manifest for the model, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| tool.definition().clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    validator.validate(args).map_err(|err| ToolError::BadArgs {
        message: err.to_string(),
    })
}

/// Truncate tool output to the effective maximum length.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "\n\n... [output truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let max_body = effective_max - marker.len();
    let mut end = max_body;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}
