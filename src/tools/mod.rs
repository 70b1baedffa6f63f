//! Tools the model can call, and the registry that advertises them.
//!
//! Tools are in-process, side-effect-free functions. The registry is built
//! once at startup and is read-only afterwards; it is the only authority on
//! which tool names may be invoked.

mod calculate;
mod executor;
mod exponential;
mod fibonacci;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub use calculate::Calculate;
pub use executor::ToolExecutor;
pub use exponential::Exponential;
pub use fibonacci::Fibonacci;

/// Information about an available tool.
///
/// Descriptors are owned by the registry and never change after startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    /// JSON-schema rendering of the parameter list, as declared to the backend.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut schema = param.kind.json_schema();
            if let Value::Object(obj) = &mut schema {
                obj.insert(
                    "description".to_string(),
                    Value::String(param.description.clone()),
                );
            }
            properties.insert(param.name.clone(), schema);
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Value types a tool parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    NumberList,
}

impl ParamKind {
    fn json_schema(self) -> Value {
        match self {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::NumberList => json!({
                "type": "array",
                "items": { "type": "number" }
            }),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::String => write!(f, "string"),
            ParamKind::Integer => write!(f, "integer"),
            ParamKind::NumberList => write!(f, "array of numbers"),
        }
    }
}

/// A single argument after validation against its [`ParamSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    NumberList(Vec<f64>),
}

/// Validated arguments handed to [`Tool::execute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: HashMap<String, ArgValue>,
}

impl ToolArgs {
    pub(crate) fn insert(&mut self, name: &str, value: ArgValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn string(&self, name: &str) -> anyhow::Result<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(s)) => Ok(s),
            _ => Err(anyhow::anyhow!("Missing '{}' argument", name)),
        }
    }

    pub fn integer(&self, name: &str) -> anyhow::Result<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(n)) => Ok(*n),
            _ => Err(anyhow::anyhow!("Missing '{}' argument", name)),
        }
    }

    pub fn numbers(&self, name: &str) -> anyhow::Result<&[f64]> {
        match self.values.get(name) {
            Some(ArgValue::NumberList(list)) => Ok(list),
            _ => Err(anyhow::anyhow!("Missing '{}' argument", name)),
        }
    }
}

/// A problem with one argument of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgumentIssue {
    pub field: String,
    pub problem: String,
}

impl fmt::Display for ArgumentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.field, self.problem)
    }
}

/// Why a tool call produced no result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {}", join_issues(.issues))]
    InvalidArguments {
        tool: String,
        issues: Vec<ArgumentIssue>,
    },

    #[error("Tool {tool} failed: {detail}")]
    Execution { tool: String, detail: String },
}

impl ToolError {
    /// Names of the offending arguments, for `InvalidArguments`.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            ToolError::InvalidArguments { issues, .. } => {
                issues.iter().map(|i| i.field.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join_issues(issues: &[ArgumentIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Human-readable description, shown to the model.
    fn description(&self) -> &str;

    /// Declared parameters.
    fn parameters(&self) -> Vec<ParamSpec>;

    /// Run the tool on arguments that already passed validation.
    async fn execute(&self, args: ToolArgs) -> anyhow::Result<String>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Fixed catalog of callable tools.
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a registry with the built-in tools.
    pub fn new() -> Self {
        Self::empty()
            .with_tool(Arc::new(Calculate))
            .with_tool(Arc::new(Fibonacci))
            .with_tool(Arc::new(Exponential))
    }

    /// Create a registry with no tools.
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Add a tool. A tool registered under an existing name replaces it.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        let descriptor = ToolDescriptor {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        };
        let entry = RegisteredTool { descriptor, tool };

        match self.by_name.get(&entry.descriptor.name) {
            Some(&idx) => {
                tracing::warn!(tool = %entry.descriptor.name, "Replacing registered tool");
                self.tools[idx] = entry;
            }
            None => {
                self.by_name
                    .insert(entry.descriptor.name.clone(), self.tools.len());
                self.tools.push(entry);
            }
        }
        self
    }

    /// Descriptors of every tool, in registration order.
    pub fn describe_all(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Look up a tool's descriptor by name.
    pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor, ToolError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.tools[idx].descriptor)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub(crate) fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.tools[idx].tool))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
