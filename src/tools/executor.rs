//! Validates tool calls against the registry and runs them.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;

use super::{ArgValue, ArgumentIssue, ParamKind, ToolArgs, ToolDescriptor, ToolError, ToolRegistry};
use crate::llm::ToolCallRequest;

/// Runs model-issued tool calls against a [`ToolRegistry`].
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a single tool call.
    pub async fn execute(&self, request: &ToolCallRequest) -> Result<String, ToolError> {
        let descriptor = self.registry.lookup(&request.function_name)?;
        let args = validate_arguments(descriptor, &request.arguments)?;
        let tool = self
            .registry
            .tool(&request.function_name)
            .ok_or_else(|| ToolError::UnknownTool(request.function_name.clone()))?;

        tracing::debug!(
            tool = %request.function_name,
            call_id = %request.call_id,
            "Executing tool"
        );

        tool.execute(args).await.map_err(|e| ToolError::Execution {
            tool: request.function_name.clone(),
            detail: e.to_string(),
        })
    }

    /// Execute every request concurrently.
    ///
    /// Results come back in request order, whatever order the tools finish in.
    pub async fn execute_all(&self, requests: &[ToolCallRequest]) -> Vec<Result<String, ToolError>> {
        let mut set = JoinSet::new();
        for (idx, request) in requests.iter().cloned().enumerate() {
            let executor = self.clone();
            set.spawn(async move {
                let result = executor.execute(&request).await;
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Result<String, ToolError>>> = vec![None; requests.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => tracing::error!("Tool task failed to complete: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    Err(ToolError::Execution {
                        tool: request.function_name.clone(),
                        detail: "tool task panicked".to_string(),
                    })
                })
            })
            .collect()
    }
}

/// Check raw arguments against a descriptor and coerce them to declared types.
///
/// Every offending field is reported, not just the first.
pub fn validate_arguments(descriptor: &ToolDescriptor, raw: &Value) -> Result<ToolArgs, ToolError> {
    let empty = Map::new();
    let object = match raw {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ToolError::InvalidArguments {
                tool: descriptor.name.clone(),
                issues: vec![ArgumentIssue {
                    field: "arguments".to_string(),
                    problem: "must be an object".to_string(),
                }],
            });
        }
    };

    let mut args = ToolArgs::default();
    let mut issues = Vec::new();

    for param in &descriptor.parameters {
        match object.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    issues.push(ArgumentIssue {
                        field: param.name.clone(),
                        problem: "is required".to_string(),
                    });
                }
            }
            Some(value) => match coerce(param.kind, value) {
                Some(arg) => args.insert(&param.name, arg),
                None => issues.push(ArgumentIssue {
                    field: param.name.clone(),
                    problem: format!("must be {}", with_article(param.kind)),
                }),
            },
        }
    }

    for key in object.keys() {
        if !descriptor.parameters.iter().any(|p| &p.name == key) {
            tracing::debug!(tool = %descriptor.name, argument = %key, "Ignoring undeclared argument");
        }
    }

    if issues.is_empty() {
        Ok(args)
    } else {
        Err(ToolError::InvalidArguments {
            tool: descriptor.name.clone(),
            issues,
        })
    }
}

fn with_article(kind: ParamKind) -> String {
    match kind {
        ParamKind::Integer | ParamKind::NumberList => format!("an {}", kind),
        _ => format!("a {}", kind),
    }
}

fn coerce(kind: ParamKind, value: &Value) -> Option<ArgValue> {
    match kind {
        ParamKind::String => match value {
            Value::String(s) => Some(ArgValue::String(s.clone())),
            Value::Number(n) => Some(ArgValue::String(n.to_string())),
            _ => None,
        },
        ParamKind::Integer => coerce_integer(value).map(ArgValue::Integer),
        ParamKind::NumberList => match value {
            Value::Array(items) => items
                .iter()
                .map(coerce_number)
                .collect::<Option<Vec<f64>>>()
                .map(ArgValue::NumberList),
            _ => None,
        },
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
