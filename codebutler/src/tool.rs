//! Tool definitions, the executor contract, and a name-keyed registry.
//!
//! The loop only requires two operations from a tool backend: list the
//! available definitions and execute one call. [`ToolRegistry`] is the
//! built-in backend — a map from tool name to an async handler — which
//! covers sandboxed adapters and test doubles alike.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::{ToolCall, ToolResult};

/// Description of a tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool (snake_case).
    pub name: String,

    /// Description of what the tool does; this is how the model decides
    /// when to use it.
    pub description: String,

    /// JSON schema for the tool's parameters, passed through opaquely.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// The contract the loop uses to discover and invoke tools.
///
/// The definition set may shrink mid-run: the escape ladder temporarily
/// removes a tool the agent is stuck on, so `list_tools` is consulted once
/// and the loop filters the active set itself.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// All tool definitions this executor can serve.
    fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Execute one tool call. Errors are converted by the loop into error
    /// tool results so the model can repair; they never abort the run.
    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> Result<ToolResult>;
}

/// Async handler backing one registered tool.
pub type ToolHandler = Arc<
    dyn Fn(CancellationToken, Value) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>
        + Send
        + Sync,
>;

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// A registry keyed by tool name.
///
/// The model supplies the dispatch key; no reflection is involved. A
/// `BTreeMap` keeps `list_tools` output deterministic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(CancellationToken, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let name = definition.name.clone();
        let handler: ToolHandler = Arc::new(move |cancel, args| Box::pin(handler(cancel, args)));
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                handler,
            },
        );
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether a tool with the given name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> Result<ToolResult> {
        let Some(tool) = self.tools.get(&call.name) else {
            return Err(Error::tool(&call.name, "tool not found"));
        };
        let args: Value = if call.arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&call.arguments)
                .map_err(|e| Error::tool(&call.name, format!("invalid arguments: {e}")))?
        };
        let content = (tool.handler)(cancel.clone(), args).await?;
        Ok(ToolResult::ok(&call.id, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_definition() -> ToolDefinition {
        ToolDefinition::new(
            "echo",
            "Echoes back the input message.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
        )
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_definition(), |_cancel, args| async move {
            Ok(args["message"].as_str().unwrap_or_default().to_owned())
        });

        let cancel = CancellationToken::new();
        let call = ToolCall::new("c1", "echo", r#"{"message":"hello"}"#);
        let result = registry.execute(&cancel, &call).await.expect("execute");
        assert_eq!(result.tool_call_id, "c1");
        assert_eq!(result.content, "hello");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let cancel = CancellationToken::new();
        let call = ToolCall::new("c1", "nonexistent", "{}");
        let err = registry.execute(&cancel, &call).await.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[tokio::test]
    async fn malformed_arguments_error() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_definition(), |_cancel, _args| async move {
            Ok(String::new())
        });
        let cancel = CancellationToken::new();
        let call = ToolCall::new("c1", "echo", "{not json");
        assert!(registry.execute(&cancel, &call).await.is_err());
    }

    #[test]
    fn listing_is_sorted_and_stable() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("write", "w", Value::Null),
            |_c, _a| async move { Ok(String::new()) },
        );
        registry.register(
            ToolDefinition::new("read", "r", Value::Null),
            |_c, _a| async move { Ok(String::new()) },
        );
        let names: Vec<String> = registry.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["read", "write"]);
    }
}
