//! Tool registry and dispatcher.
//!
//! Maps tool names to handlers. The registry checks descriptors when a tool
//! is registered and checks arguments against them on every call; what a
//! tool actually does is left to its handler.

use crate::error::ToolError;
use crate::message::ToolCall;
use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Parsed tool arguments.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// An untyped tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with already-checked arguments.
    async fn call(&self, args: JsonMap) -> Result<JsonValue, Report<ToolError>>;
}

/// A tool with typed arguments and output.
///
/// Arguments are deserialized from the model's JSON before `invoke` runs, so
/// implementations never see malformed input.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    /// Argument type deserialized from the model's call.
    type Args: DeserializeOwned + Send;
    /// Result type serialized back into the conversation.
    type Output: Serialize + Send;

    /// Returns the descriptor advertised to the model.
    fn descriptor(&self) -> ToolDescriptor;

    /// Runs the tool.
    async fn invoke(&self, args: Self::Args) -> Result<Self::Output, Report<ToolError>>;
}

struct Typed<T>(T);

#[async_trait]
impl<T: TypedTool> ToolHandler for Typed<T> {
    async fn call(&self, args: JsonMap) -> Result<JsonValue, Report<ToolError>> {
        let name = || self.0.descriptor().name;
        let args: T::Args =
            serde_json::from_value(JsonValue::Object(args)).map_err(|e| ToolError::InvalidArguments {
                name: name(),
                reason: e.to_string(),
            })?;
        let output = self.0.invoke(args).await?;
        serde_json::to_value(output).map_err(|e| {
            ToolError::ExecutionFailed {
                name: name(),
                reason: format!("result is not serializable: {e}"),
            }
            .into()
        })
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of available tools.
///
/// Lookups go through a name index; descriptors keep registration order so
/// the schema list sent to the model is stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| &t.descriptor.name).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every tool call to `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Registers a typed tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is invalid or the name is taken.
    pub fn register<T: TypedTool>(&mut self, tool: T) -> Result<(), Report<ToolError>> {
        let descriptor = tool.descriptor();
        self.register_handler(descriptor, Arc::new(Typed(tool)))
    }

    /// Registers an untyped handler under `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is invalid or the name is taken.
    pub fn register_handler(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), Report<ToolError>> {
        descriptor.validate()?;
        if self.by_name.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateTool {
                name: descriptor.name,
            }
            .into());
        }
        self.by_name
            .insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        Ok(())
    }

    /// Gets a tool descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).map(|&i| &self.tools[i].descriptor)
    }

    /// Returns all descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor)
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Converts descriptors to the format expected by chat-completion APIs.
    #[must_use]
    pub fn to_wire(&self) -> Vec<JsonValue> {
        self.descriptors().map(ToolDescriptor::to_wire).collect()
    }

    /// Invokes `tool_name` with parsed arguments and returns the serialized result.
    ///
    /// An unregistered name is not an error: the result is a diagnostic
    /// string the model can read and recover from.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` if the arguments do not fit the descriptor,
    /// `ExecutionFailed` or `Timeout` if the handler fails.
    pub async fn dispatch(&self, tool_name: &str, args: &JsonMap) -> Result<String, Report<ToolError>> {
        let Some(&index) = self.by_name.get(tool_name) else {
            debug!(tool = tool_name, "dispatch to unregistered tool");
            return Ok(format!("Tool '{tool_name}' not found."));
        };
        let tool = &self.tools[index];
        let args = tool.descriptor.drop_null_optionals(args);
        tool.descriptor.check_arguments(&args)?;

        let call = tool.handler.call(args);
        let value = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                ToolError::Timeout {
                    name: tool_name.to_string(),
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }
            })??,
            None => call.await?,
        };

        serde_json::to_string(&value).map_err(|e| {
            ToolError::ExecutionFailed {
                name: tool_name.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Parses a model tool call's argument string and dispatches it.
    ///
    /// An empty argument string is read as `{}`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedArguments` if the argument string is not a JSON
    /// object, otherwise whatever [`dispatch`](Self::dispatch) returns.
    pub async fn dispatch_call(&self, call: &ToolCall) -> Result<String, Report<ToolError>> {
        let args = parse_arguments(call)?;
        self.dispatch(&call.name, &args).await
    }
}

fn parse_arguments(call: &ToolCall) -> Result<JsonMap, Report<ToolError>> {
    let malformed = |reason: String| -> Report<ToolError> {
        ToolError::MalformedArguments {
            name: call.name.clone(),
            reason,
        }
        .into()
    };

    if call.arguments.trim().is_empty() {
        return Ok(JsonMap::new());
    }
    match serde_json::from_str::<JsonValue>(&call.arguments) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(malformed(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(malformed(e.to_string())),
    }
}
