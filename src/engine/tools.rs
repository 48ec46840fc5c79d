use crate::Result;
use crate::protocol::models::Tool;
use async_trait::async_trait;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::transport::BoxFuture;

/// A capability call in flight. Owns its inputs, so it can outlive the registry borrow.
pub type ToolFuture = BoxFuture<'static, ToolResult>;

type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A lookup the engine may call mid-turn: free text in, supporting text out.
///
/// Implementations must not fail; they degrade to a textual answer instead.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, query: &str) -> String;
}

/// Arguments of a query-style capability as the engine sends them.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct QueryArgs {
    /// Natural-language search query.
    pub query: String,
}

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schema: RootSchema,
}

#[derive(Clone, Debug)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Build a call from the raw argument string the engine streams. Arguments
    /// that are not JSON are kept as a plain string.
    #[must_use]
    pub fn from_raw(name: impl Into<String>, call_id: impl Into<String>, arguments: &str) -> Self {
        let arguments = serde_json::from_str(arguments)
            .unwrap_or_else(|_| Value::String(arguments.to_string()));
        Self {
            name: name.into(),
            call_id: call_id.into(),
            arguments,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub output: Value,
}

impl ToolResult {
    /// Text handed back to the engine as the function call output.
    #[must_use]
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn tool_with_description<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    ) where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.register::<TArgs, TResp, F, Fut>(name, Some(description.into()), handler);
    }

    /// Expose a [`Capability`] as a tool taking a single `query` argument.
    pub fn capability(
        &mut self,
        name: &str,
        description: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) {
        self.tool_with_description(name, description, move |args: QueryArgs| {
            let capability = Arc::clone(&capability);
            async move { Ok(capability.invoke(&args.query).await) }
        });
    }

    fn register<TArgs, TResp, F, Fut>(&mut self, name: &str, description: Option<String>, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let schema = schemars::schema_for!(TArgs);
        let name = name.to_string();
        self.defs.retain(|def| def.name != name);
        self.defs.push(ToolDefinition {
            name: name.clone(),
            description,
            schema,
        });

        let user_handler = Arc::new(handler);
        let handler = move |value: Value| -> BoxFuture<'static, Result<Value>> {
            let user_handler = Arc::clone(&user_handler);
            Box::pin(async move {
                let args: TArgs = serde_json::from_value(value)
                    .map_err(|e| crate::Error::ToolArguments(e.to_string()))?;
                let resp = user_handler(args).await?;
                Ok(serde_json::to_value(resp)?)
            })
        };

        self.handlers.insert(name, Box::new(handler));
    }

    /// Convert all registered tools into protocol-level tool definitions.
    ///
    /// # Errors
    /// Returns an error if schema serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn try_as_tools(&self) -> Result<Vec<Tool>> {
        self.defs
            .iter()
            .map(|def| {
                Ok(Tool::Function {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    parameters: serde_json::to_value(&def.schema)?,
                })
            })
            .collect()
    }

    /// Start a tool call. The returned future owns everything it needs, so the
    /// caller can keep it pending while doing other work.
    ///
    /// Failures (unknown tool, bad arguments, handler errors) are folded into
    /// an `{"error": ...}` output; the engine decides how to recover.
    #[must_use]
    pub fn dispatch(&self, call: ToolCall) -> ToolFuture {
        let ToolCall { name, call_id, arguments } = call;
        let pending = self.handlers.get(&name).map_or_else(
            || -> BoxFuture<'static, Result<Value>> {
                let err = crate::Error::UnknownTool(name.clone());
                Box::pin(async move { Err(err) })
            },
            |handler| handler(arguments),
        );
        Box::pin(async move {
            let output = match pending.await {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!(tool = %name, error = %err, "Tool call failed");
                    serde_json::json!({ "error": err.to_string() })
                }
            };
            ToolResult { call_id, output }
        })
    }
}
