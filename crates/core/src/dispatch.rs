//! Function-call dispatch.
//!
//! The model service requests tool execution by completing a `function_call`
//! output item; the dispatcher resolves the name against a static table
//! populated at process start and runs the handler. Nothing in here is
//! allowed to take the model connection down: unknown names, malformed
//! argument strings, and handler failures all fold into a JSON error payload
//! that flows back into the conversation.

use crate::realtime::ToolDef;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A named capability the model may invoke mid-call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema for the handler's arguments.
    fn parameters(&self) -> Value;
    /// Executes the tool. Errors are folded into a payload by the dispatcher.
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Read-only lookup table from function name to handler.
pub struct Dispatcher {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl Dispatcher {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools.into_iter().map(|t| (t.name(), t)).collect();
        Self { tools }
    }

    /// The default table: every built-in tool.
    pub fn builtin() -> Self {
        Self::new(crate::tools::builtin())
    }

    /// Tool definitions in the shape the model-leg handshake advertises.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .tools
            .values()
            .map(|tool| ToolDef {
                tool_type: "function".into(),
                name: tool.name().into(),
                description: Some(tool.description().into()),
                parameters: Some(tool.parameters()),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Runs the named tool against a JSON-encoded argument string and
    /// returns the serialized result payload. This function never fails;
    /// every failure mode becomes an error payload for the conversation.
    pub async fn dispatch(&self, call_id: &str, name: &str, arguments: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(call = %call_id, tool = %name, "Unknown function requested.");
            return error_payload(&format!("unknown function '{name}'"));
        };

        let args: Value = match serde_json::from_str(arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!(call = %call_id, tool = %name, error = %e, "Unparseable function arguments.");
                return error_payload(&format!("invalid arguments for '{name}': {e}"));
            }
        };

        info!(call = %call_id, tool = %name, "Executing function call.");
        match tool.call(args).await {
            Ok(result) => result.to_string(),
            Err(e) => {
                error!(call = %call_id, tool = %name, error = ?e, "Function handler failed.");
                error_payload(&format!("'{name}' failed: {e}"))
            }
        }
    }
}

fn error_payload(message: &str) -> String {
    json!({ "error": message }).to_string()
}
