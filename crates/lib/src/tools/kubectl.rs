//! kubectl tool: function definition for the model and a thin adapter over [`Gateway`].

use std::sync::Mutex;

use serde_json::json;

use crate::agent::ToolExecutor;
use crate::gateway::{CommandResult, Gateway};
use crate::llm::{ToolDefinition, ToolFunctionDefinition};

pub const KUBECTL_TOOL_NAME: &str = "kubectl_tool";

/// Ollama tool definition: one required string parameter, `command`.
pub fn kubectl_tool_definition(gateway: &Gateway) -> ToolDefinition {
    let policy = gateway.policy();
    ToolDefinition {
        typ: "function".to_string(),
        function: ToolFunctionDefinition {
            name: KUBECTL_TOOL_NAME.to_string(),
            description: Some(format!(
                "Run a read-only {} command against the current cluster. Allowed verbs: {}.",
                policy.program(),
                policy.allowed().join(", ")
            )),
            parameters: json!({
                "type": "object",
                "required": ["command"],
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The kubectl command to execute, e.g. \"get pods -n default\""
                    }
                }
            }),
        },
    }
}

/// Runs the model's kubectl requests through the gateway. Commands run via [`ToolExecutor`]
/// are kept until [`ToolExecutor::drain_commands`] collects them.
#[derive(Debug)]
pub struct KubectlTool {
    gateway: Gateway,
    ran: Mutex<Vec<(String, CommandResult)>>,
}

impl KubectlTool {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            ran: Mutex::new(Vec::new()),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn definition(&self) -> ToolDefinition {
        kubectl_tool_definition(&self.gateway)
    }

    pub fn run(&self, command: &str) -> CommandResult {
        self.gateway.execute(command)
    }

    /// Pull `command` out of tool-call arguments. Some models send the arguments object as a JSON string.
    pub fn command_from_args(args: &serde_json::Value) -> Result<String, String> {
        let parsed;
        let obj = match args {
            serde_json::Value::String(s) => {
                parsed = serde_json::from_str::<serde_json::Value>(s)
                    .map_err(|e| format!("arguments are not a JSON object: {}", e))?;
                &parsed
            }
            other => other,
        };
        obj.get("command")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "missing command".to_string())
    }

    /// Tool message fed back to the model.
    pub fn render(command: &str, result: &CommandResult) -> String {
        format!(
            "Command: {}\nOutput: {}\nError: {}",
            command,
            result.output,
            result.error.as_deref().unwrap_or("None")
        )
    }
}

impl ToolExecutor for KubectlTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![self.definition()]
    }

    /// A rejected or failed command is still `Ok`: the rendered message carries the error
    /// for the model. `Err` means the call itself was unusable.
    fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String> {
        if name != KUBECTL_TOOL_NAME {
            return Err(format!("unknown tool: {}", name));
        }
        let command = Self::command_from_args(args)?;
        log::info!("kubectl tool: executing {}", command);
        let result = self.run(&command);
        if let Some(e) = &result.error {
            log::warn!("kubectl tool: {}", e);
        }
        let msg = Self::render(&command, &result);
        if let Ok(mut ran) = self.ran.lock() {
            ran.push((command, result));
        }
        Ok(msg)
    }

    fn drain_commands(&self) -> Vec<(String, CommandResult)> {
        self.ran
            .lock()
            .map(|mut ran| std::mem::take(&mut *ran))
            .unwrap_or_default()
    }
}
