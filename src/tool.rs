//! Agent-facing tool schema.
//!
//! Agent frameworks that speak OpenAI-style function calling can register
//! [`tool_definition`] and hand the call arguments to [`parse_tool_call`].

use serde_json::{json, Value};

use crate::security::Command;

pub const TOOL_EXECUTE_SHELL_COMMAND: &str = "execute_shell_command";

pub fn tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": TOOL_EXECUTE_SHELL_COMMAND,
            "description": "Execute a shell command safely. You MUST provide clear reasoning.",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "reasoning": {
                        "type": "string",
                        "description": "Detailed explanation of why this command is necessary",
                        "minLength": 10
                    }
                },
                "required": ["command", "reasoning"]
            }
        }
    })
}

#[derive(serde::Deserialize)]
struct ToolArgs {
    command: String,
    #[serde(default)]
    reasoning: String,
}

/// Turn the JSON arguments of an `execute_shell_command` call into a [`Command`].
pub fn parse_tool_call(arguments: &str) -> Result<Command, serde_json::Error> {
    let args: ToolArgs = serde_json::from_str(arguments)?;
    Ok(Command::new(args.command, args.reasoning))
}
