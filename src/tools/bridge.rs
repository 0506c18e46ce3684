//! Tool bridge: remote function calls onto the task list

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::tasks::TaskSurface;
use crate::{Error, Result};

/// Result reported for tool names we do not recognise
pub const UNKNOWN_TOOL_RESULT: &str = "ok";

/// Confirmation returned by `clearAllTasks`
pub const CLEARED_RESULT: &str = "All tasks cleared.";

/// Reply for `getTasks` on an empty list
pub const EMPTY_LIST_RESULT: &str = "The task list is empty.";

/// A function call requested by the remote model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id echoed back in the response
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Outcome of a tool invocation, correlated by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub result: String,
}

/// The fixed set of task operations the model may call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTool {
    AddTask,
    RemoveTask,
    GetTasks,
    ClearAllTasks,
}

impl TaskTool {
    /// Every tool, in declaration order
    pub const ALL: [Self; 4] = [
        Self::AddTask,
        Self::RemoveTask,
        Self::GetTasks,
        Self::ClearAllTasks,
    ];

    /// Look a tool up by its wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "addTask" => Some(Self::AddTask),
            "removeTask" => Some(Self::RemoveTask),
            "getTasks" => Some(Self::GetTasks),
            "clearAllTasks" => Some(Self::ClearAllTasks),
            _ => None,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddTask => "addTask",
            Self::RemoveTask => "removeTask",
            Self::GetTasks => "getTasks",
            Self::ClearAllTasks => "clearAllTasks",
        }
    }

    /// Function declaration sent in the session setup
    #[must_use]
    pub fn declaration(self) -> Value {
        match self {
            Self::AddTask => json!({
                "name": self.name(),
                "description": "Add a new task to the user's task list.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "text": { "type": "STRING", "description": "The task description." }
                    },
                    "required": ["text"]
                }
            }),
            Self::RemoveTask => json!({
                "name": self.name(),
                "description": "Remove the first task whose text contains the given words.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "text": { "type": "STRING", "description": "Words from the task to remove." }
                    },
                    "required": ["text"]
                }
            }),
            Self::GetTasks => json!({
                "name": self.name(),
                "description": "Read back every task currently on the list."
            }),
            Self::ClearAllTasks => json!({
                "name": self.name(),
                "description": "Delete every task on the list."
            }),
        }
    }
}

/// Function declarations for all task tools
#[must_use]
pub fn declarations() -> Vec<Value> {
    TaskTool::ALL.iter().map(|tool| tool.declaration()).collect()
}

/// Runs tool invocations against a live task list
#[derive(Clone)]
pub struct ToolBridge {
    tasks: Arc<dyn TaskSurface>,
}

impl ToolBridge {
    /// Create a bridge over `tasks`
    pub fn new(tasks: Arc<dyn TaskSurface>) -> Self {
        Self { tasks }
    }

    /// Run an invocation and always produce a result for the peer
    pub fn invoke(&self, invocation: &ToolInvocation) -> ToolResult {
        let result = match self.execute(&invocation.name, &invocation.args) {
            Ok(result) => {
                tracing::info!(tool = %invocation.name, id = %invocation.id, "tool call handled");
                result
            }
            Err(Error::UnknownTool(name)) => {
                tracing::warn!(tool = %name, id = %invocation.id, "unknown tool requested");
                UNKNOWN_TOOL_RESULT.to_string()
            }
            Err(e) => {
                tracing::warn!(tool = %invocation.name, id = %invocation.id, error = %e, "tool call rejected");
                format!("Error: {e}")
            }
        };

        ToolResult {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            result,
        }
    }

    /// Execute a named tool
    ///
    /// # Errors
    ///
    /// Returns `UnknownTool` for unrecognised names and `InvalidToolArgs`
    /// when a required argument is missing or not a string
    pub fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<String> {
        let tool = TaskTool::from_name(name).ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        match tool {
            TaskTool::AddTask => {
                let text = required_text(tool, args)?;
                self.tasks.create(text);
                Ok(format!("Added task: \"{text}\""))
            }
            TaskTool::RemoveTask => {
                let text = required_text(tool, args)?;
                let needle = text.to_lowercase();
                let found = self
                    .tasks
                    .list_all()
                    .into_iter()
                    .find(|task| task.text.to_lowercase().contains(&needle));

                Ok(match found {
                    Some(task) => {
                        self.tasks.delete(task.id);
                        format!("Removed task: \"{}\"", task.text)
                    }
                    None => format!("No task found matching \"{text}\""),
                })
            }
            TaskTool::GetTasks => {
                let tasks = self.tasks.list_all();
                if tasks.is_empty() {
                    return Ok(EMPTY_LIST_RESULT.to_string());
                }
                let texts: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
                Ok(format!("Current tasks: {}", texts.join(", ")))
            }
            TaskTool::ClearAllTasks => {
                self.tasks.clear_all();
                Ok(CLEARED_RESULT.to_string())
            }
        }
    }
}

/// Extract the required non-empty `text` argument
fn required_text(tool: TaskTool, args: &Map<String, Value>) -> Result<&str> {
    match args.get("text") {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.as_str()),
        Some(Value::String(_)) => Err(Error::InvalidToolArgs {
            tool: tool.name().to_string(),
            reason: "'text' must not be empty".to_string(),
        }),
        Some(_) => Err(Error::InvalidToolArgs {
            tool: tool.name().to_string(),
            reason: "'text' must be a string".to_string(),
        }),
        None => Err(Error::InvalidToolArgs {
            tool: tool.name().to_string(),
            reason: "missing required argument 'text'".to_string(),
        }),
    }
}
