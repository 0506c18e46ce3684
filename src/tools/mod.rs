//! Tools exposed to the model

mod bridge;

pub use bridge::{
    CLEARED_RESULT, EMPTY_LIST_RESULT, TaskTool, ToolBridge, ToolInvocation, ToolResult,
    UNKNOWN_TOOL_RESULT, declarations,
};
