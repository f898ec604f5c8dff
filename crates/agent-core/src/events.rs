//! Component D: the closed event taxonomy fanned out over the
//! [`webloop_event_bus::InMemoryBus`]. Delivery order is emission order
//! (§5); this module only defines the payloads.

use serde_json::Value;

use webloop_core_types::{IterationId, TaskId};

#[derive(Debug, Clone)]
pub enum AgentEvent {
    TaskSetup { task_id: TaskId },
    TaskStarted { task_id: TaskId, url: String },
    TaskCompleted { task_id: TaskId, success: bool },
    TaskAborted { task_id: TaskId, reason: String },
    TaskValidated { task_id: TaskId, attempt: u32 },
    TaskValidationError { task_id: TaskId, feedback: String },

    AgentStep { task_id: TaskId, iteration_id: IterationId },
    AgentProcessing { task_id: TaskId, iteration_id: IterationId },
    AgentReasoned { task_id: TaskId, reasoning: String },
    AgentStatus { task_id: TaskId, message: String },
    AgentAction { task_id: TaskId, action: String, ref_: Option<String> },
    AgentWaiting { task_id: TaskId, seconds: u64 },
    AgentExtracted { task_id: TaskId, description: String },

    BrowserNavigated { task_id: TaskId, url: String },
    BrowserActionStarted { task_id: TaskId, action: String },
    BrowserActionCompleted { task_id: TaskId, action: String, success: bool },
    BrowserScreenshotCaptured { task_id: TaskId },

    AiGeneration { task_id: TaskId, finish_reason: String },
    AiGenerationError { task_id: TaskId, is_tool_error: bool, message: String },

    SystemDebugCompression { task_id: TaskId, before_bytes: usize, after_bytes: usize, detail: Value },
}
