//! Task domain model: lifecycle status machine and the durable record shape.

mod status;
mod types;

pub use status::TaskStatus;
pub use types::{AgentBackend, FailureContext, NewTask, Task, TaskCategory, TaskPatch};
