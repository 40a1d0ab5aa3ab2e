//! 核心编排层：错误、状态、事件、运行监管、执行历史、检查点、主控循环

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod events;
pub mod history;
pub mod orchestrator;
pub mod state;
pub mod supervisor;

pub use builder::OrchestratorBuilder;
pub use checkpoint::{CheckpointFile, CheckpointStore, ExecutionCheckpoint};
pub use error::EngineError;
pub use events::{EventBus, EventKind, EventSubscriber, OrchestratorEvent};
pub use history::ExecutionHistoryEntry;
pub use orchestrator::Orchestrator;
pub use state::{CompletionMode, OrchestratorState, OrchestratorStatus};
pub use supervisor::Supervisor;
