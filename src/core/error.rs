//! 引擎错误类型
//!
//! 执行失败、取消、审批拒绝、状态冲突；执行器 / 人机交互的底层错误通过 #[from] 包装。

use thiserror::Error;

use crate::executor::ExecutionError;
use crate::hitl::HumanError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Orchestrator is already running")]
    AlreadyRunning,

    /// 恢复检查点要求引擎不在运行
    #[error("Orchestrator is not idle")]
    NotIdle,

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Approval rejected")]
    ApprovalRejected,

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Human interaction error: {0}")]
    Human(HumanError),
}

impl From<HumanError> for EngineError {
    fn from(e: HumanError) -> Self {
        match e {
            HumanError::Cancelled => EngineError::Cancelled,
            other => EngineError::Human(other),
        }
    }
}

impl EngineError {
    /// 取消是控制流停止，不算失败
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            EngineError::Cancelled | EngineError::Execution(ExecutionError::Cancelled)
        )
    }
}
