//! 编排器状态与对外的状态快照

use serde::{Deserialize, Serialize};

pub use crate::config::CompletionMode;

/// 只有运行 start 的控制任务会修改它
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Running,
    Paused,
    Completed,
    StoppedByUser,
    StoppedByError,
    StoppedByMaxIterations,
    StoppedByGoalAchieved,
}

impl OrchestratorState {
    /// 控制任务正在运行（含暂停）
    pub fn is_active(self) -> bool {
        matches!(self, OrchestratorState::Running | OrchestratorState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active() && self != OrchestratorState::Idle
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::Idle
    }
}

/// status() 返回的时间点快照
#[derive(Clone, Debug, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub session_id: String,
    pub queue_len: usize,
    pub iteration: u32,
    pub oracle_iteration: u32,
    pub checkpoint_count: usize,
    pub history_len: usize,
    pub last_error: Option<String>,
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_terminal() {
        assert!(OrchestratorState::Running.is_active());
        assert!(OrchestratorState::Paused.is_active());
        assert!(!OrchestratorState::Idle.is_active());
        assert!(!OrchestratorState::Idle.is_terminal());
        assert!(OrchestratorState::StoppedByGoalAchieved.is_terminal());
        assert!(!OrchestratorState::Paused.is_terminal());
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&OrchestratorState::StoppedByMaxIterations).unwrap();
        assert_eq!(json, "\"stopped_by_max_iterations\"");
    }
}
