//! 执行历史：每次 Oracle 校验循环的一轮对应一条
//!
//! 条目在本轮内本地构建，结束时作为完成值追加，之后不再修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::TaskResult;
use crate::oracle::OracleVerdict;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub id: String,
    pub session_id: String,
    pub iteration: u32,
    pub oracle_iteration: u32,
    pub request_id: String,
    pub prompt: String,
    pub output: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub oracle_prompt: Option<String>,
    pub verdict: Option<OracleVerdict>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionHistoryEntry {
    pub fn begin(
        session_id: &str,
        iteration: u32,
        oracle_iteration: u32,
        request_id: &str,
        prompt: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            iteration,
            oracle_iteration,
            request_id: request_id.to_string(),
            prompt: prompt.to_string(),
            output: None,
            success: false,
            error: None,
            oracle_prompt: None,
            verdict: None,
            started_at: now,
            completed_at: now,
        }
    }

    pub fn record_result<O: TaskResult>(&mut self, result: &O) {
        self.output = Some(result.output().to_string());
        self.success = result.success();
        self.error = result.error().map(str::to_string);
        self.completed_at = Utc::now();
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
        self.completed_at = Utc::now();
    }

    pub fn record_verdict(&mut self, oracle_prompt: String, verdict: Option<OracleVerdict>) {
        self.oracle_prompt = Some(oracle_prompt);
        self.verdict = verdict;
        self.completed_at = Utc::now();
    }

    pub fn reflection(&self) -> Option<&str> {
        self.verdict.as_ref().and_then(|v| v.reflection.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PromptResult;

    #[test]
    fn test_entry_lifecycle() {
        let mut entry = ExecutionHistoryEntry::begin("s", 1, 2, "t-1", "capital?");
        entry.record_result(&PromptResult::ok("Paris"));
        entry.record_verdict(
            "verify".into(),
            Some(OracleVerdict::complete(0.95, "correct").with_reflection("short answers work")),
        );

        assert!(entry.success);
        assert_eq!(entry.output.as_deref(), Some("Paris"));
        assert_eq!(entry.reflection(), Some("short answers work"));
        assert!(entry.completed_at >= entry.started_at);
    }

    #[test]
    fn test_failure_keeps_prompt() {
        let mut entry = ExecutionHistoryEntry::begin("s", 1, 1, "t-1", "p");
        entry.record_failure("boom");
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("boom"));
        assert_eq!(entry.output, None);
        assert_eq!(entry.prompt, "p");
    }
}
