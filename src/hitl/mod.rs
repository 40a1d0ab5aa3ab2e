//! 人机协同（Human-in-the-Loop）
//!
//! 引擎在配置的介入点向人请求审批，任务完成后可选地请求反馈。
//! 具体的人机交互方式（终端、IM、Web）由 HumanInTheLoop 实现决定；
//! HumanGate 负责超时、自动批准与取消。

pub mod channel;
pub mod gate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use channel::{human_channel, ChannelHuman, HumanInbox, PendingInteraction};
pub use gate::{ApprovalOutcome, HumanGate};

/// 需要人工审批的介入点
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionPoint {
    BeforeTaskStart,
    /// Oracle 置信度低于 human_review_threshold
    OracleUncertain,
    OnTaskFailure,
    BeforeCheckpointRestore,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub point: InterventionPoint,
    pub request_id: String,
    pub summary: String,
    pub confidence: Option<f64>,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        point: InterventionPoint,
        request_id: impl Into<String>,
        summary: impl Into<String>,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            point,
            request_id: request_id.into(),
            summary: summary.into(),
            confidence,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    /// 批准，但用 modification 替换 prompt
    ModifyAndApprove,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub modification: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl ApprovalResponse {
    pub fn approved() -> Self {
        Self {
            decision: ApprovalDecision::Approved,
            modification: None,
            feedback: None,
        }
    }

    pub fn rejected() -> Self {
        Self {
            decision: ApprovalDecision::Rejected,
            ..Self::approved()
        }
    }

    pub fn modify(prompt: impl Into<String>) -> Self {
        Self {
            decision: ApprovalDecision::ModifyAndApprove,
            modification: Some(prompt.into()),
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// ModifyAndApprove 且给出了非空的新 prompt
    pub fn replacement_prompt(&self) -> Option<&str> {
        match self.decision {
            ApprovalDecision::ModifyAndApprove => self
                .modification
                .as_deref()
                .filter(|m| !m.trim().is_empty()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub id: String,
    pub request_id: String,
    pub output: String,
}

impl FeedbackRequest {
    pub fn new(request_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            output: output.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub satisfied: bool,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HumanError {
    #[error("Human provider unavailable")]
    Unavailable,

    #[error("Human interaction cancelled")]
    Cancelled,

    #[error("Human channel closed")]
    ChannelClosed,

    #[error("Human interaction failed: {0}")]
    Failed(String),
}

/// 人机交互提供方
#[async_trait]
pub trait HumanInTheLoop: Send + Sync {
    fn is_available(&self) -> bool;

    async fn request_approval(
        &self,
        request: ApprovalRequest,
        cancel: CancellationToken,
    ) -> Result<ApprovalResponse, HumanError>;

    async fn request_feedback(
        &self,
        request: FeedbackRequest,
        cancel: CancellationToken,
    ) -> Result<FeedbackResponse, HumanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacement_prompt_only_for_modify() {
        assert_eq!(ApprovalResponse::modify("new").replacement_prompt(), Some("new"));
        assert_eq!(ApprovalResponse::modify("  ").replacement_prompt(), None);

        let mut approved = ApprovalResponse::approved();
        approved.modification = Some("ignored".into());
        assert_eq!(approved.replacement_prompt(), None);
    }

    #[test]
    fn test_intervention_point_serde() {
        let json = serde_json::to_string(&InterventionPoint::BeforeCheckpointRestore).unwrap();
        assert_eq!(json, "\"before_checkpoint_restore\"");
        let point: InterventionPoint = serde_json::from_str("\"oracle_uncertain\"").unwrap();
        assert_eq!(point, InterventionPoint::OracleUncertain);
    }
}
