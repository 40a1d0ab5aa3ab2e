//! 审批 / 反馈闸门：超时、自动批准、取消
//!
//! 审批超时：配置了 auto_approve_on_timeout 则视为批准，否则视为取消（由调用方决定如何停止）。
//! 反馈是尽力而为的：失败或超时只记录日志。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::HumanSection;
use crate::hitl::{
    ApprovalRequest, ApprovalResponse, FeedbackRequest, FeedbackResponse, HumanError, HumanInTheLoop,
};

/// 一次审批的结局
#[derive(Clone, Debug, PartialEq)]
pub enum ApprovalOutcome {
    Responded(ApprovalResponse),
    /// 超时后按配置自动批准
    AutoApproved,
    /// 超时且不自动批准
    TimedOut,
}

impl ApprovalOutcome {
    /// 供控制流使用的最终回应；TimedOut 没有回应
    pub fn response(&self) -> Option<ApprovalResponse> {
        match self {
            ApprovalOutcome::Responded(r) => Some(r.clone()),
            ApprovalOutcome::AutoApproved => Some(ApprovalResponse::approved()),
            ApprovalOutcome::TimedOut => None,
        }
    }
}

#[derive(Clone)]
pub struct HumanGate {
    provider: Arc<dyn HumanInTheLoop>,
}

impl HumanGate {
    pub fn new(provider: Arc<dyn HumanInTheLoop>) -> Self {
        Self { provider }
    }

    /// 提供方不可用时整个闸门视为未配置
    pub fn is_active(&self) -> bool {
        self.provider.is_available()
    }

    pub async fn request_approval(
        &self,
        request: ApprovalRequest,
        config: &HumanSection,
        cancel: &CancellationToken,
    ) -> Result<ApprovalOutcome, HumanError> {
        let wait = Duration::from_secs(config.timeout_secs);
        let call = self.provider.request_approval(request, cancel.clone());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HumanError::Cancelled),
            r = tokio::time::timeout(wait, call) => r,
        };

        match result {
            Ok(response) => response.map(ApprovalOutcome::Responded),
            Err(_) if config.auto_approve_on_timeout => {
                tracing::warn!(timeout_secs = config.timeout_secs, "approval timed out, auto-approving");
                Ok(ApprovalOutcome::AutoApproved)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = config.timeout_secs, "approval timed out");
                Ok(ApprovalOutcome::TimedOut)
            }
        }
    }

    /// 尽力而为的反馈：任何失败都返回 None
    pub async fn request_feedback(
        &self,
        request: FeedbackRequest,
        config: &HumanSection,
        cancel: &CancellationToken,
    ) -> Option<FeedbackResponse> {
        let wait = Duration::from_secs(config.timeout_secs);
        let call = self.provider.request_feedback(request, cancel.clone());
        match tokio::time::timeout(wait, call).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "feedback request failed");
                None
            }
            Err(_) => {
                tracing::warn!(timeout_secs = config.timeout_secs, "feedback request timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::hitl::{ApprovalDecision, InterventionPoint};

    /// 永远不回应的提供方
    struct SilentHuman;

    #[async_trait]
    impl HumanInTheLoop for SilentHuman {
        fn is_available(&self) -> bool {
            true
        }

        async fn request_approval(
            &self,
            _request: ApprovalRequest,
            cancel: CancellationToken,
        ) -> Result<ApprovalResponse, HumanError> {
            cancel.cancelled().await;
            Err(HumanError::Cancelled)
        }

        async fn request_feedback(
            &self,
            _request: FeedbackRequest,
            _cancel: CancellationToken,
        ) -> Result<FeedbackResponse, HumanError> {
            Err(HumanError::Failed("no operator".into()))
        }
    }

    fn config(auto_approve: bool) -> HumanSection {
        HumanSection {
            timeout_secs: 1,
            auto_approve_on_timeout: auto_approve,
            ..HumanSection::default()
        }
    }

    fn request() -> ApprovalRequest {
        ApprovalRequest::new(InterventionPoint::BeforeTaskStart, "t", "run it?", None)
    }

    #[tokio::test]
    async fn test_timeout_auto_approves() {
        let gate = HumanGate::new(Arc::new(SilentHuman));
        let outcome = gate
            .request_approval(request(), &config(true), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::AutoApproved);
        assert_eq!(outcome.response().unwrap().decision, ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn test_timeout_without_auto_approve() {
        let gate = HumanGate::new(Arc::new(SilentHuman));
        let outcome = gate
            .request_approval(request(), &config(false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
        assert!(outcome.response().is_none());
    }

    #[tokio::test]
    async fn test_cancel_wins_over_waiting() {
        let gate = HumanGate::new(Arc::new(SilentHuman));
        let token = CancellationToken::new();
        token.cancel();
        let err = gate
            .request_approval(request(), &config(true), &token)
            .await
            .unwrap_err();
        assert_eq!(err, HumanError::Cancelled);
    }

    #[tokio::test]
    async fn test_feedback_failure_is_swallowed() {
        let gate = HumanGate::new(Arc::new(SilentHuman));
        let fb = gate
            .request_feedback(FeedbackRequest::new("t", "o"), &config(false), &CancellationToken::new())
            .await;
        assert!(fb.is_none());
    }
}
