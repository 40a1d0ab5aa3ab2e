//! 基于通道的人机交互提供方
//!
//! 引擎侧持有 ChannelHuman；操作者侧从 HumanInbox 取出待处理的交互，
//! 通过其中的 oneshot 回应。每次交互都是一次性的会合点。

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::hitl::{
    ApprovalRequest, ApprovalResponse, FeedbackRequest, FeedbackResponse, HumanError, HumanInTheLoop,
};

/// 等待操作者回应的交互
#[derive(Debug)]
pub enum PendingInteraction {
    Approval {
        request: ApprovalRequest,
        responder: oneshot::Sender<ApprovalResponse>,
    },
    Feedback {
        request: FeedbackRequest,
        responder: oneshot::Sender<FeedbackResponse>,
    },
}

/// 创建一对相连的提供方 / 收件箱
pub fn human_channel() -> (ChannelHuman, HumanInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelHuman { tx }, HumanInbox { rx })
}

#[derive(Debug, Clone)]
pub struct ChannelHuman {
    tx: mpsc::UnboundedSender<PendingInteraction>,
}

#[derive(Debug)]
pub struct HumanInbox {
    rx: mpsc::UnboundedReceiver<PendingInteraction>,
}

impl HumanInbox {
    pub async fn recv(&mut self) -> Option<PendingInteraction> {
        self.rx.recv().await
    }

    /// 取出下一条审批请求并回应；遇到反馈请求时回应「满意」
    pub async fn answer_next_approval<F>(&mut self, decide: F) -> Option<ApprovalRequest>
    where
        F: FnOnce(&ApprovalRequest) -> ApprovalResponse,
    {
        loop {
            match self.rx.recv().await? {
                PendingInteraction::Approval { request, responder } => {
                    let _ = responder.send(decide(&request));
                    return Some(request);
                }
                PendingInteraction::Feedback { responder, .. } => {
                    let _ = responder.send(FeedbackResponse {
                        satisfied: true,
                        comments: None,
                    });
                }
            }
        }
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<T>, cancel: &CancellationToken) -> Result<T, HumanError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HumanError::Cancelled),
        r = rx => r.map_err(|_| HumanError::ChannelClosed),
    }
}

#[async_trait]
impl HumanInTheLoop for ChannelHuman {
    fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn request_approval(
        &self,
        request: ApprovalRequest,
        cancel: CancellationToken,
    ) -> Result<ApprovalResponse, HumanError> {
        let (responder, rx) = oneshot::channel();
        self.tx
            .send(PendingInteraction::Approval { request, responder })
            .map_err(|_| HumanError::ChannelClosed)?;
        await_reply(rx, &cancel).await
    }

    async fn request_feedback(
        &self,
        request: FeedbackRequest,
        cancel: CancellationToken,
    ) -> Result<FeedbackResponse, HumanError> {
        let (responder, rx) = oneshot::channel();
        self.tx
            .send(PendingInteraction::Feedback { request, responder })
            .map_err(|_| HumanError::ChannelClosed)?;
        await_reply(rx, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::{ApprovalDecision, InterventionPoint};

    #[tokio::test]
    async fn test_approval_round_trip() {
        let (human, mut inbox) = human_channel();
        let operator = tokio::spawn(async move {
            inbox
                .answer_next_approval(|req| ApprovalResponse::modify(format!("{} (short)", req.summary)))
                .await
        });

        let req = ApprovalRequest::new(InterventionPoint::BeforeTaskStart, "t-1", "summarise", None);
        let resp = human.request_approval(req, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.decision, ApprovalDecision::ModifyAndApprove);
        assert_eq!(resp.replacement_prompt(), Some("summarise (short)"));

        let seen = operator.await.unwrap().unwrap();
        assert_eq!(seen.request_id, "t-1");
    }

    #[tokio::test]
    async fn test_unavailable_after_inbox_dropped() {
        let (human, inbox) = human_channel();
        assert!(human.is_available());
        drop(inbox);
        assert!(!human.is_available());

        let req = ApprovalRequest::new(InterventionPoint::OnTaskFailure, "t", "s", None);
        let err = human.request_approval(req, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, HumanError::ChannelClosed);
    }

    #[tokio::test]
    async fn test_dropped_responder_is_channel_closed() {
        let (human, mut inbox) = human_channel();
        tokio::spawn(async move {
            // 取出后直接丢弃 responder
            let _ = inbox.recv().await;
        });
        let err = human
            .request_feedback(FeedbackRequest::new("t", "out"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, HumanError::ChannelClosed);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let (human, _inbox) = human_channel();
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            t.cancel();
        });
        let req = ApprovalRequest::new(InterventionPoint::BeforeTaskStart, "t", "s", None);
        let err = human.request_approval(req, token).await.unwrap_err();
        assert_eq!(err, HumanError::Cancelled);
    }
}
