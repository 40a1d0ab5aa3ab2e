//! 编排器事件：生命周期、队列、迭代、任务、Oracle、人机协同、检查点、上下文、饱和度
//!
//! 每个事件都带当前状态、会话 id 与时间戳，可序列化为 JSON 供前端 / 日志展示。
//! EventBus 在发出事件的任务上同步投递给所有订阅者。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::CompletionMode;
use crate::core::OrchestratorState;
use crate::hitl::{ApprovalDecision, ApprovalRequest, FeedbackRequest, FeedbackResponse};
use crate::memory::{RecommendedAction, SaturationLevel};
use crate::oracle::OracleVerdict;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Started { completion_mode: CompletionMode },
    /// 终止事件，reason 为最终状态
    Stopped { reason: OrchestratorState },
    Paused,
    Resumed,
    Completed,
    Error { message: String },

    TaskEnqueued { request_id: String, queue_len: usize },
    QueueCleared { removed: usize },
    QueueEmpty,

    IterationStarted { iteration: u32, request_id: String },
    IterationCompleted { iteration: u32, goal_achieved: bool },
    MaxIterationsReached { max_iterations: u32 },

    TaskStarted { request_id: String, oracle_iteration: u32, prompt: String },
    /// 执行器流式输出的一段
    TaskOutput { request_id: String, chunk: String },
    TaskFailed { request_id: String, error: String },
    TaskCompleted { request_id: String, output: String, goal_achieved: bool },

    OracleVerifying { request_id: String, oracle_iteration: u32 },
    OracleVerified { request_id: String, verdict: OracleVerdict },
    OracleComplete { request_id: String, confidence: f64 },
    OracleRetrying { request_id: String, next_prompt: String },
    OracleError { request_id: String, error: String },

    ApprovalRequested { request: ApprovalRequest },
    ApprovalReceived { approval_id: String, decision: ApprovalDecision },
    ApprovalTimeout { approval_id: String, auto_approved: bool },
    FeedbackRequested { request: FeedbackRequest },
    FeedbackReceived { request_id: String, response: FeedbackResponse },

    CheckpointCreated { checkpoint_id: String, iteration: u32 },
    CheckpointRestored { checkpoint_id: String, iteration: u32 },

    ContextUpdated { iteration: u32, oracle_iteration: u32 },
    ReflectionCaptured { request_id: String, reflection: String },

    SaturationChanged { from: SaturationLevel, to: SaturationLevel, percentage: f64 },
    EvictionRequested { action: RecommendedAction, tokens_to_free: usize, freed: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorEvent {
    pub state: OrchestratorState,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl OrchestratorEvent {
    pub fn new(state: OrchestratorState, session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            state,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// 事件订阅者：同步回调，不应阻塞
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &OrchestratorEvent);
}

impl<F> EventSubscriber for F
where
    F: Fn(&OrchestratorEvent) + Send + Sync,
{
    fn on_event(&self, event: &OrchestratorEvent) {
        self(event)
    }
}

/// 转发到无界通道；接收端关闭后静默丢弃
struct ChannelSubscriber(mpsc::UnboundedSender<OrchestratorEvent>);

impl EventSubscriber for ChannelSubscriber {
    fn on_event(&self, event: &OrchestratorEvent) {
        let _ = self.0.send(event.clone());
    }
}

/// 观察者列表；订阅在引擎运行前完成
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: impl EventSubscriber + 'static) {
        self.subscribers.push(Arc::new(subscriber));
    }

    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(ChannelSubscriber(tx));
        rx
    }

    pub fn publish(&self, event: &OrchestratorEvent) {
        for subscriber in &self.subscribers {
            subscriber.on_event(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_event_serializes_flat_with_tag() {
        let event = OrchestratorEvent::new(
            OrchestratorState::Running,
            "s-1",
            EventKind::TaskEnqueued {
                request_id: "t-1".into(),
                queue_len: 2,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_enqueued");
        assert_eq!(json["state"], "running");
        assert_eq!(json["session_id"], "s-1");
        assert_eq!(json["queue_len"], 2);
    }

    #[test]
    fn test_closure_and_channel_subscribers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut bus = EventBus::new();
        bus.subscribe(move |e: &OrchestratorEvent| sink.lock().unwrap().push(e.kind.clone()));
        let mut rx = bus.subscribe_channel();
        assert_eq!(bus.len(), 2);

        bus.publish(&OrchestratorEvent::new(OrchestratorState::Idle, "", EventKind::QueueEmpty));

        assert!(matches!(seen.lock().unwrap()[0], EventKind::QueueEmpty));
        assert!(matches!(rx.try_recv().unwrap().kind, EventKind::QueueEmpty));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let mut bus = EventBus::new();
        drop(bus.subscribe_channel());
        bus.publish(&OrchestratorEvent::new(OrchestratorState::Idle, "", EventKind::Paused));
    }
}
