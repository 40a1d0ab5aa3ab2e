//! 主控循环：任务队列、暂停 / 恢复 / 取消、检查点、事件
//!
//! 每个编排器只有一个控制任务（执行 start 的 future）。它按顺序处理队列：
//! 出队 → （可选）人工审批 → Oracle 校验循环 → 记录结果 → 按间隔保存检查点。
//! 其他任务可以并发地查询状态、入队、清空队列、暂停或停止；
//! 共享状态放在 RwLock 里，查询返回克隆的快照。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{CompletionMode, HumanSection, OrchestratorConfig};
use crate::core::{
    CheckpointFile, CheckpointStore, EngineError, EventBus, EventKind, ExecutionCheckpoint,
    ExecutionHistoryEntry, OrchestratorBuilder, OrchestratorEvent, OrchestratorState,
    OrchestratorStatus, Supervisor,
};
use crate::executor::{RequestFactory, ResilientExecutor, TaskExecutor, TaskRequest, TaskResult};
use crate::hitl::{
    ApprovalDecision, ApprovalOutcome, ApprovalRequest, ApprovalResponse, FeedbackRequest, HumanGate,
    InterventionPoint,
};
use crate::memory::{
    truncate_chars, ContextItem, ExecutionContext, MemoryManager, MemoryStatistics, SaturationSignal,
    SaturationState,
};
use crate::oracle::OracleVerifier;

/// 审批请求里展示的 prompt 摘要长度
const APPROVAL_SUMMARY_CHARS: usize = 200;

pub(crate) struct SharedState<R> {
    pub(crate) state: OrchestratorState,
    pub(crate) session_id: String,
    pub(crate) queue: VecDeque<R>,
    pub(crate) history: Vec<Arc<ExecutionHistoryEntry>>,
    pub(crate) checkpoints: CheckpointStore<R>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) iteration: u32,
    pub(crate) oracle_iteration: u32,
    pub(crate) last_error: Option<String>,
    pub(crate) context: Option<Arc<ExecutionContext>>,
}

impl<R> SharedState<R> {
    pub(crate) fn new(config: OrchestratorConfig) -> Self {
        Self {
            state: OrchestratorState::Idle,
            session_id: String::new(),
            queue: VecDeque::new(),
            history: Vec::new(),
            checkpoints: CheckpointStore::new(),
            config,
            iteration: 0,
            oracle_iteration: 0,
            last_error: None,
            context: None,
        }
    }
}

pub struct Orchestrator<E: TaskExecutor> {
    pub(crate) executor: ResilientExecutor<E>,
    pub(crate) oracle: Option<Arc<dyn OracleVerifier>>,
    pub(crate) human: Option<HumanGate>,
    pub(crate) factory: Arc<dyn RequestFactory<E::Request>>,
    pub(crate) events: EventBus,
    pub(crate) shared: RwLock<SharedState<E::Request>>,
    pub(crate) supervisor: Supervisor,
    pub(crate) memory: Mutex<MemoryManager>,
}

impl<E: TaskExecutor> Orchestrator<E> {
    pub fn builder(
        executor: E,
        factory: impl RequestFactory<E::Request> + 'static,
    ) -> OrchestratorBuilder<E> {
        OrchestratorBuilder::new(executor, factory)
    }

    // ---- 控制 ----

    /// 开始处理队列，直到终止条件出现；返回最终状态。
    /// 新会话：生成新的 session id，清空历史、迭代计数与上次错误；队列和检查点保留。
    pub async fn start(&self, config: OrchestratorConfig) -> Result<OrchestratorState, EngineError> {
        let cancel = {
            let mut shared = self.shared.write().await;
            if shared.state.is_active() {
                return Err(EngineError::AlreadyRunning);
            }
            shared.state = OrchestratorState::Running;
            shared.session_id = uuid::Uuid::new_v4().to_string();
            shared.history.clear();
            shared.iteration = 0;
            shared.oracle_iteration = 0;
            shared.last_error = None;
            shared.context = None;
            shared.config = config.clone();
            self.supervisor.renew().await
        };
        self.prepare_run(&config).await;
        self.run(cancel).await
    }

    /// 从检查点恢复后继续运行，保留恢复出的 session id 与迭代计数
    pub async fn start_from_checkpoint(
        &self,
        checkpoint_id: &str,
        config: Option<OrchestratorConfig>,
    ) -> Result<OrchestratorState, EngineError> {
        let (checkpoint, cancel) = {
            let shared = self.shared.read().await;
            if shared.state.is_active() {
                return Err(EngineError::AlreadyRunning);
            }
            let checkpoint = shared
                .checkpoints
                .get(checkpoint_id)
                .ok_or_else(|| EngineError::CheckpointNotFound(checkpoint_id.to_string()))?;
            (checkpoint, self.supervisor.renew().await)
        };

        let human = config
            .as_ref()
            .map(|c| c.human.clone())
            .unwrap_or_else(|| checkpoint.config.human.clone());
        let summary = format!(
            "restore checkpoint {} (iteration {}, {} queued)",
            checkpoint.id,
            checkpoint.iteration,
            checkpoint.queue.len()
        );
        let response = self
            .request_approval(
                InterventionPoint::BeforeCheckpointRestore,
                &checkpoint.id,
                summary,
                None,
                &human,
                &cancel,
            )
            .await?;
        if response.decision == ApprovalDecision::Rejected {
            info!(checkpoint_id, "checkpoint restore rejected");
            return Err(EngineError::ApprovalRejected);
        }

        self.restore_from_checkpoint(checkpoint_id).await?;

        let config = {
            let mut shared = self.shared.write().await;
            if shared.state.is_active() {
                return Err(EngineError::AlreadyRunning);
            }
            if let Some(config) = config {
                shared.config = config;
            }
            shared.state = OrchestratorState::Running;
            shared.last_error = None;
            shared.config.clone()
        };
        self.prepare_run(&config).await;
        self.run(cancel).await
    }

    pub async fn enqueue_task(&self, request: E::Request) -> usize {
        let request_id = request.id().to_string();
        let queue_len = {
            let mut shared = self.shared.write().await;
            shared.queue.push_back(request);
            shared.queue.len()
        };
        self.emit(EventKind::TaskEnqueued {
            request_id,
            queue_len,
        })
        .await;
        queue_len
    }

    /// 用请求工厂包装 prompt 并入队，返回生成的请求 id
    pub async fn enqueue_prompt(&self, prompt: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.enqueue_task(self.factory.create(id.clone(), prompt.into()))
            .await;
        id
    }

    pub async fn clear_queue(&self) -> usize {
        let removed = {
            let mut shared = self.shared.write().await;
            let removed = shared.queue.len();
            shared.queue.clear();
            removed
        };
        self.emit(EventKind::QueueCleared { removed }).await;
        removed
    }

    /// 请求暂停；在当前任务结束、下一次出队前生效
    pub async fn pause(&self) {
        info!("pause requested");
        self.supervisor.pause();
    }

    pub async fn resume(&self) {
        info!("resume requested");
        self.supervisor.resume();
    }

    /// 请求停止：取消令牌传给所有协作者，控制任务以 StoppedByUser 结束
    pub async fn stop(&self) {
        info!("stop requested");
        self.supervisor.cancel().await;
        self.supervisor.resume();
    }

    /// 用检查点整体替换会话、迭代计数、配置、队列与历史，并按历史重建执行上下文
    pub async fn restore_from_checkpoint(&self, checkpoint_id: &str) -> Result<(), EngineError> {
        let checkpoint = {
            let mut shared = self.shared.write().await;
            if shared.state.is_active() {
                return Err(EngineError::NotIdle);
            }
            let checkpoint = shared
                .checkpoints
                .get(checkpoint_id)
                .ok_or_else(|| EngineError::CheckpointNotFound(checkpoint_id.to_string()))?;

            shared.session_id = checkpoint.session_id.clone();
            shared.iteration = checkpoint.iteration;
            shared.oracle_iteration = 0;
            shared.config = checkpoint.config.clone();
            shared.queue = checkpoint.queue.iter().cloned().collect();
            shared.history = checkpoint.history.iter().cloned().map(Arc::new).collect();
            shared.last_error = None;
            shared.context = if checkpoint.config.context.enabled {
                rebuild_context(
                    &checkpoint.history,
                    checkpoint.config.context.max_output_chars,
                    checkpoint.config.oracle.enable_reflection,
                )
            } else {
                None
            };
            checkpoint
        };

        self.executor
            .set_config(checkpoint.config.resilience.clone())
            .await;
        info!(
            checkpoint_id,
            session_id = %checkpoint.session_id,
            iteration = checkpoint.iteration,
            "checkpoint restored"
        );
        self.emit(EventKind::CheckpointRestored {
            checkpoint_id: checkpoint.id.clone(),
            iteration: checkpoint.iteration,
        })
        .await;
        Ok(())
    }

    /// 追加一个外部检查点（例如从 CheckpointFile 读出的）
    pub async fn inject_checkpoint(
        &self,
        checkpoint: ExecutionCheckpoint<E::Request>,
    ) -> Arc<ExecutionCheckpoint<E::Request>> {
        let checkpoint = Arc::new(checkpoint);
        self.shared.write().await.checkpoints.push(checkpoint.clone());
        checkpoint
    }

    // ---- 查询 ----

    pub async fn status(&self) -> OrchestratorStatus {
        let shared = self.shared.read().await;
        OrchestratorStatus {
            state: shared.state,
            session_id: shared.session_id.clone(),
            queue_len: shared.queue.len(),
            iteration: shared.iteration,
            oracle_iteration: shared.oracle_iteration,
            checkpoint_count: shared.checkpoints.len(),
            history_len: shared.history.len(),
            last_error: shared.last_error.clone(),
            paused: self.supervisor.is_paused(),
        }
    }

    pub async fn history(&self) -> Vec<Arc<ExecutionHistoryEntry>> {
        self.shared.read().await.history.clone()
    }

    pub async fn history_entry(&self, id: &str) -> Option<Arc<ExecutionHistoryEntry>> {
        self.shared
            .read()
            .await
            .history
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub async fn checkpoints(&self) -> Vec<Arc<ExecutionCheckpoint<E::Request>>> {
        self.shared.read().await.checkpoints.list()
    }

    pub async fn queue(&self) -> Vec<E::Request> {
        self.shared.read().await.queue.iter().cloned().collect()
    }

    pub async fn config(&self) -> OrchestratorConfig {
        self.shared.read().await.config.clone()
    }

    pub async fn context(&self) -> Option<Arc<ExecutionContext>> {
        self.shared.read().await.context.clone()
    }

    pub async fn memory_statistics(&self) -> MemoryStatistics {
        self.memory.lock().await.statistics()
    }

    pub async fn saturation(&self) -> SaturationState {
        self.memory.lock().await.saturation_state()
    }

    pub async fn relevant_context(&self) -> Vec<ContextItem> {
        self.memory.lock().await.relevant_context()
    }

    pub fn executor(&self) -> &ResilientExecutor<E> {
        &self.executor
    }

    // ---- 主循环 ----

    async fn prepare_run(&self, config: &OrchestratorConfig) {
        *self.memory.lock().await =
            MemoryManager::new(&config.context, &config.memory, &config.saturation);
        self.executor.set_config(config.resilience.clone()).await;
        self.executor.reset_session().await;

        let session_id = self.shared.read().await.session_id.clone();
        info!(
            %session_id,
            mode = ?config.completion_mode,
            max_iterations = config.max_iterations,
            "orchestrator started"
        );
        self.emit(EventKind::Started {
            completion_mode: config.completion_mode,
        })
        .await;
    }

    async fn run(&self, cancel: CancellationToken) -> Result<OrchestratorState, EngineError> {
        match self.run_loop(&cancel).await {
            Ok(state) => {
                self.finish(state).await;
                Ok(state)
            }
            Err(e) => {
                error!(error = %e, "orchestrator stopped by error");
                self.finish(OrchestratorState::StoppedByError).await;
                Err(e)
            }
        }
    }

    async fn finish(&self, state: OrchestratorState) {
        {
            let mut shared = self.shared.write().await;
            shared.state = state;
            shared.oracle_iteration = 0;
        }
        if state == OrchestratorState::Completed {
            self.emit(EventKind::Completed).await;
        }
        info!(?state, "orchestrator stopped");
        self.emit(EventKind::Stopped { reason: state }).await;
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<OrchestratorState, EngineError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(OrchestratorState::StoppedByUser);
            }

            if self.supervisor.is_paused() {
                self.set_state(OrchestratorState::Paused).await;
                self.emit(EventKind::Paused).await;
                if !self.supervisor.wait_resumed(cancel).await {
                    return Ok(OrchestratorState::StoppedByUser);
                }
                self.set_state(OrchestratorState::Running).await;
                self.emit(EventKind::Resumed).await;
                continue;
            }

            let config = self.config().await;
            let (next, iteration_limit_hit) = {
                let mut shared = self.shared.write().await;
                if shared.queue.is_empty() {
                    (None, false)
                } else if shared.iteration >= config.max_iterations {
                    (None, true)
                } else {
                    (shared.queue.pop_front(), false)
                }
            };

            if iteration_limit_hit {
                info!(max_iterations = config.max_iterations, "max iterations reached");
                self.emit(EventKind::MaxIterationsReached {
                    max_iterations: config.max_iterations,
                })
                .await;
                return Ok(OrchestratorState::StoppedByMaxIterations);
            }

            let mut request = match next {
                Some(request) => request,
                None => {
                    if config.completion_mode == CompletionMode::UntilQueueEmpty {
                        return Ok(OrchestratorState::Completed);
                    }
                    self.emit(EventKind::QueueEmpty).await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(OrchestratorState::StoppedByUser),
                        _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {}
                    }
                    continue;
                }
            };

            let mut pending_feedback = None;
            if config.human.requires(InterventionPoint::BeforeTaskStart) {
                let summary = truncate_chars(request.prompt(), APPROVAL_SUMMARY_CHARS);
                let approval = self
                    .request_approval(
                        InterventionPoint::BeforeTaskStart,
                        request.id(),
                        summary,
                        None,
                        &config.human,
                        cancel,
                    )
                    .await;
                match approval {
                    Ok(response) if response.decision == ApprovalDecision::Rejected => {
                        info!(request_id = request.id(), "task rejected before start");
                        self.requeue_front(request).await;
                        return Ok(OrchestratorState::StoppedByUser);
                    }
                    Ok(response) => {
                        if let Some(prompt) = response.replacement_prompt() {
                            request = self
                                .factory
                                .create(request.id().to_string(), prompt.to_string());
                        }
                        pending_feedback = response.feedback;
                    }
                    Err(e) => {
                        self.requeue_front(request).await;
                        if e.is_cancellation() {
                            return Ok(OrchestratorState::StoppedByUser);
                        }
                        self.record_error(&e).await;
                        self.emit(EventKind::Error {
                            message: e.to_string(),
                        })
                        .await;
                        return Err(e);
                    }
                }
            }

            let iteration = self.begin_iteration(&request, &config).await;
            if let Some(feedback) = pending_feedback {
                self.apply_feedback(&feedback, &config).await;
            }
            let request_id = request.id().to_string();
            info!(iteration, %request_id, "iteration started");
            self.emit(EventKind::IterationStarted {
                iteration,
                request_id: request_id.clone(),
            })
            .await;

            match self.run_oracle_loop(request, &config, cancel).await {
                Ok(outcome) => {
                    let output = outcome.result.output().to_string();
                    self.emit(EventKind::TaskCompleted {
                        request_id: request_id.clone(),
                        output: output.clone(),
                        goal_achieved: outcome.goal_achieved,
                    })
                    .await;
                    if config.human.feedback_after_task {
                        self.collect_feedback(&request_id, &output, &config, cancel)
                            .await;
                    }
                    self.emit(EventKind::IterationCompleted {
                        iteration,
                        goal_achieved: outcome.goal_achieved,
                    })
                    .await;
                    self.maybe_checkpoint(iteration, &config).await;

                    if outcome.goal_achieved
                        && config.completion_mode == CompletionMode::UntilGoalAchieved
                    {
                        return Ok(OrchestratorState::StoppedByGoalAchieved);
                    }
                }
                Err(e) if e.is_cancellation() => {
                    self.maybe_checkpoint(iteration, &config).await;
                    return Ok(OrchestratorState::StoppedByUser);
                }
                Err(e) => {
                    let message = e.to_string();
                    self.record_error(&e).await;
                    self.emit(EventKind::TaskFailed {
                        request_id: request_id.clone(),
                        error: message.clone(),
                    })
                    .await;
                    self.maybe_checkpoint(iteration, &config).await;

                    if !config.continue_on_failure {
                        self.emit(EventKind::Error { message }).await;
                        return Err(e);
                    }
                    warn!(iteration, %request_id, error = %message, "task failed, continuing");

                    if config.human.requires(InterventionPoint::OnTaskFailure) {
                        let approval = self
                            .request_approval(
                                InterventionPoint::OnTaskFailure,
                                &request_id,
                                message,
                                None,
                                &config.human,
                                cancel,
                            )
                            .await;
                        match approval {
                            Ok(response) if response.decision == ApprovalDecision::Rejected => {
                                return Ok(OrchestratorState::StoppedByUser);
                            }
                            Ok(_) => {}
                            Err(e) if e.is_cancellation() => {
                                return Ok(OrchestratorState::StoppedByUser);
                            }
                            Err(e) => {
                                self.record_error(&e).await;
                                self.emit(EventKind::Error {
                                    message: e.to_string(),
                                })
                                .await;
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// 迭代计数 +1、Oracle 计数归零、token 计数归零、上下文切换到新任务
    async fn begin_iteration(&self, request: &E::Request, config: &OrchestratorConfig) -> u32 {
        let iteration = {
            let mut shared = self.shared.write().await;
            shared.iteration += 1;
            shared.oracle_iteration = 0;
            let iteration = shared.iteration;
            if config.context.enabled {
                let next = match &shared.context {
                    Some(ctx) => ctx.with_goal(request.prompt(), iteration),
                    None => ExecutionContext::new(request.prompt()).with_iteration(iteration),
                };
                shared.context = Some(next);
            }
            iteration
        };
        self.memory.lock().await.begin_iteration();
        if config.context.enabled {
            self.emit(EventKind::ContextUpdated {
                iteration,
                oracle_iteration: 0,
            })
            .await;
        }
        iteration
    }

    async fn requeue_front(&self, request: E::Request) {
        self.shared.write().await.queue.push_front(request);
    }

    async fn record_error(&self, error: &EngineError) {
        self.shared.write().await.last_error = Some(error.to_string());
    }

    async fn set_state(&self, state: OrchestratorState) {
        self.shared.write().await.state = state;
    }

    async fn maybe_checkpoint(&self, iteration: u32, config: &OrchestratorConfig) {
        let checkpoint = &config.checkpoint;
        if checkpoint.enabled && checkpoint.interval > 0 && iteration % checkpoint.interval == 0 {
            self.create_checkpoint().await;
        }
    }

    /// 在一次写锁内捕获队列、历史与配置；设置了 checkpoint.path 时整体写盘（失败只记录日志）
    pub(crate) async fn create_checkpoint(&self) -> Arc<ExecutionCheckpoint<E::Request>> {
        let (checkpoint, persist) = {
            let mut shared = self.shared.write().await;
            let checkpoint = Arc::new(ExecutionCheckpoint {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: shared.session_id.clone(),
                iteration: shared.iteration,
                created_at: Utc::now(),
                queue: shared.queue.iter().cloned().collect(),
                history: shared.history.iter().map(|e| e.as_ref().clone()).collect(),
                config: shared.config.clone(),
            });
            shared.checkpoints.push(checkpoint.clone());
            let persist = shared
                .config
                .checkpoint
                .path
                .clone()
                .map(|path| (path, shared.checkpoints.list()));
            (checkpoint, persist)
        };

        if let Some((path, list)) = persist {
            if let Err(e) = CheckpointFile::new(&path).save(&list) {
                warn!(path = %path.display(), error = %e, "failed to persist checkpoints");
            }
        }

        tracing::debug!(checkpoint_id = %checkpoint.id, iteration = checkpoint.iteration, "checkpoint created");
        self.emit(EventKind::CheckpointCreated {
            checkpoint_id: checkpoint.id.clone(),
            iteration: checkpoint.iteration,
        })
        .await;
        checkpoint
    }

    // ---- 供 Oracle 校验循环使用 ----

    pub(crate) async fn emit(&self, kind: EventKind) {
        if self.events.is_empty() {
            return;
        }
        let (state, session_id) = {
            let shared = self.shared.read().await;
            (shared.state, shared.session_id.clone())
        };
        self.events
            .publish(&OrchestratorEvent::new(state, session_id, kind));
    }

    pub(crate) async fn session_position(&self) -> (String, u32) {
        let shared = self.shared.read().await;
        (shared.session_id.clone(), shared.iteration)
    }

    pub(crate) async fn push_history(&self, entry: ExecutionHistoryEntry) {
        self.shared.write().await.history.push(Arc::new(entry));
    }

    /// 未启用上下文或上下文尚未建立时返回 false
    pub(crate) async fn update_context<F>(&self, config: &OrchestratorConfig, update: F) -> bool
    where
        F: FnOnce(&ExecutionContext) -> Arc<ExecutionContext>,
    {
        if !config.context.enabled {
            return false;
        }
        let mut shared = self.shared.write().await;
        let next = shared.context.as_deref().map(update);
        match next {
            Some(next) => {
                shared.context = Some(next);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn set_oracle_iteration(&self, oracle_iteration: u32, config: &OrchestratorConfig) {
        self.shared.write().await.oracle_iteration = oracle_iteration;
        if self
            .update_context(config, |ctx| ctx.with_oracle_iteration(oracle_iteration))
            .await
        {
            let iteration = self.shared.read().await.iteration;
            self.emit(EventKind::ContextUpdated {
                iteration,
                oracle_iteration,
            })
            .await;
        }
    }

    pub(crate) async fn apply_feedback(&self, feedback: &str, config: &OrchestratorConfig) {
        self.update_context(config, |ctx| ctx.with_feedback(feedback))
            .await;
        self.memory.lock().await.record_feedback(feedback);
    }

    /// 把饱和度信号转成事件；ActionRequired 时从近期缓冲释放 token
    pub(crate) async fn forward_saturation(&self, signals: Vec<SaturationSignal>) {
        for signal in signals {
            match signal {
                SaturationSignal::LevelChanged {
                    from,
                    to,
                    percentage,
                } => {
                    info!(?from, ?to, percentage, "context saturation changed");
                    self.emit(EventKind::SaturationChanged {
                        from,
                        to,
                        percentage,
                    })
                    .await;
                }
                SaturationSignal::ActionRequired {
                    action,
                    tokens_to_free,
                } => {
                    let freed = self.memory.lock().await.free_tokens(tokens_to_free);
                    tracing::debug!(?action, tokens_to_free, freed, "evicted context items");
                    self.emit(EventKind::EvictionRequested {
                        action,
                        tokens_to_free,
                        freed,
                    })
                    .await;
                }
            }
        }
    }

    /// 介入点未配置或提供方不可用时直接视为批准。
    /// 超时且不自动批准、或被取消时返回 EngineError::Cancelled。
    pub(crate) async fn request_approval(
        &self,
        point: InterventionPoint,
        request_id: &str,
        summary: String,
        confidence: Option<f64>,
        human: &HumanSection,
        cancel: &CancellationToken,
    ) -> Result<ApprovalResponse, EngineError> {
        let gate = match &self.human {
            Some(gate) if gate.is_active() && human.requires(point) => gate,
            _ => return Ok(ApprovalResponse::approved()),
        };

        let request = ApprovalRequest::new(point, request_id, summary, confidence);
        let approval_id = request.id.clone();
        info!(?point, %request_id, "approval requested");
        self.emit(EventKind::ApprovalRequested {
            request: request.clone(),
        })
        .await;

        match gate.request_approval(request, human, cancel).await? {
            ApprovalOutcome::Responded(response) => {
                info!(?point, decision = ?response.decision, "approval received");
                self.emit(EventKind::ApprovalReceived {
                    approval_id,
                    decision: response.decision,
                })
                .await;
                Ok(response)
            }
            ApprovalOutcome::AutoApproved => {
                self.emit(EventKind::ApprovalTimeout {
                    approval_id,
                    auto_approved: true,
                })
                .await;
                Ok(ApprovalResponse::approved())
            }
            ApprovalOutcome::TimedOut => {
                self.emit(EventKind::ApprovalTimeout {
                    approval_id,
                    auto_approved: false,
                })
                .await;
                Err(EngineError::Cancelled)
            }
        }
    }

    async fn collect_feedback(
        &self,
        request_id: &str,
        output: &str,
        config: &OrchestratorConfig,
        cancel: &CancellationToken,
    ) {
        let gate = match &self.human {
            Some(gate) if gate.is_active() => gate,
            _ => return,
        };

        let request = FeedbackRequest::new(request_id, output);
        self.emit(EventKind::FeedbackRequested {
            request: request.clone(),
        })
        .await;

        if let Some(response) = gate.request_feedback(request, &config.human, cancel).await {
            if let Some(comments) = response.comments.as_deref().filter(|c| !c.trim().is_empty()) {
                self.apply_feedback(comments, config).await;
            }
            self.emit(EventKind::FeedbackReceived {
                request_id: request_id.to_string(),
                response,
            })
            .await;
        }
    }
}

/// 按时间顺序重放历史：每个外层迭代换目标，输出截断写入；
/// 与运行时一致，只有 enable_reflection 打开时才追加反思
fn rebuild_context(
    history: &[ExecutionHistoryEntry],
    max_output_chars: usize,
    enable_reflection: bool,
) -> Option<Arc<ExecutionContext>> {
    let mut entries: Vec<&ExecutionHistoryEntry> = history.iter().collect();
    entries.sort_by_key(|e| e.started_at);

    let mut context: Option<Arc<ExecutionContext>> = None;
    for entry in entries {
        let base = match &context {
            Some(ctx) if ctx.iteration == entry.iteration => ctx.clone(),
            Some(ctx) => ctx.with_goal(&entry.prompt, entry.iteration),
            None => ExecutionContext::new(entry.prompt.clone()).with_iteration(entry.iteration),
        };
        let mut next = base.with_oracle_iteration(entry.oracle_iteration);
        if let Some(output) = &entry.output {
            next = next.with_output(output, max_output_chars);
        }
        if enable_reflection {
            if let Some(reflection) = entry.reflection() {
                next = next.with_reflection(reflection);
            }
        }
        context = Some(next);
    }
    context
}
