//! Oracle 校验循环：对单个出队任务执行 → 校验 → 决定是否用新 prompt 再来一轮
//!
//! 每轮：Oracle 计数 +1 → 更新上下文 → TaskStarted → 附上上下文片段后经重试装饰器执行（部分输出转成 TaskOutput）
//! → 写入上下文 / 近期缓冲 / 记忆 / 饱和度 → 校验 → 追加历史。
//! 判定顺序固定：(a) 完成且置信度达标 → 达成目标；(b) 不能继续 → 停；(c) 有下一轮 prompt → 重试；(d) 停。
//! 置信度低于 human_review_threshold 时的人工介入发生在判定之前。

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OracleSection, OrchestratorConfig};
use crate::core::{EngineError, EventKind, ExecutionHistoryEntry, Orchestrator, OrchestratorEvent, OrchestratorState};
use crate::executor::{ExecutionError, TaskExecutor, TaskRequest, TaskResult};
use crate::hitl::{ApprovalDecision, InterventionPoint};
use crate::oracle::{OracleError, OracleVerdict, VerificationInput};

/// 对一次 verdict 的处理结论
#[derive(Clone, Debug, PartialEq)]
pub enum VerdictDecision {
    GoalAchieved,
    Stop,
    Retry(String),
}

/// 按固定顺序评估 verdict
pub fn decide(verdict: &OracleVerdict, config: &OracleSection) -> VerdictDecision {
    if verdict.is_complete && verdict.confidence >= config.min_confidence {
        VerdictDecision::GoalAchieved
    } else if !verdict.can_continue {
        VerdictDecision::Stop
    } else if let Some(next) = &verdict.next_prompt {
        VerdictDecision::Retry(next.clone())
    } else {
        VerdictDecision::Stop
    }
}

/// 校验循环的结果：最后一次执行结果、是否达成目标、实际轮数
#[derive(Clone, Debug)]
pub struct OracleOutcome<O> {
    pub result: O,
    pub goal_achieved: bool,
    pub passes: u32,
}

impl<E: TaskExecutor> Orchestrator<E> {
    pub(crate) async fn run_oracle_loop(
        &self,
        request: E::Request,
        config: &OrchestratorConfig,
        cancel: &CancellationToken,
    ) -> Result<OracleOutcome<E::Output>, EngineError> {
        let max_passes = config.oracle.max_oracle_iterations.max(1);
        let request_id = request.id().to_string();
        let original_prompt = request.prompt().to_string();
        let oracle = self.oracle.clone().filter(|o| o.is_configured());

        let mut current = request;
        let mut passes = 0;
        let mut last_result: Option<E::Output> = None;
        let mut goal_achieved = false;

        while passes < max_passes {
            passes += 1;
            self.set_oracle_iteration(passes, config).await;

            let (session_id, iteration) = self.session_position().await;
            let mut entry = ExecutionHistoryEntry::begin(
                &session_id,
                iteration,
                passes,
                &request_id,
                current.prompt(),
            );
            self.emit(EventKind::TaskStarted {
                request_id: request_id.clone(),
                oracle_iteration: passes,
                prompt: current.prompt().to_string(),
            })
            .await;

            let on_partial = |chunk: &str| {
                self.events.publish(&OrchestratorEvent::new(
                    OrchestratorState::Running,
                    session_id.clone(),
                    EventKind::TaskOutput {
                        request_id: request_id.clone(),
                        chunk: chunk.to_string(),
                    },
                ));
            };

            let prepared = match self.context().await {
                Some(ctx) => current.with_context(&ctx.to_prompt_section()),
                None => current.clone(),
            };
            let result = match self.executor.execute(&prepared, &on_partial, cancel.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    entry.record_failure(e.to_string());
                    self.push_history(entry).await;
                    return Err(match e {
                        ExecutionError::Cancelled => EngineError::Cancelled,
                        other => EngineError::Execution(other),
                    });
                }
            };
            entry.record_result(&result);
            self.record_output(&request_id, &result, config).await;
            last_result = Some(result.clone());

            let oracle = match &oracle {
                Some(oracle) => oracle,
                None => {
                    self.push_history(entry).await;
                    break;
                }
            };

            let context_summary = self
                .memory
                .lock()
                .await
                .summary(config.oracle.context_summary_tokens);
            let verification_prompt = oracle.build_verification_prompt(
                &original_prompt,
                result.output(),
                &context_summary,
                &config.oracle,
            );
            self.emit(EventKind::OracleVerifying {
                request_id: request_id.clone(),
                oracle_iteration: passes,
            })
            .await;

            let input = VerificationInput {
                request_id: request_id.clone(),
                original_prompt: original_prompt.clone(),
                output: result.output().to_string(),
                context_summary,
                verification_prompt: verification_prompt.clone(),
                oracle_iteration: passes,
            };
            let verdict = match oracle.verify(input, &config.oracle, cancel.clone()).await {
                Ok(verdict) => verdict.clamped(),
                Err(OracleError::Cancelled) => {
                    entry.record_verdict(verification_prompt, None);
                    self.push_history(entry).await;
                    return Err(EngineError::Cancelled);
                }
                Err(e) => {
                    warn!(%request_id, oracle_iteration = passes, error = %e, "oracle verification failed");
                    entry.record_verdict(verification_prompt, None);
                    self.push_history(entry).await;
                    self.emit(EventKind::OracleError {
                        request_id: request_id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    break;
                }
            };

            entry.record_verdict(verification_prompt, Some(verdict.clone()));
            self.push_history(entry).await;
            debug!(
                %request_id,
                oracle_iteration = passes,
                is_complete = verdict.is_complete,
                confidence = verdict.confidence,
                "oracle verified"
            );
            self.emit(EventKind::OracleVerified {
                request_id: request_id.clone(),
                verdict: verdict.clone(),
            })
            .await;

            let signals = self.memory.lock().await.record_analysis(&verdict.analysis);
            self.forward_saturation(signals).await;

            if config.oracle.enable_reflection {
                if let Some(reflection) = &verdict.reflection {
                    self.update_context(config, |ctx| ctx.with_reflection(reflection))
                        .await;
                    self.memory.lock().await.record_reflection(reflection);
                    self.emit(EventKind::ReflectionCaptured {
                        request_id: request_id.clone(),
                        reflection: reflection.clone(),
                    })
                    .await;
                }
            }

            if verdict.confidence < config.oracle.human_review_threshold {
                let summary = if verdict.analysis.is_empty() {
                    format!("oracle confidence {:.2}", verdict.confidence)
                } else {
                    verdict.analysis.clone()
                };
                let response = self
                    .request_approval(
                        InterventionPoint::OracleUncertain,
                        &request_id,
                        summary,
                        Some(verdict.confidence),
                        &config.human,
                        cancel,
                    )
                    .await?;
                if let Some(feedback) = &response.feedback {
                    self.apply_feedback(feedback, config).await;
                }
                if response.decision == ApprovalDecision::Rejected {
                    info!(%request_id, "refinement rejected by human");
                    break;
                }
                if let Some(prompt) = response.replacement_prompt() {
                    current = self.factory.create(request_id.clone(), prompt.to_string());
                    continue;
                }
            }

            match decide(&verdict, &config.oracle) {
                VerdictDecision::GoalAchieved => {
                    info!(%request_id, confidence = verdict.confidence, "goal achieved");
                    self.emit(EventKind::OracleComplete {
                        request_id: request_id.clone(),
                        confidence: verdict.confidence,
                    })
                    .await;
                    goal_achieved = true;
                    break;
                }
                VerdictDecision::Stop => break,
                VerdictDecision::Retry(next_prompt) => {
                    self.emit(EventKind::OracleRetrying {
                        request_id: request_id.clone(),
                        next_prompt: next_prompt.clone(),
                    })
                    .await;
                    current = self.factory.create(request_id.clone(), next_prompt);
                }
            }
        }

        let result = last_result.ok_or_else(|| {
            EngineError::Execution(ExecutionError::Failed("no oracle pass executed".to_string()))
        })?;
        Ok(OracleOutcome {
            result,
            goal_achieved,
            passes,
        })
    }

    async fn record_output(&self, request_id: &str, result: &E::Output, config: &OrchestratorConfig) {
        let output = result.output();
        if !output.is_empty() {
            let max_chars = config.context.max_output_chars;
            self.update_context(config, |ctx| ctx.with_output(output, max_chars))
                .await;
        }
        let signals = self
            .memory
            .lock()
            .await
            .record_output(request_id, output, result.success());
        self.forward_saturation(signals).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OracleSection {
        OracleSection {
            min_confidence: 0.8,
            ..OracleSection::default()
        }
    }

    #[test]
    fn test_complete_with_enough_confidence() {
        let v = OracleVerdict::complete(0.95, "ok").with_next_prompt("ignored");
        assert_eq!(decide(&v, &config()), VerdictDecision::GoalAchieved);
    }

    #[test]
    fn test_complete_but_low_confidence_falls_through() {
        let v = OracleVerdict::new(true, 0.6, true, "").with_next_prompt("double check");
        assert_eq!(decide(&v, &config()), VerdictDecision::Retry("double check".into()));

        let v = OracleVerdict::new(true, 0.6, false, "").with_next_prompt("double check");
        assert_eq!(decide(&v, &config()), VerdictDecision::Stop);
    }

    #[test]
    fn test_cannot_continue_wins_over_next_prompt() {
        let v = OracleVerdict::new(false, 0.9, false, "").with_next_prompt("again");
        assert_eq!(decide(&v, &config()), VerdictDecision::Stop);
    }

    #[test]
    fn test_no_next_prompt_stops() {
        let v = OracleVerdict::new(false, 0.3, true, "unclear");
        assert_eq!(decide(&v, &config()), VerdictDecision::Stop);
    }

    #[test]
    fn test_exact_threshold_counts() {
        let v = OracleVerdict::complete(0.8, "");
        assert_eq!(decide(&v, &config()), VerdictDecision::GoalAchieved);
    }
}
