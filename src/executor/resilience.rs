//! 重试 + 降级装饰器
//!
//! 透明包装任意 TaskExecutor：最多尝试 max_retries 次，结果 success 且输出非空才算有效；
//! 失败后按 initial_delay × multiplier^(attempt-1) 退避（不超过 max_delay）。
//! 取消立即返回，不再重试也不降级；重试用尽后若降级策略能帮忙则返回降级结果，否则返回 Exhausted。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ResilienceSection;
use crate::executor::{
    ExecutionError, FallbackContext, FallbackStrategy, PartialOutput, TaskExecutor, TaskResult,
};

/// 第 attempt 次（从 1 开始）失败后的等待时间
pub fn backoff_delay(config: &ResilienceSection, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = if raw.is_finite() {
        raw.max(0.0).min(config.max_delay_ms as f64)
    } else {
        config.max_delay_ms as f64
    };
    Duration::from_millis(capped as u64)
}

type SharedFallback<E> = Arc<
    dyn FallbackStrategy<<E as TaskExecutor>::Request, <E as TaskExecutor>::Output>,
>;

pub struct ResilientExecutor<E: TaskExecutor> {
    inner: E,
    config: RwLock<ResilienceSection>,
    fallback: Option<SharedFallback<E>>,
    /// 本会话产出过的有效输出，供降级策略去重
    session_outputs: Mutex<Vec<String>>,
}

impl<E: TaskExecutor> ResilientExecutor<E> {
    pub fn new(inner: E, config: ResilienceSection) -> Self {
        Self {
            inner,
            config: RwLock::new(config),
            fallback: None,
            session_outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: SharedFallback<E>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub async fn set_config(&self, config: ResilienceSection) {
        *self.config.write().await = config;
    }

    pub async fn session_outputs(&self) -> Vec<String> {
        self.session_outputs.lock().await.clone()
    }

    /// 新会话开始时清空输出记录
    pub async fn reset_session(&self) {
        self.session_outputs.lock().await.clear();
    }

    async fn try_fallback(
        &self,
        request: &E::Request,
        attempts: u32,
        last_error: &str,
    ) -> Option<E::Output> {
        let fallback = self.fallback.as_ref()?;
        let previous = self.session_outputs.lock().await.clone();
        let ctx = FallbackContext {
            request,
            retry_count: attempts,
            last_error: Some(last_error),
            previous_outputs: &previous,
        };
        if !fallback.can_help(&ctx).await {
            tracing::warn!("fallback strategy cannot help");
            return None;
        }
        match fallback.fallback(&ctx).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(error = %e, "fallback strategy failed");
                None
            }
        }
    }
}

#[async_trait]
impl<E: TaskExecutor> TaskExecutor for ResilientExecutor<E> {
    type Request = E::Request;
    type Output = E::Output;

    async fn execute(
        &self,
        request: &Self::Request,
        on_partial: PartialOutput<'_>,
        cancel: CancellationToken,
    ) -> Result<Self::Output, ExecutionError> {
        let config = self.config.read().await.clone();
        let attempts = config.max_retries.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            let outcome = self.inner.execute(request, on_partial, cancel.clone()).await;
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            match outcome {
                Ok(result) if result.success() && !result.output().is_empty() => {
                    self.session_outputs
                        .lock()
                        .await
                        .push(result.output().to_string());
                    return Ok(result);
                }
                Ok(result) => {
                    last_error = result
                        .error()
                        .map(str::to_string)
                        .unwrap_or_else(|| "executor returned empty output".to_string());
                }
                Err(ExecutionError::Cancelled) => return Err(ExecutionError::Cancelled),
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(attempt, attempts, error = %last_error, "task attempt failed");

            if attempt < attempts {
                let delay = backoff_delay(&config, attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if config.enable_fallback {
            if let Some(result) = self.try_fallback(request, attempts, &last_error).await {
                self.session_outputs
                    .lock()
                    .await
                    .push(result.output().to_string());
                return Ok(result);
            }
        }

        Err(ExecutionError::Exhausted {
            attempts,
            last_error,
        })
    }
}
