//! 降级策略：重试用尽后提供「可用但降级」的结果
//!
//! 策略必须确定且不重复：不返回本会话已产出过的输出，选项用尽或剩余选项全部重复时报告无法帮助。

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::executor::{ExecutionError, TaskRequest, TaskResult};

/// 降级决策所需的上下文
#[derive(Debug)]
pub struct FallbackContext<'a, R> {
    pub request: &'a R,
    pub retry_count: u32,
    pub last_error: Option<&'a str>,
    /// 本会话已经产出的输出（含此前的降级结果）
    pub previous_outputs: &'a [String],
}

#[async_trait]
pub trait FallbackStrategy<R: TaskRequest, O: TaskResult>: Send + Sync {
    async fn can_help(&self, ctx: &FallbackContext<'_, R>) -> bool;

    async fn fallback(&self, ctx: &FallbackContext<'_, R>) -> Result<O, ExecutionError>;
}

/// 固定选项池：按顺序给出尚未给出、且不与历史输出重复的第一个选项
#[derive(Debug)]
pub struct PooledFallback {
    options: Vec<String>,
    handed_out: Mutex<HashSet<usize>>,
}

impl PooledFallback {
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
            handed_out: Mutex::new(HashSet::new()),
        }
    }

    fn next_index(&self, handed_out: &HashSet<usize>, previous: &[String]) -> Option<usize> {
        self.options
            .iter()
            .enumerate()
            .find(|(i, opt)| !handed_out.contains(i) && !previous.iter().any(|p| p == *opt))
            .map(|(i, _)| i)
    }

    pub async fn remaining(&self) -> usize {
        self.options.len() - self.handed_out.lock().await.len()
    }
}

#[async_trait]
impl<R: TaskRequest, O: TaskResult> FallbackStrategy<R, O> for PooledFallback {
    async fn can_help(&self, ctx: &FallbackContext<'_, R>) -> bool {
        let handed_out = self.handed_out.lock().await;
        self.next_index(&handed_out, ctx.previous_outputs).is_some()
    }

    async fn fallback(&self, ctx: &FallbackContext<'_, R>) -> Result<O, ExecutionError> {
        let mut handed_out = self.handed_out.lock().await;
        let idx = self
            .next_index(&handed_out, ctx.previous_outputs)
            .ok_or_else(|| ExecutionError::Failed("fallback pool exhausted".to_string()))?;
        handed_out.insert(idx);
        tracing::info!(request_id = ctx.request.id(), option = idx, "serving fallback result");
        Ok(O::degraded(self.options[idx].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{PromptRequest, PromptResult};

    fn ctx<'a>(req: &'a PromptRequest, previous: &'a [String]) -> FallbackContext<'a, PromptRequest> {
        FallbackContext {
            request: req,
            retry_count: 3,
            last_error: Some("boom"),
            previous_outputs: previous,
        }
    }

    #[tokio::test]
    async fn test_hands_out_each_option_once() {
        let pool = PooledFallback::new(["a", "b"]);
        let req = PromptRequest::new("t", "p");
        let mut previous: Vec<String> = Vec::new();

        for expected in ["a", "b"] {
            let c = ctx(&req, &previous);
            assert!(FallbackStrategy::<PromptRequest, PromptResult>::can_help(&pool, &c).await);
            let r: PromptResult = pool.fallback(&c).await.unwrap();
            assert_eq!(r.output, expected);
            previous.push(r.output);
        }

        let c = ctx(&req, &previous);
        assert!(!FallbackStrategy::<PromptRequest, PromptResult>::can_help(&pool, &c).await);
        let err = FallbackStrategy::<PromptRequest, PromptResult>::fallback(&pool, &c)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Failed(_)));
    }

    #[tokio::test]
    async fn test_skips_previously_produced_output() {
        let pool = PooledFallback::new(["same", "different"]);
        let req = PromptRequest::new("t", "p");
        let previous = vec!["same".to_string()];

        let r: PromptResult = pool.fallback(&ctx(&req, &previous)).await.unwrap();
        assert_eq!(r.output, "different");
        assert_eq!(pool.remaining().await, 1);
    }

    #[tokio::test]
    async fn test_cannot_help_when_all_remaining_duplicate() {
        let pool = PooledFallback::new(["x", "y"]);
        let req = PromptRequest::new("t", "p");
        let previous = vec!["x".to_string(), "y".to_string()];
        let c = ctx(&req, &previous);
        assert!(!FallbackStrategy::<PromptRequest, PromptResult>::can_help(&pool, &c).await);
    }
}
