//! 任务执行层：请求 / 结果契约、执行器 trait、请求工厂，以及重试 + 降级装饰器
//!
//! 引擎对请求 / 结果的具体类型保持多态：只依赖 TaskRequest / TaskResult 两个 trait。
//! 默认提供 PromptRequest / PromptResult 这一对最简实现。

pub mod fallback;
pub mod resilience;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use fallback::{FallbackContext, FallbackStrategy, PooledFallback};
pub use resilience::{backoff_delay, ResilientExecutor};

/// 任务请求：不透明 id + prompt。检查点会快照队列，因此需要可序列化
pub trait TaskRequest: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn id(&self) -> &str;
    fn prompt(&self) -> &str;

    /// 执行前附上执行上下文片段（目标 / 上次输出 / learnings / 人工反馈）；默认忽略
    fn with_context(&self, _context: &str) -> Self {
        self.clone()
    }
}

/// 任务结果：成功标志、输出文本、可选错误
pub trait TaskResult: Clone + Debug + Send + Sync + 'static {
    fn success(&self) -> bool;
    fn output(&self) -> &str;
    fn error(&self) -> Option<&str>;

    /// 降级策略产出的结果
    fn degraded(output: String) -> Self
    where
        Self: Sized;
}

/// 执行器错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("Execution cancelled")]
    Cancelled,

    /// 重试与降级都已用尽，包装最后一次底层错误
    #[error("Execution failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// 流式部分输出回调
pub type PartialOutput<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// 任务执行器：必须响应 cancel；返回前可调用 on_partial 零次或多次
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    type Request: TaskRequest;
    type Output: TaskResult;

    async fn execute(
        &self,
        request: &Self::Request,
        on_partial: PartialOutput<'_>,
        cancel: CancellationToken,
    ) -> Result<Self::Output, ExecutionError>;
}

/// 请求工厂：(id, prompt) -> request；人工修改 prompt、Oracle 给出下一轮 prompt 时用它重建请求
pub trait RequestFactory<R>: Send + Sync {
    fn create(&self, id: String, prompt: String) -> R;
}

impl<R, F> RequestFactory<R> for F
where
    F: Fn(String, String) -> R + Send + Sync,
{
    fn create(&self, id: String, prompt: String) -> R {
        self(id, prompt)
    }
}

/// 默认请求类型
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub id: String,
    pub prompt: String,
    /// 仅在执行时由编排器附上，不进入队列与检查点
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl PromptRequest {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            context: None,
        }
    }

    /// 可直接交给 OrchestratorBuilder 的工厂
    pub fn factory() -> impl RequestFactory<PromptRequest> {
        |id: String, prompt: String| PromptRequest::new(id, prompt)
    }
}

impl TaskRequest for PromptRequest {
    fn id(&self) -> &str {
        &self.id
    }

    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn with_context(&self, context: &str) -> Self {
        Self {
            context: Some(context.to_string()).filter(|c| !c.trim().is_empty()),
            ..self.clone()
        }
    }
}

/// 默认结果类型
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl PromptResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

impl TaskResult for PromptResult {
    fn success(&self) -> bool {
        self.success
    }

    fn output(&self) -> &str {
        &self.output
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn degraded(output: String) -> Self {
        Self::ok(output)
    }
}
