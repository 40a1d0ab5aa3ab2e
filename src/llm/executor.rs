//! 基于 LlmClient 的任务执行器
//!
//! 以流式方式调用模型，每个 chunk 通过 on_partial 转发（编排器把它变成 TaskOutput 事件）。
//! 取消令牌在每个 chunk 之间检查。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutionError, PartialOutput, PromptRequest, PromptResult, TaskExecutor};
use crate::llm::{LlmClient, Message};

pub struct LlmExecutor {
    llm: Arc<dyn LlmClient>,
    system_prompt: Option<String>,
}

impl LlmExecutor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// system prompt → 执行上下文（作为 system 消息）→ 用户 prompt
    fn messages(&self, request: &PromptRequest) -> Vec<Message> {
        let mut messages = Vec::with_capacity(3);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        if let Some(context) = &request.context {
            messages.push(Message::system(context.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));
        messages
    }
}

#[async_trait]
impl TaskExecutor for LlmExecutor {
    type Request = PromptRequest;
    type Output = PromptResult;

    async fn execute(
        &self,
        request: &PromptRequest,
        on_partial: PartialOutput<'_>,
        cancel: CancellationToken,
    ) -> Result<PromptResult, ExecutionError> {
        let messages = self.messages(request);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            s = self.llm.complete_stream(&messages) => s.map_err(|e| ExecutionError::Failed(e.to_string()))?,
        };

        let mut output = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                n = stream.next() => n,
            };
            match next {
                Some(Ok(chunk)) => {
                    on_partial(&chunk);
                    output.push_str(&chunk);
                }
                Some(Err(e)) => return Ok(PromptResult::failed(e.to_string())),
                None => break,
            }
        }

        tracing::debug!(request_id = %request.id, chars = output.len(), "llm execution finished");
        Ok(PromptResult::ok(output))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::executor::TaskRequest;
    use crate::llm::{LlmError, MockLlmClient};

    #[tokio::test]
    async fn test_streams_partial_output() {
        let exec = LlmExecutor::new(Arc::new(MockLlmClient::scripted(["a b c"])));
        let seen = Mutex::new(Vec::new());
        let on_partial = |chunk: &str| seen.lock().unwrap().push(chunk.to_string());

        let result = exec
            .execute(&PromptRequest::new("t", "p"), &on_partial, CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "a b c");
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_llm_error_is_failed_execution() {
        let exec = LlmExecutor::new(Arc::new(MockLlmClient::with_results([Err(
            LlmError::ApiError("quota".into()),
        )])));
        let err = exec
            .execute(&PromptRequest::new("t", "p"), &|_: &str| {}, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Failed(msg) if msg.contains("quota")));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let exec = LlmExecutor::new(Arc::new(MockLlmClient::echo()));
        let token = CancellationToken::new();
        token.cancel();
        let err = exec
            .execute(&PromptRequest::new("t", "p"), &|_: &str| {}, token)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Cancelled);
    }

    #[test]
    fn test_system_prompt_goes_first() {
        let exec = LlmExecutor::new(Arc::new(MockLlmClient::echo())).with_system_prompt("be brief");
        let msgs = exec.messages(&PromptRequest::new("t", "q"));
        assert_eq!(msgs, vec![Message::system("be brief"), Message::user("q")]);
    }

    #[test]
    fn test_context_sits_between_system_and_user() {
        let exec = LlmExecutor::new(Arc::new(MockLlmClient::echo())).with_system_prompt("be brief");
        let req = PromptRequest::new("t", "q").with_context("## Learnings\n- cite sources");
        let msgs = exec.messages(&req);
        assert_eq!(
            msgs,
            vec![
                Message::system("be brief"),
                Message::system("## Learnings\n- cite sources"),
                Message::user("q"),
            ]
        );
    }
}
