//! Mock LLM 客户端（用于测试与演示，无需 API）
//!
//! 默认回显最后一条 User 消息；scripted 模式按顺序返回预置回复，用完后重复最后一条。
//! 流式输出按空白切分成多个 chunk。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, Message, Role, TokenStream};
use crate::memory::TokenEstimator;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Vec<Result<String, LlmError>>,
    calls: AtomicUsize,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl MockLlmClient {
    /// 回显模式
    pub fn echo() -> Self {
        Self::default()
    }

    /// 依次返回 replies 中的内容
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// 脚本中可以混入错误
    pub fn with_results(results: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: results.into_iter().collect(),
            ..Self::default()
        }
    }

    /// 已调用次数（complete 与 complete_stream 都计入）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, messages: &[Message]) -> Result<String, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = match self.script.get(n).or_else(|| self.script.last()) {
            Some(scripted) => scripted.clone(),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {}", last_user))
            }
        }?;

        let prompt: usize = messages
            .iter()
            .map(|m| TokenEstimator::estimate(&m.content))
            .sum();
        self.prompt_tokens.fetch_add(prompt as u64, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(TokenEstimator::estimate(&reply) as u64, Ordering::Relaxed);
        Ok(reply)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.next_reply(messages)
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.next_reply(messages)?;
        let chunks: Vec<Result<String, LlmError>> = content
            .split_inclusive(char::is_whitespace)
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_echo_last_user_message() {
        let mock = MockLlmClient::echo();
        let reply = mock
            .complete(&[Message::system("sys"), Message::user("hi there")])
            .await
            .unwrap();
        assert_eq!(reply, "Echo from Mock: hi there");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_script_repeats_last_reply() {
        let mock = MockLlmClient::scripted(["one", "two"]);
        let msgs = [Message::user("q")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "one");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "two");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let mock = MockLlmClient::with_results([Err(LlmError::ApiError("down".into()))]);
        let err = mock.complete(&[Message::user("q")]).await.unwrap_err();
        assert_eq!(err, LlmError::ApiError("down".into()));
    }

    #[tokio::test]
    async fn test_stream_chunks_reassemble() {
        let mock = MockLlmClient::scripted(["the capital is Paris"]);
        let mut stream = mock.complete_stream(&[Message::user("q")]).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), "the capital is Paris");

        let (p, c, total) = mock.token_usage();
        assert!(p > 0 && c > 0);
        assert_eq!(total, p + c);
    }
}
