//! 基于 LLM 的 Oracle：把校验 prompt 发给模型，从回复中解析 JSON verdict
//!
//! 回复可以是 ```json 代码块、混杂文字中的 {...}，或纯 JSON。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::OracleSection;
use crate::llm::{LlmClient, Message};
use crate::oracle::{OracleError, OracleVerdict, OracleVerifier, VerificationInput};

/// 从 LLM 回复中提取并解析 verdict
pub fn parse_verdict(reply: &str) -> Result<OracleVerdict, OracleError> {
    let trimmed = reply.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => trimmed,
        }
    } else {
        return Err(OracleError::InvalidVerdict(format!("no JSON object in reply: {}", trimmed)));
    };

    let verdict: OracleVerdict = serde_json::from_str(json_str)
        .map_err(|e| OracleError::InvalidVerdict(format!("{}: {}", e, json_str)))?;
    Ok(verdict.clamped())
}

pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
    system_prompt: Option<String>,
}

impl LlmOracle {
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
}

#[async_trait]
impl OracleVerifier for LlmOracle {
    async fn verify(
        &self,
        input: VerificationInput,
        _config: &OracleSection,
        cancel: CancellationToken,
    ) -> Result<OracleVerdict, OracleError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(input.verification_prompt));

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OracleError::Cancelled),
            r = self.llm.complete(&messages) => r?,
        };

        let verdict = parse_verdict(&reply)?;
        tracing::debug!(
            request_id = %input.request_id,
            oracle_iteration = input.oracle_iteration,
            is_complete = verdict.is_complete,
            confidence = verdict.confidence,
            "oracle verdict"
        );
        Ok(verdict)
    }
}
