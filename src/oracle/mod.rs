//! Oracle：判断任务输出是否达成目标
//!
//! OracleVerifier 是可插拔的外部协作者；引擎只依赖它的契约：
//! 给出 verdict（是否完成、置信度、能否继续、下一轮 prompt、反思）。
//! 校验循环本身见 loop_.rs。

pub mod llm;
pub mod loop_;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::OracleSection;
use crate::llm::LlmError;

pub use llm::{parse_verdict, LlmOracle};
pub use loop_::{decide, OracleOutcome, VerdictDecision};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("Oracle failed: {0}")]
    Failed(String),

    #[error("Invalid oracle verdict: {0}")]
    InvalidVerdict(String),

    #[error("Oracle cancelled")]
    Cancelled,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

fn default_true() -> bool {
    true
}

/// 单次校验结论；confidence 始终在 [0, 1]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub is_complete: bool,
    pub confidence: f64,
    #[serde(default = "default_true")]
    pub can_continue: bool,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub next_prompt: Option<String>,
    #[serde(default)]
    pub reflection: Option<String>,
}

impl OracleVerdict {
    pub fn new(is_complete: bool, confidence: f64, can_continue: bool, analysis: impl Into<String>) -> Self {
        Self {
            is_complete,
            confidence,
            can_continue,
            analysis: analysis.into(),
            next_prompt: None,
            reflection: None,
        }
        .clamped()
    }

    /// 目标已达成
    pub fn complete(confidence: f64, analysis: impl Into<String>) -> Self {
        Self::new(true, confidence, false, analysis)
    }

    /// 未达成，用 next_prompt 再试一轮
    pub fn retry(confidence: f64, next_prompt: impl Into<String>) -> Self {
        Self::new(false, confidence, true, "").with_next_prompt(next_prompt)
    }

    /// 空白 prompt 视为 None
    pub fn with_next_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.next_prompt = non_blank(prompt.into());
        self
    }

    pub fn with_reflection(mut self, reflection: impl Into<String>) -> Self {
        self.reflection = non_blank(reflection.into());
        self
    }

    /// 把 confidence 收敛到 [0, 1]，NaN 视为 0；空字符串的 next_prompt / reflection 视为 None
    pub fn clamped(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self.next_prompt = self.next_prompt.and_then(non_blank);
        self.reflection = self.reflection.and_then(non_blank);
        self
    }
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// 交给 Oracle 的校验输入
#[derive(Clone, Debug)]
pub struct VerificationInput {
    pub request_id: String,
    pub original_prompt: String,
    pub output: String,
    /// Context Provider 给出的执行摘要
    pub context_summary: String,
    /// 由 build_verification_prompt 生成的完整 prompt
    pub verification_prompt: String,
    pub oracle_iteration: u32,
}

/// 按模板生成校验 prompt：单遍扫描替换 {original_prompt} / {output} / {context}，
/// 被替换进来的内容里即使含有占位符也不会再被展开
pub fn render_verification_prompt(template: &str, original_prompt: &str, output: &str, context: &str) -> String {
    let placeholders = [
        ("{original_prompt}", original_prompt),
        ("{output}", output),
        ("{context}", context),
    ];

    let mut rendered = String::with_capacity(template.len() + output.len() + context.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match placeholders.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                rendered.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Oracle 校验器
#[async_trait]
pub trait OracleVerifier: Send + Sync {
    /// 未配置的 Oracle 等同于没有 Oracle（单次执行模式）
    fn is_configured(&self) -> bool {
        true
    }

    fn build_verification_prompt(
        &self,
        original_prompt: &str,
        output: &str,
        context: &str,
        config: &OracleSection,
    ) -> String {
        render_verification_prompt(&config.prompt_template, original_prompt, output, context)
    }

    async fn verify(
        &self,
        input: VerificationInput,
        config: &OracleSection,
        cancel: CancellationToken,
    ) -> Result<OracleVerdict, OracleError>;
}
