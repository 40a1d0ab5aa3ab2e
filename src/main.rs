//! beeline 演示入口
//!
//! 把命令行参数作为 prompt 入队，用 Mock LLM 作为执行器与 Oracle 跑一遍主循环，
//! 每个事件打印为一行 JSON。Ctrl+C 触发 stop。

use std::sync::Arc;

use anyhow::Context;
use beeline::config::load_config;
use beeline::core::{Orchestrator, OrchestratorEvent};
use beeline::executor::PromptRequest;
use beeline::llm::{LlmExecutor, MockLlmClient};
use beeline::observability;
use beeline::oracle::LlmOracle;

const MOCK_VERDICT: &str = r#"{"is_complete": true, "confidence": 0.9, "can_continue": false, "analysis": "mock oracle accepts the answer"}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(None).context("Failed to load config")?;
    observability::init(config.app.log_filter.as_deref())?;

    let prompts: Vec<String> = std::env::args().skip(1).collect();
    if prompts.is_empty() {
        anyhow::bail!("usage: beeline <prompt>...");
    }

    let executor = LlmExecutor::new(Arc::new(MockLlmClient::echo()));
    let oracle = LlmOracle::new(Arc::new(MockLlmClient::scripted([MOCK_VERDICT])));
    let orchestrator = Orchestrator::builder(executor, PromptRequest::factory())
        .with_oracle(Arc::new(oracle))
        .with_config(config.orchestrator.clone())
        .subscribe(|event: &OrchestratorEvent| match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        })
        .build();
    let orchestrator = Arc::new(orchestrator);

    for prompt in prompts {
        orchestrator.enqueue_prompt(prompt).await;
    }

    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop().await;
        }
    });

    let state = orchestrator
        .start(config.orchestrator)
        .await
        .context("Orchestrator run failed")?;
    let status = orchestrator.status().await;
    tracing::info!(?state, iterations = status.iteration, checkpoints = status.checkpoint_count, "run finished");
    Ok(())
}
