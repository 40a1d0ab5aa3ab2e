//! beeline - 自主任务执行引擎
//!
//! 给定一个目标 / prompt，反复调用可插拔的执行器，请可插拔的 Oracle 判断目标是否达成，
//! 再决定用改进后的 prompt 重试、升级给人，还是停止。
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + 环境变量）
//! - **core**: 主控循环、状态、事件、运行监管、执行历史、检查点
//! - **executor**: 请求 / 结果契约、执行器 trait、重试 + 降级装饰器
//! - **hitl**: 人机协同审批与反馈
//! - **llm**: LLM 客户端抽象、Mock 实现、LLM 执行器
//! - **memory**: 执行上下文、近期缓冲、分层记忆、token 饱和度
//! - **observability**: tracing 初始化
//! - **oracle**: Oracle 契约、校验循环、LLM Oracle

pub mod config;
pub mod core;
pub mod executor;
pub mod hitl;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod oracle;

pub use crate::core::{EngineError, Orchestrator, OrchestratorBuilder, OrchestratorState};
pub use config::{load_config, AppConfig, OrchestratorConfig};
