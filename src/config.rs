//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEELINE__*` 覆盖（双下划线表示嵌套，
//! 如 `BEELINE__ORCHESTRATOR__MAX_ITERATIONS=5`）。
//! `OrchestratorConfig` 可序列化，检查点会保存一份快照。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::hitl::InterventionPoint;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub orchestrator: OrchestratorConfig,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 日志过滤指令，未设置时用 RUST_LOG / info
    pub log_filter: Option<String>,
}

/// 队列处理的结束条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// 队列取空即 Completed
    UntilQueueEmpty,
    /// 某个任务达成目标即 StoppedByGoalAchieved；队列空时轮询等待
    UntilGoalAchieved,
    /// 从不自行结束，只由最大迭代数 / stop / 失败终止
    Continuous,
}

impl Default for CompletionMode {
    fn default() -> Self {
        Self::UntilQueueEmpty
    }
}

/// [orchestrator] 段：主循环参数与各子系统配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub completion_mode: CompletionMode,
    /// 任务失败时记录错误并继续下一个任务
    #[serde(default)]
    pub continue_on_failure: bool,
    /// 队列空时的轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub resilience: ResilienceSection,
    #[serde(default)]
    pub human: HumanSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub saturation: SaturationSection,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            completion_mode: CompletionMode::default(),
            continue_on_failure: false,
            poll_interval_ms: default_poll_interval_ms(),
            oracle: OracleSection::default(),
            resilience: ResilienceSection::default(),
            human: HumanSection::default(),
            checkpoint: CheckpointSection::default(),
            context: ContextSection::default(),
            memory: MemorySection::default(),
            saturation: SaturationSection::default(),
        }
    }
}

/// 校验 prompt 模板中的占位符：{original_prompt} / {output} / {context}
pub const DEFAULT_VERIFICATION_TEMPLATE: &str = "You are verifying whether a task has been completed.\n\n\
## Original task\n{original_prompt}\n\n\
## Latest output\n{output}\n\n\
## Context\n{context}\n\n\
Reply with a single JSON object: {\"is_complete\": bool, \"confidence\": 0.0-1.0, \
\"can_continue\": bool, \"analysis\": string, \"next_prompt\": string|null, \"reflection\": string|null}";

/// [orchestrator.oracle] 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleSection {
    /// 单个任务的最大校验轮数
    #[serde(default = "default_max_oracle_iterations")]
    pub max_oracle_iterations: u32,
    /// is_complete 且 confidence 不低于此值才算达成目标
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// confidence 低于此值时可升级给人工
    #[serde(default = "default_human_review_threshold")]
    pub human_review_threshold: f64,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// 是否把 verdict 中的 reflection 写入上下文
    #[serde(default = "default_true")]
    pub enable_reflection: bool,
    /// 拼入校验 prompt 的上下文摘要 token 上限
    #[serde(default = "default_context_summary_tokens")]
    pub context_summary_tokens: usize,
}

fn default_max_oracle_iterations() -> u32 {
    5
}

fn default_min_confidence() -> f64 {
    0.8
}

fn default_human_review_threshold() -> f64 {
    0.5
}

fn default_prompt_template() -> String {
    DEFAULT_VERIFICATION_TEMPLATE.to_string()
}

fn default_context_summary_tokens() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            max_oracle_iterations: default_max_oracle_iterations(),
            min_confidence: default_min_confidence(),
            human_review_threshold: default_human_review_threshold(),
            prompt_template: default_prompt_template(),
            enable_reflection: true,
            context_summary_tokens: default_context_summary_tokens(),
        }
    }
}

/// [orchestrator.resilience] 段：重试与退避
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceSection {
    /// 最大尝试次数（含首次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            enable_fallback: true,
        }
    }
}

/// [orchestrator.human] 段：人机协同
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanSection {
    /// 单次审批 / 反馈等待上限（秒）
    #[serde(default = "default_human_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auto_approve_on_timeout: bool,
    /// 需要人工审批的介入点
    #[serde(default)]
    pub intervention_points: Vec<InterventionPoint>,
    /// 每个任务完成后请求一次反馈（尽力而为）
    #[serde(default)]
    pub feedback_after_task: bool,
}

fn default_human_timeout_secs() -> u64 {
    300
}

impl Default for HumanSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_human_timeout_secs(),
            auto_approve_on_timeout: false,
            intervention_points: Vec::new(),
            feedback_after_task: false,
        }
    }
}

impl HumanSection {
    pub fn requires(&self, point: InterventionPoint) -> bool {
        self.intervention_points.contains(&point)
    }
}

/// [orchestrator.checkpoint] 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 每隔多少次外层迭代保存一次
    #[serde(default = "default_checkpoint_interval")]
    pub interval: u32,
    /// 设置后，每次保存检查点都把全部检查点写入该 JSON 文件
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_checkpoint_interval() -> u32 {
    1
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_checkpoint_interval(),
            path: None,
        }
    }
}

/// [orchestrator.context] 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    /// 是否维护 ExecutionContext
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 写入上下文的输出截断长度（字符）
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Context Provider 缓冲上限
    #[serde(default = "default_max_buffer_items")]
    pub max_buffer_items: usize,
}

fn default_max_output_chars() -> usize {
    2000
}

fn default_max_buffer_items() -> usize {
    50
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_output_chars: default_max_output_chars(),
            max_buffer_items: default_max_buffer_items(),
        }
    }
}

/// [orchestrator.memory] 段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_max_units")]
    pub max_units: usize,
}

fn default_max_units() -> usize {
    1000
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_units: default_max_units(),
        }
    }
}

/// [orchestrator.saturation] 段：阈值均为百分比（0-100）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturationSection {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_elevated_pct")]
    pub elevated_pct: f64,
    #[serde(default = "default_high_pct")]
    pub high_pct: f64,
    #[serde(default = "default_critical_pct")]
    pub critical_pct: f64,
    #[serde(default = "default_overflow_pct")]
    pub overflow_pct: f64,
    #[serde(default = "default_true")]
    pub auto_trigger: bool,
    #[serde(default = "default_target_after_eviction_pct")]
    pub target_after_eviction_pct: f64,
}

fn default_max_tokens() -> usize {
    100_000
}

fn default_elevated_pct() -> f64 {
    50.0
}

fn default_high_pct() -> f64 {
    70.0
}

fn default_critical_pct() -> f64 {
    85.0
}

fn default_overflow_pct() -> f64 {
    95.0
}

fn default_target_after_eviction_pct() -> f64 {
    50.0
}

impl Default for SaturationSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            elevated_pct: default_elevated_pct(),
            high_pct: default_high_pct(),
            critical_pct: default_critical_pct(),
            overflow_pct: default_overflow_pct(),
            auto_trigger: true,
            target_after_eviction_pct: default_target_after_eviction_pct(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEELINE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEELINE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEELINE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
