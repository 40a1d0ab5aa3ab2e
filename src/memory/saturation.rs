//! Saturation Monitor：token 预算占用统计与等级 / 动作信号
//!
//! 每次 record_usage 重新计算占比；等级为越过的最高阈值。
//! LevelChanged 只在等级真正变化时产生；auto_trigger 打开且建议动作非 None 时产生 ActionRequired。
//! reset_iteration 是迭代边界上的归零，不产生任何信号。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SaturationSection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationLevel {
    Normal,
    Elevated,
    High,
    Critical,
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    ConsiderSummarization,
    ShouldPageOut,
    MustEvict,
    Emergency,
}

impl SaturationLevel {
    pub fn recommended_action(self) -> RecommendedAction {
        match self {
            SaturationLevel::Normal => RecommendedAction::None,
            SaturationLevel::Elevated => RecommendedAction::ConsiderSummarization,
            SaturationLevel::High => RecommendedAction::ShouldPageOut,
            SaturationLevel::Critical => RecommendedAction::MustEvict,
            SaturationLevel::Overflow => RecommendedAction::Emergency,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SaturationState {
    pub level: SaturationLevel,
    pub percentage: f64,
    pub current_tokens: usize,
    pub usage_by_source: HashMap<String, usize>,
    pub recommended_action: RecommendedAction,
    pub updated_at: DateTime<Utc>,
}

impl SaturationState {
    fn empty() -> Self {
        Self {
            level: SaturationLevel::Normal,
            percentage: 0.0,
            current_tokens: 0,
            usage_by_source: HashMap::new(),
            recommended_action: RecommendedAction::None,
            updated_at: Utc::now(),
        }
    }
}

/// record_usage 产生的通知
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaturationSignal {
    LevelChanged {
        from: SaturationLevel,
        to: SaturationLevel,
        percentage: f64,
    },
    ActionRequired {
        action: RecommendedAction,
        tokens_to_free: usize,
    },
}

#[derive(Debug)]
pub struct SaturationMonitor {
    config: SaturationSection,
    state: SaturationState,
}

impl SaturationMonitor {
    pub fn new(config: SaturationSection) -> Self {
        Self {
            config,
            state: SaturationState::empty(),
        }
    }

    pub fn record_usage(&mut self, tokens: usize, source: &str) -> Vec<SaturationSignal> {
        *self
            .state
            .usage_by_source
            .entry(source.to_string())
            .or_insert(0) += tokens;
        self.state.current_tokens += tokens;

        let previous = self.state.level;
        let level = self.recompute();
        let percentage = self.state.percentage;

        let mut signals = Vec::new();
        if level != previous {
            tracing::debug!(?previous, ?level, percentage, "saturation level changed");
            signals.push(SaturationSignal::LevelChanged {
                from: previous,
                to: level,
                percentage,
            });
        }
        let tokens_to_free = self.tokens_to_free();
        if self.config.auto_trigger
            && self.state.recommended_action != RecommendedAction::None
            && tokens_to_free > 0
        {
            signals.push(SaturationSignal::ActionRequired {
                action: self.state.recommended_action,
                tokens_to_free,
            });
        }
        signals
    }

    /// 淘汰之后扣减占用并重算等级；不产生 LevelChanged，按来源的累计不变
    pub fn release(&mut self, freed: usize) {
        if freed == 0 {
            return;
        }
        self.state.current_tokens = self.state.current_tokens.saturating_sub(freed);
        self.recompute();
    }

    fn recompute(&mut self) -> SaturationLevel {
        let max = self.config.max_tokens.max(1);
        let percentage = self.state.current_tokens as f64 * 100.0 / max as f64;
        let level = self.level_for(percentage);
        self.state.percentage = percentage;
        self.state.level = level;
        self.state.recommended_action = level.recommended_action();
        self.state.updated_at = Utc::now();
        level
    }

    /// 降到 target_after_eviction_pct 需要释放的 token 数
    pub fn tokens_to_free(&self) -> usize {
        let target = (self.config.max_tokens as f64 * self.config.target_after_eviction_pct / 100.0) as usize;
        self.state.current_tokens.saturating_sub(target)
    }

    fn level_for(&self, percentage: f64) -> SaturationLevel {
        let c = &self.config;
        if percentage >= c.overflow_pct {
            SaturationLevel::Overflow
        } else if percentage >= c.critical_pct {
            SaturationLevel::Critical
        } else if percentage >= c.high_pct {
            SaturationLevel::High
        } else if percentage >= c.elevated_pct {
            SaturationLevel::Elevated
        } else {
            SaturationLevel::Normal
        }
    }

    pub fn reset_iteration(&mut self) {
        self.state = SaturationState::empty();
    }

    pub fn state(&self) -> &SaturationState {
        &self.state
    }
}
