//! 执行上下文（Execution Context）
//!
//! 不可变值：原始目标、外层/Oracle 迭代计数、截断后的上一次输出、累计的 learnings / insights / 人工反馈。
//! 每次更新都返回新的 `Arc<ExecutionContext>`（copy-on-write），正在读取旧值的一方不会看到半更新状态。

use std::sync::Arc;

use serde::Serialize;

use crate::memory::tokenizer::truncate_chars;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionContext {
    pub original_goal: String,
    pub iteration: u32,
    pub oracle_iteration: u32,
    pub previous_output: Option<String>,
    pub learnings: Vec<String>,
    pub insights: Vec<String>,
    pub human_feedback: Vec<String>,
}

impl ExecutionContext {
    pub fn new(original_goal: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            original_goal: original_goal.into(),
            ..Self::default()
        })
    }

    /// 进入新的外层迭代：Oracle 计数归零
    pub fn with_iteration(&self, iteration: u32) -> Arc<Self> {
        Arc::new(Self {
            iteration,
            oracle_iteration: 0,
            ..self.clone()
        })
    }

    /// 新任务出队：换目标并进入新迭代，保留已积累的 learnings / 反馈
    pub fn with_goal(&self, original_goal: &str, iteration: u32) -> Arc<Self> {
        Arc::new(Self {
            original_goal: original_goal.to_string(),
            iteration,
            oracle_iteration: 0,
            ..self.clone()
        })
    }

    pub fn with_oracle_iteration(&self, oracle_iteration: u32) -> Arc<Self> {
        Arc::new(Self {
            oracle_iteration,
            ..self.clone()
        })
    }

    /// 记录最近一次输出，超过 max_chars 时截断
    pub fn with_output(&self, output: &str, max_chars: usize) -> Arc<Self> {
        Arc::new(Self {
            previous_output: Some(truncate_chars(output, max_chars)),
            ..self.clone()
        })
    }

    /// Oracle 反思同时作为 learning 与 insight 写入
    pub fn with_reflection(&self, reflection: &str) -> Arc<Self> {
        let mut next = self.clone();
        next.learnings.push(reflection.to_string());
        next.insights.push(reflection.to_string());
        Arc::new(next)
    }

    pub fn with_feedback(&self, feedback: &str) -> Arc<Self> {
        let mut next = self.clone();
        next.human_feedback.push(feedback.to_string());
        Arc::new(next)
    }

    /// 构建供 Prompt 使用的片段（目标 / 上一次输出 / Learnings / 人工反馈）
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if !self.original_goal.is_empty() {
            s.push_str(&format!("## Goal\n{}\n\n", self.original_goal));
        }
        s.push_str(&format!(
            "## Progress\niteration {} / oracle pass {}\n\n",
            self.iteration, self.oracle_iteration
        ));
        if let Some(out) = &self.previous_output {
            s.push_str(&format!("## Previous output\n{}\n\n", out));
        }
        if !self.learnings.is_empty() {
            s.push_str("## Learnings\n");
            for l in &self.learnings {
                s.push_str(&format!("- {}\n", l));
            }
            s.push('\n');
        }
        if !self.human_feedback.is_empty() {
            s.push_str("## Human feedback\n");
            for f in &self.human_feedback {
                s.push_str(&format!("- {}\n", f));
            }
            s.push('\n');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_do_not_touch_previous_value() {
        let base = ExecutionContext::new("find the capital");
        let next = base.with_iteration(3).with_reflection("check spelling");

        assert_eq!(base.iteration, 0);
        assert!(base.learnings.is_empty());
        assert_eq!(next.iteration, 3);
        assert_eq!(next.learnings, vec!["check spelling".to_string()]);
        assert_eq!(next.insights, vec!["check spelling".to_string()]);
        assert_eq!(next.original_goal, "find the capital");
    }

    #[test]
    fn test_new_iteration_resets_oracle_counter() {
        let ctx = ExecutionContext::new("g").with_oracle_iteration(4).with_iteration(2);
        assert_eq!(ctx.oracle_iteration, 0);
        assert_eq!(ctx.iteration, 2);
    }

    #[test]
    fn test_with_goal_keeps_learnings() {
        let ctx = ExecutionContext::new("first")
            .with_reflection("be precise")
            .with_oracle_iteration(2)
            .with_goal("second", 5);
        assert_eq!(ctx.original_goal, "second");
        assert_eq!(ctx.iteration, 5);
        assert_eq!(ctx.oracle_iteration, 0);
        assert_eq!(ctx.learnings, vec!["be precise".to_string()]);
    }

    #[test]
    fn test_output_is_truncated() {
        let ctx = ExecutionContext::new("g").with_output("abcdefghij", 4);
        assert_eq!(ctx.previous_output.as_deref(), Some("abcd..."));
    }

    #[test]
    fn test_prompt_section() {
        let ctx = ExecutionContext::new("goal")
            .with_feedback("be brief")
            .with_reflection("use sources");
        let section = ctx.to_prompt_section();
        assert!(section.contains("## Goal\ngoal"));
        assert!(section.contains("- be brief"));
        assert!(section.contains("- use sources"));
    }
}
