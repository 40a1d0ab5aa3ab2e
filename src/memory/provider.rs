//! Context Provider：有界的近期输出缓冲（working memory 视图）与执行摘要
//!
//! - 超出 max_items 时丢弃最旧条目（FIFO）
//! - relevant_context 最多返回 7 条，最新在前
//! - execution_summary 从最旧开始拼接，直到再加一条就会超出 token 预算为止

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::tokenizer::TokenEstimator;

/// working memory 跨度：无论缓冲多大，relevant_context 只返回这么多条
pub const WORKING_MEMORY_SPAN: usize = 7;

#[derive(Clone, Debug, Serialize)]
pub struct ContextItem {
    pub content: String,
    /// 来源类型，如 task_output / oracle_analysis / human_feedback
    pub item_type: String,
    pub importance: f64,
    pub tokens: usize,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ContextProvider {
    items: VecDeque<ContextItem>,
    max_items: usize,
}

impl ContextProvider {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn record(&mut self, content: impl Into<String>, item_type: impl Into<String>, importance: f64) {
        let content = content.into();
        let tokens = TokenEstimator::estimate(&content);
        self.items.push_back(ContextItem {
            content,
            item_type: item_type.into(),
            importance: importance.clamp(0.0, 1.0),
            tokens,
            recorded_at: Utc::now(),
        });
        while self.items.len() > self.max_items {
            self.items.pop_front();
        }
    }

    /// 最近的至多 7 条，最新在前
    pub fn relevant_context(&self) -> Vec<ContextItem> {
        self.items
            .iter()
            .rev()
            .take(WORKING_MEMORY_SPAN)
            .cloned()
            .collect()
    }

    pub fn execution_summary(&self, max_tokens: usize) -> String {
        let mut used = 0usize;
        let mut parts = Vec::new();
        for item in &self.items {
            if used + item.tokens > max_tokens {
                break;
            }
            used += item.tokens;
            parts.push(format!("[{}] {}", item.item_type, item.content));
        }
        parts.join("\n")
    }

    /// 从最旧开始丢弃，直到至少释放 `tokens`；返回实际释放量
    pub fn evict_tokens(&mut self, tokens: usize) -> usize {
        let mut freed = 0usize;
        while freed < tokens {
            match self.items.pop_front() {
                Some(item) => freed += item.tokens,
                None => break,
            }
        }
        freed
    }

    pub fn total_tokens(&self) -> usize {
        self.items.iter().map(|i| i.tokens).sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl Default for ContextProvider {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction() {
        let mut provider = ContextProvider::new(3);
        for i in 0..5 {
            provider.record(format!("item {}", i), "task_output", 0.5);
        }
        assert_eq!(provider.len(), 3);
        let recent = provider.relevant_context();
        assert_eq!(recent[0].content, "item 4");
        assert_eq!(recent[2].content, "item 2");
    }

    #[test]
    fn test_relevant_context_capped_at_seven() {
        let mut provider = ContextProvider::new(100);
        for i in 0..20 {
            provider.record(format!("item {}", i), "task_output", 0.5);
        }
        let recent = provider.relevant_context();
        assert_eq!(recent.len(), WORKING_MEMORY_SPAN);
        assert_eq!(recent[0].content, "item 19");
        assert_eq!(recent[6].content, "item 13");
    }

    #[test]
    fn test_summary_respects_budget() {
        let mut provider = ContextProvider::new(10);
        // 每条 16 个 ASCII 字符 -> 4 token
        provider.record("aaaaaaaaaaaaaaaa", "a", 0.5);
        provider.record("bbbbbbbbbbbbbbbb", "b", 0.5);
        provider.record("cccccccccccccccc", "c", 0.5);

        let summary = provider.execution_summary(9);
        assert!(summary.contains("aaaa"));
        assert!(summary.contains("bbbb"));
        assert!(!summary.contains("cccc"));
        assert!(provider.execution_summary(3).is_empty());
    }

    #[test]
    fn test_evict_tokens_drops_oldest() {
        let mut provider = ContextProvider::new(10);
        provider.record("aaaaaaaaaaaaaaaa", "a", 0.5);
        provider.record("bbbbbbbbbbbbbbbb", "b", 0.5);
        provider.record("cccccccccccccccc", "c", 0.5);

        let freed = provider.evict_tokens(5);
        assert_eq!(freed, 8);
        assert_eq!(provider.len(), 1);
        assert_eq!(provider.relevant_context()[0].item_type, "c");
    }
}
