//! 三层记忆协调
//!
//! 将 Context Provider（近期输出）、Memory Store（分层记忆单元）、Saturation Monitor（token 占用）
//! 统一为 MemoryManager，供 Oracle 校验循环写入输出与反思、拼装校验 prompt 的上下文摘要。
//! 它只是旁路：不参与控制流决策。

use crate::config::{ContextSection, MemorySection, SaturationSection};
use crate::memory::{
    ContextItem, ContextProvider, MemoryStatistics, MemoryStore, MemoryTier, MemoryType,
    NewMemory, SaturationMonitor, SaturationSignal, SaturationState, TokenEstimator,
};

#[derive(Debug)]
pub struct MemoryManager {
    pub provider: ContextProvider,
    pub store: MemoryStore,
    pub saturation: SaturationMonitor,
}

impl MemoryManager {
    pub fn new(context: &ContextSection, memory: &MemorySection, saturation: &SaturationSection) -> Self {
        Self {
            provider: ContextProvider::new(context.max_buffer_items),
            store: MemoryStore::new(memory.max_units),
            saturation: SaturationMonitor::new(saturation.clone()),
        }
    }

    /// 记录一次执行输出：写入近期缓冲、情景记忆，并计入 token 占用
    pub fn record_output(&mut self, request_id: &str, output: &str, success: bool) -> Vec<SaturationSignal> {
        if output.is_empty() {
            return Vec::new();
        }
        let importance = if success { 0.6 } else { 0.3 };
        self.provider.record(output, "task_output", importance);
        self.store.store(
            NewMemory::new(output, MemoryType::Episodic, MemoryTier::Session)
                .with_importance(importance)
                .with_metadata("request_id", serde_json::json!(request_id))
                .with_metadata("success", serde_json::json!(success)),
        );
        self.record_usage(output, "task_output")
    }

    /// 记录 Oracle 的分析文本
    pub fn record_analysis(&mut self, analysis: &str) -> Vec<SaturationSignal> {
        if analysis.is_empty() {
            return Vec::new();
        }
        self.provider.record(analysis, "oracle_analysis", 0.5);
        self.record_usage(analysis, "oracle")
    }

    /// 反思写入长期层，保持度高于普通输出
    pub fn record_reflection(&mut self, reflection: &str) {
        self.provider.record(reflection, "reflection", 0.8);
        self.store.store(
            NewMemory::new(reflection, MemoryType::Reflective, MemoryTier::LongTerm)
                .with_importance(0.8)
                .with_retention(1.0),
        );
    }

    pub fn record_feedback(&mut self, feedback: &str) {
        self.provider.record(feedback, "human_feedback", 0.9);
    }

    fn record_usage(&mut self, text: &str, source: &str) -> Vec<SaturationSignal> {
        self.saturation.record_usage(TokenEstimator::estimate(text), source)
    }

    /// 处理 ActionRequired：从近期缓冲中释放 token 并从占用中扣减，返回释放量
    pub fn free_tokens(&mut self, tokens: usize) -> usize {
        let freed = self.provider.evict_tokens(tokens);
        self.saturation.release(freed);
        freed
    }

    /// 迭代边界：token 计数归零
    pub fn begin_iteration(&mut self) {
        self.saturation.reset_iteration();
    }

    pub fn summary(&self, max_tokens: usize) -> String {
        self.provider.execution_summary(max_tokens)
    }

    pub fn relevant_context(&self) -> Vec<ContextItem> {
        self.provider.relevant_context()
    }

    pub fn statistics(&self) -> MemoryStatistics {
        self.store.statistics()
    }

    pub fn saturation_state(&self) -> SaturationState {
        self.saturation.state().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFilter, SaturationLevel};

    fn manager() -> MemoryManager {
        MemoryManager::new(
            &ContextSection::default(),
            &MemorySection { max_units: 5 },
            &SaturationSection {
                max_tokens: 20,
                ..SaturationSection::default()
            },
        )
    }

    #[test]
    fn test_record_output_feeds_all_layers() {
        let mut m = manager();
        let signals = m.record_output("req-1", "Paris is the capital of France", true);

        assert_eq!(m.provider.len(), 1);
        let hits = m.store.retrieve("paris", &MemoryFilter::default(), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["request_id"], serde_json::json!("req-1"));
        // 30 ASCII 字符 -> 7 token，占 20 的 35%
        assert_eq!(m.saturation_state().current_tokens, 7);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_empty_output_is_ignored() {
        let mut m = manager();
        assert!(m.record_output("req-1", "", false).is_empty());
        assert!(m.provider.is_empty());
        assert!(m.store.is_empty());
    }

    #[test]
    fn test_begin_iteration_resets_saturation_only() {
        let mut m = manager();
        m.record_output("req-1", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", true);
        assert_ne!(m.saturation_state().level, SaturationLevel::Normal);

        m.begin_iteration();
        assert_eq!(m.saturation_state().level, SaturationLevel::Normal);
        assert_eq!(m.provider.len(), 1);
        assert_eq!(m.store.len(), 1);
    }

    #[test]
    fn test_eviction_settles_at_target() {
        let mut m = MemoryManager::new(
            &ContextSection::default(),
            &MemorySection::default(),
            &SaturationSection {
                max_tokens: 100,
                ..SaturationSection::default()
            },
        );
        // 40 个 ASCII 字符 -> 10 token
        let output = "x".repeat(40);
        for i in 0..10 {
            for signal in m.record_output(&format!("req-{}", i), &output, true) {
                if let SaturationSignal::ActionRequired { tokens_to_free, .. } = signal {
                    assert_eq!(tokens_to_free, 10);
                    assert_eq!(m.free_tokens(tokens_to_free), 10);
                }
            }
        }

        assert_eq!(m.provider.len(), 5);
        assert_eq!(m.saturation_state().current_tokens, 50);
        assert_eq!(m.saturation_state().level, SaturationLevel::Elevated);
    }

    #[test]
    fn test_reflection_goes_long_term() {
        let mut m = manager();
        m.record_reflection("cite the source");
        let filter = MemoryFilter {
            tier: Some(MemoryTier::LongTerm),
            memory_type: Some(MemoryType::Reflective),
            ..MemoryFilter::default()
        };
        assert_eq!(m.store.retrieve("", &filter, 10).len(), 1);
    }
}
