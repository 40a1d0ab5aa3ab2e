//! Memory Store：分层（working / session / long-term）、有容量上限的记忆单元存储
//!
//! - retrieve：大小写不敏感的子串匹配 + 可选过滤（类型 / 层级 / 最低重要度 / 最低保持度 / 创建时间）
//! - store：插入会超过上限时，先淘汰保持度最低、其次最久未访问的单元
//! - update：部分字段补丁；metadata 合并时新键覆盖旧键；可选记录一次访问

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::tokenizer::TokenEstimator;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Memory unit not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// 某次执行发生了什么
    Episodic,
    /// 提炼出的事实
    Semantic,
    /// 做法经验
    Procedural,
    /// Oracle 反思
    Reflective,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Working,
    Session,
    LongTerm,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub tier: MemoryTier,
    pub importance: f64,
    pub retention: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// store 的入参；id 为空时自动生成
#[derive(Clone, Debug)]
pub struct NewMemory {
    pub id: Option<String>,
    pub content: String,
    pub memory_type: MemoryType,
    pub tier: MemoryTier,
    pub importance: f64,
    pub retention: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>, memory_type: MemoryType, tier: MemoryTier) -> Self {
        Self {
            id: None,
            content: content.into(),
            memory_type,
            tier,
            importance: 0.5,
            retention: 1.0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_retention(mut self, retention: f64) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 检索过滤条件，全部为可选
#[derive(Clone, Debug, Default)]
pub struct MemoryFilter {
    pub memory_type: Option<MemoryType>,
    pub tier: Option<MemoryTier>,
    pub min_importance: Option<f64>,
    pub min_retention: Option<f64>,
    pub created_after: Option<DateTime<Utc>>,
}

impl MemoryFilter {
    fn matches(&self, unit: &MemoryUnit) -> bool {
        self.memory_type.map_or(true, |t| unit.memory_type == t)
            && self.tier.map_or(true, |t| unit.tier == t)
            && self.min_importance.map_or(true, |v| unit.importance >= v)
            && self.min_retention.map_or(true, |v| unit.retention >= v)
            && self.created_after.map_or(true, |t| unit.created_at > t)
    }
}

/// update 的部分字段补丁
#[derive(Clone, Debug, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub importance: Option<f64>,
    pub retention: Option<f64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub record_access: bool,
}

impl MemoryPatch {
    pub fn access() -> Self {
        Self {
            record_access: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MemoryStatistics {
    pub total: usize,
    pub per_tier: BTreeMap<MemoryTier, usize>,
    pub estimated_tokens: usize,
    pub average_retention: f64,
}

#[derive(Debug)]
pub struct MemoryStore {
    /// 按插入顺序保存
    units: Vec<MemoryUnit>,
    max_units: usize,
}

impl MemoryStore {
    pub fn new(max_units: usize) -> Self {
        Self {
            units: Vec::new(),
            max_units: max_units.max(1),
        }
    }

    /// 写入一个记忆单元，返回其 id
    pub fn store(&mut self, new: NewMemory) -> String {
        let id = new
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        // 同 id 视为替换，不触发淘汰
        self.units.retain(|u| u.id != id);

        while self.units.len() >= self.max_units {
            if let Some(evicted) = self.evict_one() {
                tracing::debug!(id = %evicted.id, retention = evicted.retention, "memory unit evicted");
            }
        }

        let now = Utc::now();
        self.units.push(MemoryUnit {
            id: id.clone(),
            content: new.content,
            memory_type: new.memory_type,
            tier: new.tier,
            importance: new.importance.clamp(0.0, 1.0),
            retention: new.retention.clamp(0.0, 1.0),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata: new.metadata,
        });
        id
    }

    /// 淘汰排序最低的单元：保持度升序，其次最后访问时间升序；并列时取插入最早者
    fn evict_one(&mut self) -> Option<MemoryUnit> {
        let idx = self
            .units
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.retention
                    .total_cmp(&b.retention)
                    .then(a.last_accessed_at.cmp(&b.last_accessed_at))
            })
            .map(|(i, _)| i)?;
        Some(self.units.remove(idx))
    }

    pub fn retrieve(&self, query: &str, filter: &MemoryFilter, max_results: usize) -> Vec<MemoryUnit> {
        let needle = query.trim().to_lowercase();
        self.units
            .iter()
            .filter(|u| needle.is_empty() || u.content.to_lowercase().contains(&needle))
            .filter(|u| filter.matches(u))
            .take(max_results)
            .cloned()
            .collect()
    }

    pub fn update(&mut self, id: &str, patch: MemoryPatch) -> Result<MemoryUnit, MemoryError> {
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;

        if let Some(content) = patch.content {
            unit.content = content;
        }
        if let Some(importance) = patch.importance {
            unit.importance = importance.clamp(0.0, 1.0);
        }
        if let Some(retention) = patch.retention {
            unit.retention = retention.clamp(0.0, 1.0);
        }
        if let Some(metadata) = patch.metadata {
            unit.metadata.extend(metadata);
        }
        if patch.record_access {
            unit.access_count += 1;
            unit.last_accessed_at = Utc::now();
        }
        Ok(unit.clone())
    }

    pub fn get(&self, id: &str) -> Option<&MemoryUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryUnit> {
        let idx = self.units.iter().position(|u| u.id == id)?;
        Some(self.units.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn max_units(&self) -> usize {
        self.max_units
    }

    pub fn statistics(&self) -> MemoryStatistics {
        let mut per_tier = BTreeMap::new();
        let mut estimated_tokens = 0usize;
        let mut retention_sum = 0.0;
        for unit in &self.units {
            *per_tier.entry(unit.tier).or_insert(0) += 1;
            estimated_tokens += TokenEstimator::estimate(&unit.content);
            retention_sum += unit.retention;
        }
        let total = self.units.len();
        MemoryStatistics {
            total,
            per_tier,
            estimated_tokens,
            average_retention: if total == 0 {
                0.0
            } else {
                retention_sum / total as f64
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episodic(content: &str) -> NewMemory {
        NewMemory::new(content, MemoryType::Episodic, MemoryTier::Session)
    }

    #[test]
    fn test_store_generates_id() {
        let mut store = MemoryStore::new(10);
        let id = store.store(episodic("hello"));
        assert!(!id.is_empty());
        assert_eq!(store.get(&id).map(|u| u.content.as_str()), Some("hello"));

        let fixed = store.store(episodic("fixed").with_id("m-1"));
        assert_eq!(fixed, "m-1");
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut store = MemoryStore::new(3);
        for i in 0..10 {
            store.store(episodic(&format!("unit {}", i)));
            assert!(store.len() <= 3);
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_evicts_lowest_retention_first() {
        let mut store = MemoryStore::new(3);
        store.store(episodic("keep a").with_id("a").with_retention(0.9));
        store.store(episodic("drop b").with_id("b").with_retention(0.1));
        store.store(episodic("keep c").with_id("c").with_retention(0.5));
        store.store(episodic("new d").with_id("d").with_retention(0.7));

        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert!(store.get("d").is_some());
    }

    #[test]
    fn test_eviction_tie_breaks_on_last_access() {
        let mut store = MemoryStore::new(2);
        store.store(episodic("first").with_id("first").with_retention(0.5));
        store.store(episodic("second").with_id("second").with_retention(0.5));
        // 访问 first 后，second 成为最久未访问
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.update("first", MemoryPatch::access()).unwrap();
        store.store(episodic("third").with_id("third").with_retention(0.5));

        assert!(store.get("first").is_some());
        assert!(store.get("second").is_none());
    }

    #[test]
    fn test_retrieve_case_insensitive_with_filters() {
        let mut store = MemoryStore::new(10);
        store.store(episodic("Paris is the capital").with_importance(0.9));
        store.store(episodic("paris weather").with_importance(0.2));
        store.store(
            NewMemory::new("Paris fact", MemoryType::Semantic, MemoryTier::LongTerm).with_importance(0.8),
        );

        let all = store.retrieve("PARIS", &MemoryFilter::default(), 10);
        assert_eq!(all.len(), 3);

        let important = MemoryFilter {
            min_importance: Some(0.5),
            ..MemoryFilter::default()
        };
        assert_eq!(store.retrieve("paris", &important, 10).len(), 2);

        let long_term = MemoryFilter {
            tier: Some(MemoryTier::LongTerm),
            ..MemoryFilter::default()
        };
        let hits = store.retrieve("paris", &long_term, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_type, MemoryType::Semantic);

        assert_eq!(store.retrieve("paris", &MemoryFilter::default(), 1).len(), 1);
    }

    #[test]
    fn test_update_merges_metadata_and_records_access() {
        let mut store = MemoryStore::new(10);
        let id = store.store(
            episodic("x")
                .with_metadata("source", serde_json::json!("executor"))
                .with_metadata("attempt", serde_json::json!(1)),
        );

        let mut patch_meta = HashMap::new();
        patch_meta.insert("attempt".to_string(), serde_json::json!(2));
        patch_meta.insert("verified".to_string(), serde_json::json!(true));
        let updated = store
            .update(
                &id,
                MemoryPatch {
                    content: Some("y".to_string()),
                    metadata: Some(patch_meta),
                    record_access: true,
                    ..MemoryPatch::default()
                },
            )
            .unwrap();

        assert_eq!(updated.content, "y");
        assert_eq!(updated.access_count, 1);
        assert_eq!(updated.metadata["source"], serde_json::json!("executor"));
        assert_eq!(updated.metadata["attempt"], serde_json::json!(2));
        assert_eq!(updated.metadata["verified"], serde_json::json!(true));
    }

    #[test]
    fn test_update_missing_unit() {
        let mut store = MemoryStore::new(10);
        let err = store.update("nope", MemoryPatch::access()).unwrap_err();
        assert_eq!(err, MemoryError::NotFound("nope".to_string()));
    }

    #[test]
    fn test_statistics() {
        let mut store = MemoryStore::new(10);
        store.store(episodic("aaaaaaaa").with_retention(1.0));
        store.store(NewMemory::new("bbbbbbbb", MemoryType::Semantic, MemoryTier::LongTerm).with_retention(0.5));

        let stats = store.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.per_tier.get(&MemoryTier::Session), Some(&1));
        assert_eq!(stats.per_tier.get(&MemoryTier::LongTerm), Some(&1));
        assert_eq!(stats.estimated_tokens, 4);
        assert!((stats.average_retention - 0.75).abs() < f64::EPSILON);
    }
}
