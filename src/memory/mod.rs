//! 记忆层：执行上下文、近期输出缓冲、分层记忆存储、token 饱和度监控

pub mod context;
pub mod manager;
pub mod provider;
pub mod saturation;
pub mod store;
pub mod tokenizer;

pub use context::ExecutionContext;
pub use manager::MemoryManager;
pub use provider::{ContextItem, ContextProvider, WORKING_MEMORY_SPAN};
pub use saturation::{
    RecommendedAction, SaturationLevel, SaturationMonitor, SaturationSignal, SaturationState,
};
pub use store::{
    MemoryError, MemoryFilter, MemoryPatch, MemoryStatistics, MemoryStore, MemoryTier, MemoryType,
    MemoryUnit, NewMemory,
};
pub use tokenizer::{truncate_chars, TokenEstimator};
