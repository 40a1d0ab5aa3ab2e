//! LLM 层：客户端抽象、Mock 实现，以及把 LLM 当作任务执行器的适配

pub mod executor;
pub mod mock;
pub mod traits;

pub use executor::LlmExecutor;
pub use mock::MockLlmClient;
pub use traits::{LlmClient, LlmError, Message, Role, TokenStream};
