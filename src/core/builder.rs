//! 编排器构建器：组装执行器、Oracle、人机协同、降级策略与事件订阅
//!
//! 订阅必须在 build 之前完成；build 之后编排器通常放进 Arc 供多个任务共享。

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::OrchestratorConfig;
use crate::core::orchestrator::SharedState;
use crate::core::{EventBus, EventSubscriber, Orchestrator, OrchestratorEvent, Supervisor};
use crate::executor::{FallbackStrategy, RequestFactory, ResilientExecutor, TaskExecutor};
use crate::hitl::{HumanGate, HumanInTheLoop};
use crate::memory::MemoryManager;
use crate::oracle::OracleVerifier;

pub struct OrchestratorBuilder<E: TaskExecutor> {
    executor: E,
    factory: Arc<dyn RequestFactory<E::Request>>,
    oracle: Option<Arc<dyn OracleVerifier>>,
    human: Option<Arc<dyn HumanInTheLoop>>,
    fallback: Option<Arc<dyn FallbackStrategy<E::Request, E::Output>>>,
    events: EventBus,
    config: OrchestratorConfig,
}

impl<E: TaskExecutor> OrchestratorBuilder<E> {
    pub fn new(executor: E, factory: impl RequestFactory<E::Request> + 'static) -> Self {
        Self {
            executor,
            factory: Arc::new(factory),
            oracle: None,
            human: None,
            fallback: None,
            events: EventBus::new(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn OracleVerifier>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_human(mut self, human: Arc<dyn HumanInTheLoop>) -> Self {
        self.human = Some(human);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackStrategy<E::Request, E::Output>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// 空闲时的初始配置（start 会用传入的配置替换）
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subscribe(mut self, subscriber: impl EventSubscriber + 'static) -> Self {
        self.events.subscribe(subscriber);
        self
    }

    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        self.events.subscribe_channel()
    }

    pub fn build(self) -> Orchestrator<E> {
        let config = self.config;
        let mut executor = ResilientExecutor::new(self.executor, config.resilience.clone());
        if let Some(fallback) = self.fallback {
            executor = executor.with_fallback(fallback);
        }
        let memory = MemoryManager::new(&config.context, &config.memory, &config.saturation);

        Orchestrator {
            executor,
            oracle: self.oracle,
            human: self.human.map(HumanGate::new),
            factory: self.factory,
            events: self.events,
            shared: RwLock::new(SharedState::new(config)),
            supervisor: Supervisor::new(),
            memory: Mutex::new(memory),
        }
    }
}
