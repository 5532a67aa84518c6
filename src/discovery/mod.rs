//! 组合服务发现模块
//!
//! 提供统一的服务发现抽象，支持多种后端（Kubernetes、Docker Swarm、DNS），
//! 由 [`CompositeDiscovery`] 并发扇出到所有策略并合并结果和事件流。

pub mod backend;
pub mod composite;
pub mod config;
pub mod endpoint;
pub mod factory;
pub mod filter;
pub mod strategy;

pub use backend::{DnsStrategy, KubernetesStrategy, PollSettings, SwarmStrategy, TxtResolver};
pub use composite::{CompositeDiscovery, DiscoveryReport};
pub use config::{DiscoveryConfig, StrategyConfig, StrategyKind};
pub use endpoint::{Endpoint, EventKind, Port, Protocol, ServiceEvent};
pub use factory::StrategyFactory;
pub use filter::Filter;
pub use strategy::{DiscoveryStrategy, EventStream};
