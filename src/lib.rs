//! Flare Services Core Library
//!
//! Composite service discovery over pluggable backends (Kubernetes, Docker Swarm, DNS TXT)
//! and a lifecycle registry for managed services.

pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod telemetry;

// 运行时框架
pub mod runtime;

// Re-exports
pub use config::{RegistryConfig, ServicesConfig};
pub use context::Context;
pub use error::{AggregateError, BoxError, ErrorCategory, ErrorCode, Failure, Result, ServicesError};

// 组合服务发现
pub use discovery::{
    CompositeDiscovery, DiscoveryConfig, DiscoveryReport, DiscoveryStrategy, Endpoint, EventKind,
    EventStream, Filter, Port, Protocol, ServiceEvent, StrategyConfig, StrategyFactory, StrategyKind,
};

// 服务注册表
pub use registry::{EndpointService, ManagedService, ServiceCache, ServiceRegistry, ServiceState};

// 可观测性钩子
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use telemetry::{NoopTracer, SpanHandle, Tracer, TracingTracer};

// 运行时框架 re-exports
pub use runtime::{RuntimeConfig, ServicesRuntime};
