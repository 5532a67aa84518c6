//! 服务注册表模块
//!
//! - [`ServiceCache`]：按名称索引的并发安全容器
//! - [`ServiceRegistry`]：注册、注销和批量生命周期调度
//! - [`ManagedService`]：受管服务需要实现的生命周期 trait

pub mod cache;
pub mod registry;
pub mod service;

pub use cache::ServiceCache;
pub use registry::ServiceRegistry;
pub use service::{EndpointService, ManagedService, Operation, ServiceEntry, ServiceState};
