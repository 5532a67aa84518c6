//! 受管服务抽象

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::discovery::endpoint::{Endpoint, Port};
use crate::error::BoxError;

/// 受管服务 trait
///
/// 注册表只驱动生命周期转换，不拥有服务内部的资源。
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// 服务名称，注册表内唯一
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), BoxError>;

    async fn start(&self) -> Result<(), BoxError>;

    async fn stop(&self) -> Result<(), BoxError>;
}

/// 生命周期操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Start,
    Stop,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Start => "start",
            Operation::Stop => "stop",
        }
    }

    /// 包裹该操作的 span 名称
    pub fn span_name(&self) -> &'static str {
        match self {
            Operation::Initialize => "InitializeService",
            Operation::Start => "StartService",
            Operation::Stop => "StopService",
        }
    }

    /// 成功后进入的状态
    pub fn target_state(&self) -> ServiceState {
        match self {
            Operation::Initialize => ServiceState::Initialized,
            Operation::Start => ServiceState::Started,
            Operation::Stop => ServiceState::Stopped,
        }
    }

    pub(crate) async fn invoke(&self, service: &dyn ManagedService) -> Result<(), BoxError> {
        match self {
            Operation::Initialize => service.initialize().await,
            Operation::Start => service.start().await,
            Operation::Stop => service.stop().await,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务在注册表中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceState {
    Registered = 0,
    Initialized = 1,
    Started = 2,
    Stopped = 3,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServiceState::Initialized,
            2 => ServiceState::Started,
            3 => ServiceState::Stopped,
            _ => ServiceState::Registered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Registered => "registered",
            ServiceState::Initialized => "initialized",
            ServiceState::Started => "started",
            ServiceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 缓存条目：服务及其当前状态
pub struct ServiceEntry {
    service: Arc<dyn ManagedService>,
    state: AtomicU8,
    removing: AtomicBool,
}

impl ServiceEntry {
    pub fn new(service: Arc<dyn ManagedService>) -> Self {
        Self {
            service,
            state: AtomicU8::new(ServiceState::Registered as u8),
            removing: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn service(&self) -> &Arc<dyn ManagedService> {
        &self.service
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// 抢占注销权，同一时刻只有一个调用者成功
    pub(crate) fn claim_removal(&self) -> bool {
        self.removing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 注销失败后释放注销权，允许重试
    pub(crate) fn release_removal(&self) {
        self.removing.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// 从发现的端点构建的默认服务
///
/// 生命周期方法均为空操作，只暴露端点信息
#[derive(Debug, Clone)]
pub struct EndpointService {
    endpoint: Endpoint,
}

impl EndpointService {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    pub fn ports(&self) -> &[Port] {
        &self.endpoint.ports
    }

    pub fn version(&self) -> &str {
        &self.endpoint.version
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.endpoint.tags
    }
}

#[async_trait]
impl ManagedService for EndpointService {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    async fn initialize(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_service_lifecycle_is_noop() {
        let service = EndpointService::new(
            Endpoint::new("auth", "10.0.0.1")
                .with_port(Port::tcp("grpc", 9090))
                .with_tag("env", "prod"),
        );
        assert_eq!(service.name(), "auth");
        assert_eq!(service.address(), "10.0.0.1");
        assert!(service.initialize().await.is_ok());
        assert!(service.start().await.is_ok());
        assert!(service.stop().await.is_ok());
    }

    #[test]
    fn test_entry_state_transitions() {
        let entry = ServiceEntry::new(Arc::new(EndpointService::new(Endpoint::new("a", "b"))));
        assert_eq!(entry.state(), ServiceState::Registered);
        entry.set_state(Operation::Start.target_state());
        assert_eq!(entry.state(), ServiceState::Started);
    }
}
