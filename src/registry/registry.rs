//! 服务注册表
//!
//! 以名称为键保存受管服务，并驱动批量生命周期操作。
//! 批量操作对每个服务并发执行，单个服务失败不会跳过或中断其他服务，
//! 所有失败汇总为一个 [`AggregateError`]。

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use super::cache::ServiceCache;
use super::service::{EndpointService, ManagedService, Operation, ServiceEntry, ServiceState};
use crate::config::RegistryConfig;
use crate::context::Context;
use crate::discovery::endpoint::Endpoint;
use crate::error::{AggregateError, Result, ServicesError};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::telemetry::{NoopTracer, Tracer};

/// 服务注册表
pub struct ServiceRegistry {
    cache: ServiceCache,
    metrics: Arc<dyn MetricsSink>,
    tracer: Arc<dyn Tracer>,
    config: RegistryConfig,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            cache: ServiceCache::new(),
            metrics: Arc::new(NoopMetrics),
            tracer: Arc::new(NoopTracer),
            config: RegistryConfig::default(),
        }
    }

    /// 设置指标接收端
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// 设置追踪器
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册服务
    ///
    /// 名称已存在时返回 `AlreadyRegistered`，原有条目保持不变
    pub fn register(&self, service: Arc<dyn ManagedService>) -> Result<()> {
        let name = service.name().to_string();
        if name.is_empty() {
            return Err(ServicesError::InvalidEndpoint(
                "service name must not be empty".to_string(),
            ));
        }

        if !self
            .cache
            .try_store(name.clone(), Arc::new(ServiceEntry::new(service)))
        {
            warn!(service = %name, "Service already registered");
            return Err(ServicesError::AlreadyRegistered(name));
        }

        info!(service = %name, "Service registered");
        Ok(())
    }

    /// 从发现的端点构建默认服务并注册
    pub fn register_endpoint(&self, endpoint: Endpoint) -> Result<Arc<EndpointService>> {
        let service = Arc::new(EndpointService::new(endpoint));
        self.register(service.clone())?;
        Ok(service)
    }

    /// 注销服务
    ///
    /// 先调用 `stop`（受 `stop_timeout` 限制，已停止的服务跳过），成功后才从缓存移除；
    /// `stop` 失败或超时时服务保留在注册表中。
    /// 并发注销同一服务时只有一个调用者执行 `stop`，其余返回 `NotFound`
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let entry = self
            .cache
            .get(name)
            .ok_or_else(|| ServicesError::service_not_found(name))?;

        if !entry.claim_removal() {
            debug!(service = %name, "Service is already being unregistered");
            return Err(ServicesError::service_not_found(name));
        }

        if entry.state() != ServiceState::Stopped {
            let ctx = Context::with_timeout(self.config.stop_timeout);
            if let Err(e) = self.invoke(&ctx, &entry, Operation::Stop).await {
                entry.release_removal();
                warn!(service = %name, error = %e, "Failed to stop service, keeping it registered");
                return Err(e);
            }
        }

        self.cache.delete_entry(name, &entry);
        info!(service = %name, "Service unregistered");
        Ok(())
    }

    pub fn get_service(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.cache.get(name).map(|entry| entry.service().clone())
    }

    /// 所有服务的快照，顺序不保证
    pub fn list(&self) -> Vec<Arc<dyn ManagedService>> {
        self.cache
            .snapshot()
            .into_iter()
            .map(|(_, entry)| entry.service().clone())
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.cache.get(name).map(|entry| entry.state())
    }

    pub fn names(&self) -> Vec<String> {
        self.cache.keys()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.exists(name)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub async fn initialize_all(&self, ctx: &Context) -> Result<()> {
        self.run_all(ctx, Operation::Initialize).await
    }

    pub async fn start_all(&self, ctx: &Context) -> Result<()> {
        self.run_all(ctx, Operation::Start).await
    }

    pub async fn stop_all(&self, ctx: &Context) -> Result<()> {
        self.run_all(ctx, Operation::Stop).await
    }

    async fn run_all(&self, ctx: &Context, op: Operation) -> Result<()> {
        let entries = self.cache.snapshot();
        if entries.is_empty() {
            debug!(operation = %op, "No registered services");
            return Ok(());
        }

        info!(operation = %op, services = entries.len(), "Running lifecycle operation on all services");

        let mut calls = Vec::with_capacity(entries.len());
        for (name, entry) in &entries {
            calls.push(async move { (name.as_str(), self.invoke(ctx, entry, op).await) });
        }

        let mut failures = AggregateError::new(op.as_str());
        for (name, result) in join_all(calls).await {
            if let Err(e) = result {
                failures.push(name, e);
            }
        }

        if !failures.is_empty() {
            error!(
                operation = %op,
                failed = ?failures.names(),
                total = entries.len(),
                "One or more services failed to {}", op
            );
        }
        failures.into_result()
    }

    /// 对单个服务执行一次生命周期操作
    ///
    /// 上下文已结束时不调用服务，直接返回 `Timeout`；
    /// 执行期间上下文结束同样返回 `Timeout`。只有成功时才更新状态。
    async fn invoke(&self, ctx: &Context, entry: &ServiceEntry, op: Operation) -> Result<()> {
        let name = entry.name();
        if let Some(e) = ctx.err() {
            warn!(service = %name, operation = %op, error = %e, "Skipping lifecycle operation");
            return Err(e);
        }

        let handle = self.tracer.start_span(op.span_name(), name);
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = ctx.done() => Err(ctx
                .err()
                .unwrap_or_else(|| ServicesError::timeout("context done"))),
            result = op.invoke(&**entry.service()).instrument(handle.span().clone()) => {
                result.map_err(|e| ServicesError::backend(name, e))
            }
        };

        self.metrics
            .observe_duration(name, op.as_str(), started.elapsed().as_secs_f64());
        self.tracer.end_span(handle, outcome.as_ref().err());

        match &outcome {
            Ok(()) => {
                entry.set_state(op.target_state());
                info!(service = %name, operation = %op, "Lifecycle operation succeeded");
            }
            Err(e) => {
                warn!(service = %name, operation = %op, error = %e, "Lifecycle operation failed");
            }
        }
        outcome
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::endpoint::Port;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::BoxError;

    struct FlakyStop {
        name: String,
        fail_stop: bool,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ManagedService for FlakyStop {
        fn name(&self) -> &str {
            &self.name
        }

        async fn initialize(&self) -> std::result::Result<(), BoxError> {
            Ok(())
        }

        async fn start(&self) -> std::result::Result<(), BoxError> {
            Ok(())
        }

        async fn stop(&self) -> std::result::Result<(), BoxError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                Err("stop refused".into())
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        observed: Mutex<Vec<(String, String)>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn observe_duration(&self, service: &str, operation: &str, _seconds: f64) {
            self.observed
                .lock()
                .unwrap()
                .push((service.to_string(), operation.to_string()));
        }
    }

    fn flaky(name: &str, fail_stop: bool) -> Arc<FlakyStop> {
        Arc::new(FlakyStop {
            name: name.to_string(),
            fail_stop,
            stops: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_duplicate_register_keeps_original() {
        let registry = ServiceRegistry::new();
        let original = registry
            .register_endpoint(Endpoint::new("auth", "10.0.0.1").with_port(Port::tcp("grpc", 9090)))
            .unwrap();

        let err = registry
            .register_endpoint(Endpoint::new("auth", "10.0.0.2"))
            .unwrap_err();
        assert!(matches!(err, ServicesError::AlreadyRegistered(ref n) if n == "auth"));
        assert_eq!(registry.len(), 1);
        assert_eq!(original.address(), "10.0.0.1");
        assert_eq!(registry.state("auth"), Some(ServiceState::Registered));
    }

    #[tokio::test]
    async fn test_unregister_stops_first() {
        let registry = ServiceRegistry::new();
        let service = flaky("cache", false);
        registry.register(service.clone()).unwrap();

        registry.unregister("cache").await.unwrap();
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
        assert!(registry.get_service("cache").is_none());

        let err = registry.unregister("cache").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unregister_keeps_service_when_stop_fails() {
        let registry = ServiceRegistry::new();
        registry.register(flaky("db", true)).unwrap();
        registry.start_all(&Context::new()).await.unwrap();

        let err = registry.unregister("db").await.unwrap_err();
        assert!(matches!(err, ServicesError::BackendFailure { .. }));
        assert!(registry.get_service("db").is_some());
        assert_eq!(registry.state("db"), Some(ServiceState::Started));
    }

    #[tokio::test]
    async fn test_unregister_skips_stop_when_already_stopped() {
        let registry = ServiceRegistry::new();
        let service = flaky("q", false);
        registry.register(service.clone()).unwrap();
        registry.stop_all(&Context::new()).await.unwrap();
        registry.unregister("q").await.unwrap();
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metrics_observed_per_invocation() {
        let metrics = Arc::new(RecordingMetrics::default());
        let registry = ServiceRegistry::new().with_metrics(metrics.clone());
        registry.register(flaky("a", false)).unwrap();
        registry.register(flaky("b", false)).unwrap();

        registry.initialize_all(&Context::new()).await.unwrap();

        let mut observed = metrics.observed.lock().unwrap().clone();
        observed.sort();
        assert_eq!(
            observed,
            vec![
                ("a".to_string(), "initialize".to_string()),
                ("b".to_string(), "initialize".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_every_service() {
        let registry = ServiceRegistry::new()
            .with_config(RegistryConfig::default().with_stop_timeout(Duration::from_secs(1)));
        registry.register(flaky("a", false)).unwrap();
        registry.register(flaky("b", false)).unwrap();

        let ctx = Context::new();
        ctx.cancel();
        let err = registry.start_all(&ctx).await.unwrap_err();
        let agg = err.as_aggregate().unwrap();
        assert_eq!(agg.len(), 2);
        assert!(agg.failures.iter().all(|f| f.error.is_timeout()));
        assert_eq!(registry.state("a"), Some(ServiceState::Registered));
    }
}
