//! 服务运行时实现
//!
//! 把组合发现器和注册表串成一个进程级生命周期：
//! 发现 → 注册 → 初始化 → 启动 → 等待关闭信号 → 停止（受关闭超时限制）

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::discovery::composite::CompositeDiscovery;
use crate::discovery::filter::Filter;
use crate::error::{Result, ServicesError};
use crate::registry::ServiceRegistry;
use crate::runtime::config::RuntimeConfig;

/// 服务运行时
///
/// # 使用示例
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use flare_services_core::{CompositeDiscovery, Context, Filter, ServiceRegistry, ServicesRuntime};
///
/// # async fn demo(discovery: CompositeDiscovery) -> flare_services_core::Result<()> {
/// let runtime = ServicesRuntime::new(Arc::new(discovery), Arc::new(ServiceRegistry::new()));
/// runtime.sync_from_discovery(&Context::new(), &Filter::new()).await?;
/// runtime
///     .run(async {
///         let _ = tokio::signal::ctrl_c().await;
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ServicesRuntime {
    discovery: Arc<CompositeDiscovery>,
    registry: Arc<ServiceRegistry>,
    config: RuntimeConfig,
}

impl ServicesRuntime {
    pub fn new(discovery: Arc<CompositeDiscovery>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            discovery,
            registry,
            config: RuntimeConfig::default(),
        }
    }

    /// 设置运行时配置
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn discovery(&self) -> &Arc<CompositeDiscovery> {
        &self.discovery
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// 发现端点并注册尚未存在的服务，返回新注册的数量
    pub async fn sync_from_discovery(&self, ctx: &Context, filter: &Filter) -> Result<usize> {
        let endpoints = self.discovery.discover(ctx, filter).await?;

        let mut added = 0;
        for endpoint in endpoints {
            let name = endpoint.name.clone();
            match self.registry.register_endpoint(endpoint) {
                Ok(_) => added += 1,
                Err(ServicesError::AlreadyRegistered(_)) => {}
                Err(e) => warn!(service = %name, error = %e, "Skipping discovered endpoint"),
            }
        }

        info!(added, total = self.registry.len(), "Synchronized registry from discovery");
        Ok(added)
    }

    /// 运行所有已注册服务直到 `shutdown` 完成
    ///
    /// 初始化失败直接返回；启动失败会先停止所有服务再返回启动错误。
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ctx = Context::new();
        info!(services = self.registry.len(), "Starting services runtime");

        if let Err(e) = self.registry.initialize_all(&ctx).await {
            error!(error = %e, "Failed to initialize services");
            return Err(e);
        }

        if let Err(e) = self.registry.start_all(&ctx).await {
            error!(error = %e, "Failed to start services, stopping");
            self.shutdown().await;
            return Err(e);
        }

        info!("All services started, waiting for shutdown signal");
        shutdown.await;
        info!("Shutdown signal received");

        self.shutdown_checked().await
    }

    async fn shutdown(&self) {
        if let Err(e) = self.shutdown_checked().await {
            warn!(error = %e, "Services did not stop cleanly");
        }
    }

    /// 停止所有服务，总耗时受 `shutdown_timeout` 限制
    async fn shutdown_checked(&self) -> Result<()> {
        let ctx = Context::with_timeout(self.config.shutdown_timeout);
        match self.registry.stop_all(&ctx).await {
            Ok(()) => {
                info!("All services stopped gracefully");
                Ok(())
            }
            Err(e) => {
                if ctx.is_done() {
                    warn!(timeout = ?self.config.shutdown_timeout, "Services shutdown timeout");
                }
                Err(e)
            }
        }
    }
}
