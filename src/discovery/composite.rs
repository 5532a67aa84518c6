//! 组合服务发现
//!
//! 持有一组发现策略，并发扇出 discover / watch 调用并合并结果：
//! - discover：单个策略失败不影响其他策略；只有合并结果为空且存在失败时才返回聚合错误
//! - watch：每个策略一个独立的转发任务，汇入同一个输出流；
//!   协调任务等待所有转发任务结束后才关闭输出流并释放派生的取消范围

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::discovery::endpoint::{Endpoint, ServiceEvent};
use crate::discovery::filter::Filter;
use crate::discovery::strategy::{DiscoveryStrategy, EventStream, send_event};
use crate::error::{AggregateError, Result, ServicesError};

/// 默认的合并流缓冲大小
pub const DEFAULT_WATCH_BUFFER: usize = 64;

/// 一次 discover 的完整结果
///
/// `failures` 是非致命的旁路信息：部分策略失败但仍有结果时调用方可以据此告警
#[derive(Debug)]
pub struct DiscoveryReport {
    pub endpoints: Vec<Endpoint>,
    pub failures: AggregateError,
}

impl DiscoveryReport {
    /// 是否有策略失败
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn into_endpoints(self) -> Vec<Endpoint> {
        self.endpoints
    }
}

/// 组合服务发现器
pub struct CompositeDiscovery {
    strategies: RwLock<Vec<Arc<dyn DiscoveryStrategy>>>,
    watch_buffer: usize,
}

impl CompositeDiscovery {
    /// 创建空的组合发现器
    pub fn new() -> Self {
        Self::with_strategies(Vec::new())
    }

    /// 使用初始策略集合创建
    pub fn with_strategies(strategies: Vec<Arc<dyn DiscoveryStrategy>>) -> Self {
        Self {
            strategies: RwLock::new(strategies),
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }

    /// 设置合并流缓冲大小
    pub fn with_watch_buffer(mut self, buffer: usize) -> Self {
        self.watch_buffer = buffer.max(1);
        self
    }

    /// 追加策略，只影响之后的调用
    pub async fn add_strategy(&self, strategy: Arc<dyn DiscoveryStrategy>) {
        info!(strategy = %strategy.name(), "Adding discovery strategy");
        self.strategies.write().await.push(strategy);
    }

    /// 移除第一个同名策略
    pub async fn remove_strategy(&self, name: &str) -> Result<()> {
        let mut strategies = self.strategies.write().await;
        match strategies.iter().position(|s| s.name() == name) {
            Some(idx) => {
                strategies.remove(idx);
                info!(strategy = %name, "Removing discovery strategy");
                Ok(())
            }
            None => Err(ServicesError::strategy_not_found(name)),
        }
    }

    /// 当前策略名称快照
    pub async fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.strategies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.strategies.read().await.is_empty()
    }

    /// 拷贝当前策略列表，调用期间不持有锁
    async fn snapshot(&self) -> Vec<Arc<dyn DiscoveryStrategy>> {
        self.strategies.read().await.clone()
    }

    /// 并发调用所有策略的 discover，返回合并后的端点
    pub async fn discover(&self, ctx: &Context, filter: &Filter) -> Result<Vec<Endpoint>> {
        self.discover_report(ctx, filter)
            .await
            .map(DiscoveryReport::into_endpoints)
    }

    /// 并发调用所有策略的 discover，同时返回失败明细
    ///
    /// - 上下文已结束：立即返回 `Timeout`
    /// - 合并结果为空且至少一个策略失败：返回列出所有失败的 `AggregateFailure`
    /// - 没有策略失败且结果为空：返回空列表
    pub async fn discover_report(&self, ctx: &Context, filter: &Filter) -> Result<DiscoveryReport> {
        ctx.check()?;

        let strategies = self.snapshot().await;
        let mut calls = Vec::with_capacity(strategies.len());
        for strategy in &strategies {
            calls.push(async move {
                info!(strategy = %strategy.name(), "Attempting service discovery using strategy");
                let result = tokio::select! {
                    biased;
                    _ = ctx.done() => Err(ctx
                        .err()
                        .unwrap_or_else(|| ServicesError::timeout("context done"))),
                    result = strategy.discover(ctx, filter) => result,
                };
                (strategy.name().to_string(), result)
            });
        }

        let mut report = DiscoveryReport {
            endpoints: Vec::new(),
            failures: AggregateError::new("discover"),
        };

        for (name, result) in join_all(calls).await {
            match result {
                Ok(endpoints) => {
                    info!(strategy = %name, count = endpoints.len(), "Discovered services");
                    report.endpoints.extend(endpoints);
                }
                Err(e) => {
                    warn!(strategy = %name, error = %e, "Discovery strategy failed");
                    report.failures.push(name, e);
                }
            }
        }

        if report.endpoints.is_empty() && !report.failures.is_empty() {
            error!(
                failed = report.failures.len(),
                strategies = strategies.len(),
                "No services discovered, every contributing strategy failed"
            );
            return Err(ServicesError::AggregateFailure(report.failures));
        }

        if report.is_partial() {
            warn!(
                failed = ?report.failures.names(),
                count = report.endpoints.len(),
                "Service discovery partially succeeded"
            );
        }

        Ok(report)
    }

    /// 打开所有策略的 watch 并合并为一个事件流
    ///
    /// 单个策略打开失败只记录警告，该策略不贡献事件。
    /// 取消 `ctx` 或 drop 返回的流都会结束所有转发任务。
    pub async fn watch(&self, ctx: &Context, filter: &Filter) -> Result<EventStream> {
        ctx.check()?;

        let strategies = self.snapshot().await;
        let watch_ctx = ctx.child();
        let (tx, rx) = mpsc::channel(self.watch_buffer);

        let mut producers = JoinSet::new();
        for strategy in strategies {
            producers.spawn(forward_events(
                strategy,
                watch_ctx.clone(),
                filter.clone(),
                tx.clone(),
            ));
        }

        let scope = watch_ctx.clone();
        tokio::spawn(async move {
            while let Some(joined) = producers.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Watch forwarding task aborted");
                }
            }
            // 所有转发任务结束后才关闭合并流
            drop(tx);
            scope.cancel();
            debug!("All strategy watchers finished, merged stream closed");
        });

        Ok(EventStream::with_guard(rx, watch_ctx.drop_guard()))
    }
}

impl Default for CompositeDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个策略的转发任务
async fn forward_events(
    strategy: Arc<dyn DiscoveryStrategy>,
    ctx: Context,
    filter: Filter,
    tx: mpsc::Sender<ServiceEvent>,
) {
    let name = strategy.name().to_string();

    let opened = tokio::select! {
        biased;
        _ = ctx.done() => return,
        opened = strategy.watch(&ctx, &filter) => opened,
    };
    let mut events = match opened {
        Ok(events) => events,
        Err(e) => {
            warn!(strategy = %name, error = %e, "Failed to start watcher for strategy");
            return;
        }
    };

    let mut forwarded = 0usize;
    loop {
        let event = tokio::select! {
            biased;
            _ = ctx.done() => break,
            _ = tx.closed() => break,
            next = events.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };
        if !send_event(&tx, &ctx, event).await {
            break;
        }
        forwarded += 1;
    }

    debug!(strategy = %name, forwarded, "Strategy watcher finished");
}
