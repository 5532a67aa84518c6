//! 服务发现策略抽象
//!
//! 所有发现后端（Kubernetes、Docker Swarm、DNS）都实现 [`DiscoveryStrategy`]，
//! 聚合器只依赖这个契约，不关心具体后端的传输细节。

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::context::Context;
use crate::discovery::endpoint::{Endpoint, ServiceEvent};
use crate::discovery::filter::Filter;
use crate::error::Result;

/// 服务发现策略 trait
///
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// 稳定的策略名称，用于日志和按名称移除
    fn name(&self) -> &str;

    /// 一次性快照
    ///
    /// 上下文已结束时必须立即返回 `Timeout`，不发起底层查询
    async fn discover(&self, ctx: &Context, filter: &Filter) -> Result<Vec<Endpoint>>;

    /// 打开实时订阅
    ///
    /// 上下文取消时返回的流必须关闭，关闭后不得再写入
    async fn watch(&self, ctx: &Context, filter: &Filter) -> Result<EventStream>;
}

/// 可取消的服务事件流
///
/// 发送端全部释放后流结束。如果携带了 guard，drop 流时会取消其生产者。
pub struct EventStream {
    rx: mpsc::Receiver<ServiceEvent>,
    _guard: Option<DropGuard>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<ServiceEvent>) -> Self {
        Self { rx, _guard: None }
    }

    /// 创建流，drop 时通过 guard 取消生产者
    pub fn with_guard(rx: mpsc::Receiver<ServiceEvent>, guard: DropGuard) -> Self {
        Self {
            rx,
            _guard: Some(guard),
        }
    }

    /// 创建有界通道和对应的流
    pub fn channel(buffer: usize) -> (mpsc::Sender<ServiceEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    /// 已关闭的空流
    pub fn closed() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self::new(rx)
    }

    /// 接收下一个事件，流关闭时返回 `None`
    pub async fn recv(&mut self) -> Option<ServiceEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = ServiceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("guarded", &self._guard.is_some())
            .finish()
    }
}

/// 可感知取消的发送
///
/// 上下文结束或接收端已关闭时放弃发送并返回 `false`
pub async fn send_event(
    tx: &mpsc::Sender<ServiceEvent>,
    ctx: &Context,
    event: ServiceEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = ctx.done() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}
