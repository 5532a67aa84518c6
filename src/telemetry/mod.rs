//! 追踪钩子
//!
//! 注册表在每次生命周期调用前后同步调用 [`Tracer::start_span`] / [`Tracer::end_span`]。
//! 追踪失败不会影响被包裹的操作。

use std::time::{Duration, Instant};
use tracing::{Level, Span, debug, field, span};

use crate::error::ServicesError;

/// 追踪器
pub trait Tracer: Send + Sync {
    /// 开始一个 span，`name` 为操作名（如 "StartService"）
    fn start_span(&self, name: &str, service: &str) -> SpanHandle;

    /// 结束 span，`error` 为操作失败时的错误
    fn end_span(&self, handle: SpanHandle, error: Option<&ServicesError>);
}

/// span 句柄
#[derive(Debug)]
pub struct SpanHandle {
    name: String,
    service: String,
    started: Instant,
    span: Span,
}

impl SpanHandle {
    pub fn new(name: impl Into<String>, service: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            started: Instant::now(),
            span,
        }
    }

    /// 不关联任何 tracing span 的句柄
    pub fn detached(name: impl Into<String>, service: impl Into<String>) -> Self {
        Self::new(name, service, Span::none())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// 被包裹操作应当在此 span 下执行
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// 基于 `tracing` 的追踪器，每次调用一个 INFO 级 span
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str, service: &str) -> SpanHandle {
        let span = span!(
            Level::INFO,
            "service_lifecycle",
            operation = %name,
            service = %service,
            error = field::Empty,
        );
        SpanHandle::new(name, service, span)
    }

    fn end_span(&self, handle: SpanHandle, error: Option<&ServicesError>) {
        if let Some(e) = error {
            handle.span.record("error", field::display(e));
        }
        debug!(
            parent: &handle.span,
            operation = %handle.name,
            service = %handle.service,
            elapsed_ms = handle.elapsed().as_millis() as u64,
            failed = error.is_some(),
            "Span finished"
        );
    }
}

/// 不产生任何 span
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, name: &str, service: &str) -> SpanHandle {
        SpanHandle::detached(name, service)
    }

    fn end_span(&self, _handle: SpanHandle, _error: Option<&ServicesError>) {}
}
