//! 指标模块
//!
//! 注册表在每次生命周期调用后同步调用 [`MetricsSink::observe_duration`]。
//! 指标对象由进程显式创建并注入，不使用全局注册表。

use prometheus::{HistogramOpts, HistogramVec, Registry};
use tracing::warn;

use crate::error::{Result, ServicesError};

/// 执行耗时指标名称
pub const EXECUTION_DURATION_METRIC: &str = "flare_services_execution_duration_seconds";

/// 指标接收端
///
/// 实现不得 panic，也不应阻塞；记录失败只能在内部处理
pub trait MetricsSink: Send + Sync {
    fn observe_duration(&self, service: &str, operation: &str, seconds: f64);
}

/// 基于 Prometheus 的指标
#[derive(Clone)]
pub struct PrometheusMetrics {
    execution_duration_seconds: HistogramVec,
}

impl PrometheusMetrics {
    /// 创建并注册到调用方提供的 registry
    pub fn new(registry: &Registry) -> Result<Self> {
        let execution_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                EXECUTION_DURATION_METRIC,
                "Duration of managed service lifecycle operations",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["service", "operation"],
        )
        .map_err(|e| ServicesError::config(format!("failed to create metric: {}", e)))?;

        registry
            .register(Box::new(execution_duration_seconds.clone()))
            .map_err(|e| {
                ServicesError::config(format!(
                    "failed to register {}: {}",
                    EXECUTION_DURATION_METRIC, e
                ))
            })?;

        Ok(Self {
            execution_duration_seconds,
        })
    }
}

impl MetricsSink for PrometheusMetrics {
    fn observe_duration(&self, service: &str, operation: &str, seconds: f64) {
        match self
            .execution_duration_seconds
            .get_metric_with_label_values(&[service, operation])
        {
            Ok(histogram) => histogram.observe(seconds),
            Err(e) => warn!(service = %service, operation = %operation, error = %e, "Failed to record duration"),
        }
    }
}

/// 不记录任何指标
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_duration(&self, _service: &str, _operation: &str, _seconds: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_records_per_service_and_operation() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();
        metrics.observe_duration("auth", "start", 0.02);
        metrics.observe_duration("auth", "start", 0.03);
        metrics.observe_duration("auth", "stop", 0.01);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains(&format!(
            "{}_count{{operation=\"start\",service=\"auth\"}} 2",
            EXECUTION_DURATION_METRIC
        )));
        assert!(text.contains(&format!(
            "{}_count{{operation=\"stop\",service=\"auth\"}} 1",
            EXECUTION_DURATION_METRIC
        )));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        assert!(PrometheusMetrics::new(&registry).is_ok());
        assert!(PrometheusMetrics::new(&registry).is_err());
    }
}
