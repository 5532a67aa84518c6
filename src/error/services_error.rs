//! 服务发现与注册表统一错误类型

use super::code::ErrorCode;
use std::fmt;
use thiserror::Error;

/// 后端或服务实现返回的原始错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 未找到的对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Service,
    Strategy,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Service => f.write_str("service"),
            NotFoundKind::Strategy => f.write_str("strategy"),
        }
    }
}

/// 统一错误类型
#[derive(Error, Debug)]
pub enum ServicesError {
    /// 名称已注册（原有条目保持不变）
    #[error("service already registered: {0}")]
    AlreadyRegistered(String),

    /// 服务或策略不存在
    #[error("{kind} not found: {name}")]
    NotFound { kind: NotFoundKind, name: String },

    /// 上下文已取消或超过截止时间
    #[error("timeout: {0}")]
    Timeout(String),

    /// 单个策略或服务的底层错误
    #[error("{source_name} failed: {source}")]
    BackendFailure {
        source_name: String,
        #[source]
        source: BoxError,
    },

    /// 批量操作中的多个失败
    #[error(transparent)]
    AggregateFailure(#[from] AggregateError),

    /// 端点缺少必需字段
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}

impl ServicesError {
    pub fn service_not_found(name: impl Into<String>) -> Self {
        ServicesError::NotFound {
            kind: NotFoundKind::Service,
            name: name.into(),
        }
    }

    pub fn strategy_not_found(name: impl Into<String>) -> Self {
        ServicesError::NotFound {
            kind: NotFoundKind::Strategy,
            name: name.into(),
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        ServicesError::Timeout(reason.into())
    }

    /// 包装后端错误，`source_name` 为策略名或服务名
    pub fn backend(source_name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ServicesError::BackendFailure {
            source_name: source_name.into(),
            source: source.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        ServicesError::Config(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            ServicesError::AlreadyRegistered(_) => ErrorCode::ServiceAlreadyRegistered,
            ServicesError::NotFound {
                kind: NotFoundKind::Service,
                ..
            } => ErrorCode::ServiceNotFound,
            ServicesError::NotFound {
                kind: NotFoundKind::Strategy,
                ..
            } => ErrorCode::StrategyNotFound,
            ServicesError::Timeout(_) => ErrorCode::OperationTimeout,
            ServicesError::BackendFailure { .. } => ErrorCode::StrategyFailed,
            ServicesError::AggregateFailure(_) => ErrorCode::AggregateFailure,
            ServicesError::InvalidEndpoint(_) => ErrorCode::InvalidEndpoint,
            ServicesError::Config(_) => ErrorCode::ConfigurationError,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ServicesError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServicesError::NotFound { .. })
    }

    /// 获取聚合错误（如果是）
    pub fn as_aggregate(&self) -> Option<&AggregateError> {
        match self {
            ServicesError::AggregateFailure(agg) => Some(agg),
            _ => None,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 单个失败记录（策略名或服务名 + 错误）
#[derive(Debug)]
pub struct Failure {
    pub name: String,
    pub error: ServicesError,
}

/// 批量操作的聚合错误
///
/// 列出每一个失败的策略或服务及其原因
#[derive(Debug)]
pub struct AggregateError {
    pub operation: String,
    pub failures: Vec<Failure>,
}

impl AggregateError {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            failures: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, error: ServicesError) {
        self.failures.push(Failure {
            name: name.into(),
            error,
        });
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// 失败者名称列表
    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.name == name)
    }

    /// 没有失败时返回 `Ok(())`
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ServicesError::AggregateFailure(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {} target(s)", self.operation, self.failures.len())?;
        for (idx, failure) in self.failures.iter().enumerate() {
            let sep = if idx == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, failure.name, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServicesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_display_lists_every_failure() {
        let mut agg = AggregateError::new("discover");
        agg.push("dns", ServicesError::backend("dns", "lookup failed"));
        agg.push("kubernetes", ServicesError::timeout("deadline exceeded"));

        let msg = agg.to_string();
        assert!(msg.starts_with("discover failed for 2 target(s)"));
        assert!(msg.contains("dns: dns failed: lookup failed"));
        assert!(msg.contains("kubernetes: timeout: deadline exceeded"));
        assert_eq!(agg.names(), vec!["dns", "kubernetes"]);
    }

    #[test]
    fn test_empty_aggregate_is_ok() {
        assert!(AggregateError::new("start").into_result().is_ok());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ServicesError::service_not_found("a").code(),
            ErrorCode::ServiceNotFound
        );
        assert_eq!(
            ServicesError::strategy_not_found("dns").code(),
            ErrorCode::StrategyNotFound
        );
        assert!(ServicesError::timeout("x").is_timeout());
        assert!(!ServicesError::AlreadyRegistered("a".into()).is_retryable());
    }
}
