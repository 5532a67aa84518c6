//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 注册表相关错误
/// - 2000-2999: 服务发现相关错误
/// - 6000-6999: 系统相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 注册表相关错误 (1000-1999)
    // ============================================================
    ServiceAlreadyRegistered = 1000,
    ServiceNotFound = 1001,
    ServiceLifecycleFailed = 1002,

    // ============================================================
    // 服务发现相关错误 (2000-2999)
    // ============================================================
    StrategyNotFound = 2000,
    StrategyFailed = 2001,
    InvalidEndpoint = 2002,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    ConfigurationError = 6000,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    OperationTimeout = 9000,
    AggregateFailure = 9001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ServiceAlreadyRegistered => "SERVICE_ALREADY_REGISTERED",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::ServiceLifecycleFailed => "SERVICE_LIFECYCLE_FAILED",
            ErrorCode::StrategyNotFound => "STRATEGY_NOT_FOUND",
            ErrorCode::StrategyFailed => "STRATEGY_FAILED",
            ErrorCode::InvalidEndpoint => "INVALID_ENDPOINT",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::AggregateFailure => "AGGREGATE_FAILURE",
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Registry,
            2000..=2999 => ErrorCategory::Discovery,
            6000..=6999 => ErrorCategory::System,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 后端故障和超时通常是暂时的，重复的注册或配置错误则不是
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::StrategyFailed
                | ErrorCode::ServiceLifecycleFailed
                | ErrorCode::OperationTimeout
                | ErrorCode::AggregateFailure
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Registry,
    Discovery,
    System,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Registry => "registry",
            ErrorCategory::Discovery => "discovery",
            ErrorCategory::System => "system",
            ErrorCategory::General => "general",
        };
        f.write_str(s)
    }
}
