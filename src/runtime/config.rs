//! 运行时配置模块

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_secs;

/// 运行时配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// 关闭超时时间（默认 5 秒），限制 stop_all 的总耗时
    #[serde(rename = "shutdown_timeout_secs", with = "duration_secs", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl RuntimeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置关闭超时时间
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
