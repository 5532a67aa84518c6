//! 服务运行时
//!
//! 统一管理受管服务的进程级生命周期：
//!
//! 1. 从组合发现器同步端点到注册表
//! 2. 初始化并启动所有服务
//! 3. 等待关闭信号
//! 4. 在关闭超时内停止所有服务

pub mod config;
pub mod runtime;

pub use config::RuntimeConfig;
pub use runtime::ServicesRuntime;
