//! 调用上下文
//!
//! 携带取消信号和可选的截止时间，贯穿一次 discover / watch / 批量生命周期调用。
//! 子上下文继承父上下文的取消信号和截止时间，取消父上下文会传播到所有子上下文。

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ServicesError;

/// 可取消的调用上下文
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// 创建没有截止时间的上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带超时的上下文
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// 创建带截止时间的上下文
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// 基于已有的取消令牌创建上下文
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// 派生子上下文
    ///
    /// 子上下文可以单独取消，不影响父上下文
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// 派生带更短超时的子上下文（取两者中较早的截止时间）
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// 取消此上下文及其所有子上下文
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 返回一个 guard，drop 时取消此上下文
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 剩余时间，没有截止时间时返回 `None`
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 已取消或已超过截止时间
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 上下文结束的原因；未结束时返回 `None`
    pub fn err(&self) -> Option<ServicesError> {
        if self.token.is_cancelled() {
            return Some(ServicesError::timeout("context cancelled"));
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => {
                Some(ServicesError::timeout("context deadline exceeded"))
            }
            _ => None,
        }
    }

    /// 检查上下文，已结束时返回 `Timeout` 错误
    pub fn check(&self) -> Result<(), ServicesError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 等待上下文结束（取消或到达截止时间）
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_cancelled_with_parent() {
        let parent = Context::new();
        let child = parent.child();
        assert!(!child.is_done());

        parent.cancel();
        assert!(child.is_done());
        assert!(child.err().is_some_and(|e| e.is_timeout()));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_affect_parent() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        assert!(ctx.check().is_ok());

        ctx.done().await;
        assert!(ctx.is_done());
        assert!(ctx.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_with_timeout_keeps_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_drop_guard_cancels() {
        let ctx = Context::new();
        let guard = ctx.drop_guard();
        drop(guard);
        assert!(ctx.is_cancelled());
    }
}
