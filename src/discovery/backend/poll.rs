//! 轮询式 watch
//!
//! 不支持增量推送的后端通过定期重新查询并对比快照来实现 watch：
//! 新出现的名称发出 `Added`，消失的名称发出 `Deleted`，属性变化发出 `Modified`。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::context::Context;
use crate::discovery::endpoint::{Endpoint, ServiceEvent};
use crate::discovery::strategy::{EventStream, send_event};
use crate::error::Result;

/// 轮询参数
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// 轮询间隔
    pub interval: Duration,
    /// 事件流缓冲大小
    pub buffer: usize,
}

/// 轮询间隔下限，`tokio::time::interval` 不接受零间隔
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl PollSettings {
    /// 把间隔和缓冲限制在可用范围内
    pub fn normalized(self) -> Self {
        Self {
            interval: self.interval.max(MIN_POLL_INTERVAL),
            buffer: self.buffer.max(1),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            buffer: 100,
        }
    }
}

/// 启动轮询 watch 任务
///
/// 第一次轮询立即执行；轮询失败只记录警告并保留上一次的快照。
/// 上下文结束或接收端关闭时任务退出，事件流随之关闭。
pub fn spawn_poll_watch<F, Fut>(
    strategy: impl Into<String>,
    ctx: Context,
    settings: PollSettings,
    mut poll: F,
) -> EventStream
where
    F: FnMut(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<Endpoint>>> + Send + 'static,
{
    let strategy = strategy.into();
    let settings = settings.normalized();
    let (tx, stream) = EventStream::channel(settings.buffer);

    tokio::spawn(async move {
        let mut known: HashMap<String, Endpoint> = HashMap::new();
        let mut ticker = tokio::time::interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'watch: loop {
            tokio::select! {
                biased;
                _ = ctx.done() => break,
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = ctx.done() => break,
                polled = poll(ctx.clone()) => polled,
            };

            match polled {
                Ok(endpoints) => {
                    let events = diff_snapshot(&mut known, endpoints);
                    if !events.is_empty() {
                        debug!(strategy = %strategy, changes = events.len(), "Detected endpoint changes");
                    }
                    for event in events {
                        if !send_event(&tx, &ctx, event).await {
                            break 'watch;
                        }
                    }
                }
                Err(e) => {
                    warn!(strategy = %strategy, error = %e, "Poll failed, keeping previous snapshot");
                }
            }
        }

        debug!(strategy = %strategy, "Stopping poll watcher");
    });

    stream
}

/// 对比快照并更新 `known`，返回变更事件
///
/// 同名端点以最后一次出现为准；删除事件按名称排序
pub fn diff_snapshot(
    known: &mut HashMap<String, Endpoint>,
    current: Vec<Endpoint>,
) -> Vec<ServiceEvent> {
    let mut events = Vec::new();
    let mut seen = HashSet::new();
    let mut latest: Vec<Endpoint> = Vec::with_capacity(current.len());

    for endpoint in current.into_iter().rev() {
        if seen.insert(endpoint.name.clone()) {
            latest.push(endpoint);
        }
    }
    latest.reverse();

    for endpoint in latest {
        match known.get(&endpoint.name) {
            None => {
                known.insert(endpoint.name.clone(), endpoint.clone());
                events.push(ServiceEvent::added(endpoint));
            }
            Some(previous) if previous != &endpoint => {
                known.insert(endpoint.name.clone(), endpoint.clone());
                events.push(ServiceEvent::modified(endpoint));
            }
            Some(_) => {}
        }
    }

    let mut gone: Vec<String> = known
        .keys()
        .filter(|name| !seen.contains(*name))
        .cloned()
        .collect();
    gone.sort();
    for name in gone {
        if let Some(endpoint) = known.remove(&name) {
            events.push(ServiceEvent::deleted(endpoint));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::endpoint::{EventKind, Port};
    use crate::error::ServicesError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ep(name: &str, address: &str) -> Endpoint {
        Endpoint::new(name, address).with_port(Port::tcp("http", 8080))
    }

    fn kinds(events: &[ServiceEvent]) -> Vec<(EventKind, String)> {
        events
            .iter()
            .map(|e| (e.kind, e.endpoint.name.clone()))
            .collect()
    }

    #[test]
    fn test_diff_added_modified_deleted() {
        let mut known = HashMap::new();
        let first = diff_snapshot(&mut known, vec![ep("a", "10.0.0.1"), ep("b", "10.0.0.2")]);
        assert_eq!(
            kinds(&first),
            vec![(EventKind::Added, "a".into()), (EventKind::Added, "b".into())]
        );

        let unchanged = diff_snapshot(&mut known, vec![ep("a", "10.0.0.1"), ep("b", "10.0.0.2")]);
        assert!(unchanged.is_empty());

        let second = diff_snapshot(&mut known, vec![ep("a", "10.0.0.9"), ep("c", "10.0.0.3")]);
        assert_eq!(
            kinds(&second),
            vec![
                (EventKind::Modified, "a".into()),
                (EventKind::Added, "c".into()),
                (EventKind::Deleted, "b".into()),
            ]
        );
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn test_diff_duplicate_names_last_wins() {
        let mut known = HashMap::new();
        let events = diff_snapshot(&mut known, vec![ep("a", "1"), ep("a", "2")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].endpoint.address, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_watch_emits_and_closes_on_cancel() {
        let ctx = Context::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut stream = spawn_poll_watch(
            "test",
            ctx.clone(),
            PollSettings {
                interval: Duration::from_secs(1),
                buffer: 8,
            },
            move |_ctx| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Ok(vec![ep("a", "10.0.0.1")]),
                        1 => Err(ServicesError::backend("test", "flaky")),
                        _ => Ok(vec![]),
                    }
                }
            },
        );

        let added = stream.recv().await.unwrap();
        assert_eq!(added.kind, EventKind::Added);

        // 第二次轮询失败被跳过，第三次返回空快照
        let deleted = stream.recv().await.unwrap();
        assert_eq!(deleted.kind, EventKind::Deleted);
        assert!(calls.load(Ordering::SeqCst) >= 3);

        ctx.cancel();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_watch_with_zero_settings_still_runs() {
        let ctx = Context::new();
        let mut stream = spawn_poll_watch(
            "test",
            ctx.clone(),
            PollSettings {
                interval: Duration::ZERO,
                buffer: 0,
            },
            |_ctx| async { Ok(vec![ep("a", "10.0.0.1")]) },
        );

        let added = stream.recv().await.unwrap();
        assert_eq!(added.kind, EventKind::Added);

        ctx.cancel();
        assert!(stream.recv().await.is_none());
    }
}
