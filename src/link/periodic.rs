//! Supervised periodic task.
//!
//! Heartbeat and stream polling both need the same contract: run a tick body
//! on a fixed period, never overlap two ticks, and die as a unit when the
//! owner stops them. Wrapping the tokio task here keeps the start/stop
//! bookkeeping out of the link service.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a periodically executed task. Dropping the handle aborts it.
#[derive(Debug)]
pub struct Periodic {
    handle: JoinHandle<()>,
}

impl Periodic {
    /// Spawn a task running `tick` every `period`, starting one period from
    /// now. Each tick is awaited to completion before the next is scheduled,
    /// so at most one tick is ever outstanding; a slow tick delays later
    /// ones instead of stacking them.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let first = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { handle }
    }

    /// Abort the task. Also happens implicitly on drop.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn ticks_repeatedly_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let periodic = Periodic::spawn(Duration::from_millis(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(55)).await;
        periodic.stop();
        let at_stop = count.load(Ordering::SeqCst);
        assert!(at_stop >= 3, "expected several ticks, got {}", at_stop);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop, "ticked after stop");
    }

    #[tokio::test]
    async fn slow_ticks_do_not_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));
        let (a, o) = (active.clone(), overlapped.clone());
        let periodic = Periodic::spawn(Duration::from_millis(5), move || {
            let (a, o) = (a.clone(), o.clone());
            async move {
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                a.fetch_sub(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        periodic.stop();
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }
}
