use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tracks fire-and-forget work (backup writes, background reconciliation,
/// identity watchers) so it can be awaited or aborted at shutdown.
#[derive(Default)]
pub struct DetachedTasks {
    set: Mutex<JoinSet<()>>,
}

impl DetachedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        reap(&mut set);
        debug!("Spawning detached task: {}", label);
        set.spawn(future);
    }

    pub fn spawn_blocking<F>(&self, label: &'static str, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut set = self.lock();
        reap(&mut set);
        debug!("Spawning detached blocking task: {}", label);
        set.spawn_blocking(work);
    }

    /// Wait for every tracked task, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.lock());
            if set.is_empty() {
                return;
            }
            while let Some(result) = set.join_next().await {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!("Detached task failed: {}", e);
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let mut set = self.lock();
        if !set.is_empty() {
            debug!("Aborting {} detached task(s)", set.len());
        }
        set.abort_all();
        reap(&mut set);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Drop handles of tasks that already finished.
fn reap(set: &mut JoinSet<()>) {
    while let Some(result) = set.try_join_next() {
        if let Err(e) = result {
            if !e.is_cancelled() {
                warn!("Detached task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_all_tasks() {
        let tasks = DetachedTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let done = done.clone();
            tasks.spawn("sleeper", async move {
                tokio::time::sleep(Duration::from_secs(i)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_drain_runs_blocking_work() {
        let tasks = DetachedTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        tasks.spawn_blocking("blocking", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts() {
        let tasks = DetachedTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        tasks.spawn("forever", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tasks.shutdown();
        tasks.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }
}
