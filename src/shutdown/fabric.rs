//! Cancellation-token based shutdown coordination

use log::{debug, info, warn};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Coordinates graceful shutdown across every long-running task.
///
/// Cloning a `Fabric` is cheap and shares the same cancellation token and
/// task set, mirroring how a `ProxyHandle` is cloned to reach a single
/// running service from multiple call sites.
#[derive(Clone)]
pub struct Fabric {
    token: CancellationToken,
    hooks: std::sync::Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>>,
}

impl Fabric {
    /// Create a new shutdown fabric
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            hooks: std::sync::Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A token that resolves once shutdown has been requested. Pass clones
    /// of this into every `tokio::select!` loop that needs to exit cleanly.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves when shutdown has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// True once shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a cleanup hook. Hooks run in LIFO order (last registered,
    /// first run) once shutdown begins, so a later subsystem that depends on
    /// an earlier one's resources tears down first.
    pub fn on_shutdown<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.lock().unwrap().push(Box::new(hook));
    }

    /// Request shutdown: cancels the token, then runs every registered hook
    /// in LIFO order.
    pub fn trigger(&self) {
        if self.token.is_cancelled() {
            return;
        }

        info!("shutdown requested");
        self.token.cancel();

        let mut hooks = self.hooks.lock().unwrap();
        while let Some(hook) = hooks.pop() {
            hook();
        }
    }

    /// Wait for every task in `tasks` to finish, up to `timeout`. Tasks still
    /// running past the deadline are abandoned; their abort handles are
    /// dropped along with the `JoinSet`.
    pub async fn wait_for_tasks<T>(tasks: &mut JoinSet<T>, timeout: Duration) {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            if tasks.is_empty() {
                debug!("all tasks completed before shutdown deadline");
                return;
            }

            tokio::select! {
                _ = &mut deadline => {
                    warn!("shutdown deadline reached with {} task(s) still running", tasks.len());
                    return;
                }
                result = tasks.join_next() => {
                    if let Some(Err(e)) = result {
                        warn!("task panicked during shutdown: {}", e);
                    }
                }
            }
        }
    }

    /// Run `fut` until it completes or shutdown is requested, whichever
    /// happens first. Returns `None` if shutdown won.
    pub async fn race<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            _ = self.cancelled() => None,
            result = fut => Some(result),
        }
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_trigger_cancels_token() {
        let fabric = Fabric::new();
        assert!(!fabric.is_shutting_down());
        fabric.trigger();
        assert!(fabric.is_shutting_down());
        fabric.cancelled().await;
    }

    #[tokio::test]
    async fn test_hooks_run_in_lifo_order() {
        let fabric = Fabric::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order1 = Arc::clone(&order);
        fabric.on_shutdown(move || order1.lock().unwrap().push(1));
        let order2 = Arc::clone(&order);
        fabric.on_shutdown(move || order2.lock().unwrap().push(2));

        fabric.trigger();

        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_race_returns_none_on_shutdown() {
        let fabric = Fabric::new();
        fabric.trigger();

        let result = fabric.race(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            42
        }).await;

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_wait_for_tasks_completes_quickly() {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            tasks.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        Fabric::wait_for_tasks(&mut tasks, Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
