use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded worker pool over the shared runtime.
///
/// Tasks are spawned immediately and take a permit before running, so a
/// saturated pool queues rather than drops. `is_full` is an advisory
/// probe: the pool can saturate between the check and the spawn, and
/// callers tolerate that.
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        WorkerPool {
            name,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when every permit is taken
    pub fn is_full(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Run the task once a permit frees up
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            task.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_reports_full_and_recovers() {
        let pool = WorkerPool::new("test-pool", 1);
        assert!(!pool.is_full());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        pool.spawn(async move {
            let _ = rx.await;
        });

        // let the task grab its permit
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.is_full());

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pool.is_full());
    }

    #[tokio::test]
    async fn test_excess_tasks_queue_and_complete() {
        let pool = WorkerPool::new("test-pool", 2);
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.spawn(async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 10);
    }
}
