//! Fixed-size worker pool for long-running tasks
//!
//! Tasks are queued on a bounded channel and pulled by `size` workers. The
//! queue holds at least [`TASK_QUEUE_CAPACITY`] tasks whatever the worker
//! count, so tasks may be submitted before [`WorkerPool::start`]. Every
//! task receives the pool's cancellation token and is expected to return
//! promptly once it fires. Task errors are logged here and never reach the
//! caller of [`WorkerPool::stop`].

use crate::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Tasks that can wait in the queue before `submit` blocks
pub const TASK_QUEUE_CAPACITY: usize = 64;

type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

struct QueuedTask {
    name: String,
    run: TaskFn,
}

/// Worker pool sharing one cancellation signal
pub struct WorkerPool {
    size: usize,
    cancel: CancellationToken,
    tx: mpsc::Sender<QueuedTask>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    closed: AtomicBool,
    started: AtomicBool,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Pool of `size` workers cancelled together with `parent`
    pub fn new(size: usize, parent: &CancellationToken) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(TASK_QUEUE_CAPACITY.max(size));
        Self {
            size,
            cancel: parent.child_token(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Token handed to every task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue a task
    ///
    /// Waits only while [`TASK_QUEUE_CAPACITY`] tasks are already queued;
    /// before `start` nothing drains the queue, so that wait lasts until
    /// `start` or cancellation. Fails with [`Error::PoolClosed`] once the pool is stopping.
    pub async fn submit<F, Fut>(&self, name: impl Into<String>, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return Err(Error::PoolClosed);
        }

        let queued = QueuedTask {
            name: name.into(),
            run: Box::new(move |cancel| Box::pin(task(cancel))),
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::PoolClosed),
            sent = self.tx.send(queued) => sent.map_err(|_| Error::PoolClosed),
        }
    }

    /// Launch the workers; later calls are no-ops
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<JoinHandle<()>> = (0..self.size)
            .map(|worker_id| {
                let rx = self.rx.clone();
                let cancel = self.cancel.clone();
                tokio::spawn(worker_loop(worker_id, rx, cancel))
            })
            .collect();

        if let Ok(mut workers) = self.workers.lock() {
            workers.extend(handles);
        }
        info!(workers = self.size, "Worker pool started");
    }

    /// Cancel every task and wait for all workers to return
    pub async fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker terminated abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = next else {
            debug!(worker_id, "Worker exiting");
            return;
        };

        debug!(worker_id, task = %task.name, "Running task");
        match (task.run)(cancel.clone()).await {
            Ok(()) => info!(worker_id, task = %task.name, "Task finished"),
            Err(e) => error!(worker_id, task = %task.name, error = %e, "Task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_until_stop() {
        let root = CancellationToken::new();
        let pool = WorkerPool::new(2, &root);
        pool.start();

        let observed = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let observed = observed.clone();
            pool.submit("wait", move |cancel| async move {
                cancel.cancelled().await;
                observed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.stop().await;
        assert_eq!(observed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let pool = WorkerPool::new(2, &CancellationToken::new());
        pool.start();
        pool.stop().await;

        let result = pool.submit("late", |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_task_errors_are_not_propagated() {
        let pool = WorkerPool::new(1, &CancellationToken::new());
        pool.start();
        pool.submit("failing", |_| async { Err(Error::SourceClosed) })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_parent_cancel_closes_pool() {
        let root = CancellationToken::new();
        let pool = WorkerPool::new(1, &root);
        root.cancel();

        let result = pool.submit("late", |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn test_tasks_queued_before_start_run() {
        let pool = WorkerPool::new(1, &CancellationToken::new());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        pool.submit("early", move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        pool.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.stop().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_submit_more_tasks_than_workers_before_start() {
        let pool = WorkerPool::new(1, &CancellationToken::new());
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let ran = ran.clone();
            let submitted = tokio::time::timeout(
                Duration::from_millis(100),
                pool.submit(format!("early-{i}"), move |_| async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await;
            assert!(matches!(submitted, Ok(Ok(()))));
        }

        pool.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.stop().await;
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }
}
