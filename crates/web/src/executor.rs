//! Where application code runs when it leaves the I/O thread.

use crate::config::WorkerOptions;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use spindle_http::thread_kind::{mark_current_thread, ThreadKind};
use std::fmt;
use std::io;
use std::thread;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{error, info};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs blocking tasks and drives futures.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    /// Runs a task that may block.
    fn execute(&self, task: Task);

    /// Polls a future to completion.
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// The default worker executor: a dedicated tokio runtime whose threads are marked as workers.
///
/// Blocking tasks go to the runtime's blocking pool, bounded by
/// [`WorkerOptions::max_threads`].
pub struct WorkerPool {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl WorkerPool {
    pub fn new(options: &WorkerOptions) -> io::Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder
            .thread_name("spindle-worker")
            .max_blocking_threads(options.max_threads())
            .on_thread_start(|| mark_current_thread(ThreadKind::Worker))
            .enable_all();
        if let Some(threads) = options.async_threads {
            builder.worker_threads(threads.max(1));
        }

        let runtime = builder.build()?;
        info!(max_threads = options.max_threads(), "worker pool started");
        Ok(Self { handle: runtime.handle().clone(), runtime: Some(runtime) })
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool").field("handle", &self.handle).finish_non_exhaustive()
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.handle.spawn(future);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // dropping a runtime blocks, which is not allowed inside another runtime
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Runs tasks on the calling thread, futures on the shared scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) {
        task();
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        spawn_detached(future);
    }
}

static SCHEDULER: Lazy<io::Result<Runtime>> = Lazy::new(|| {
    Builder::new_multi_thread()
        .thread_name("spindle-scheduler")
        .worker_threads(2)
        .on_thread_start(|| mark_current_thread(ThreadKind::Other))
        .enable_all()
        .build()
});

/// Drives a future that nothing awaits.
///
/// The future runs on the current tokio runtime when there is one, else on a small scheduler
/// runtime created on first use.
pub(crate) fn spawn_detached(future: BoxFuture<'static, ()>) {
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    match SCHEDULER.as_ref() {
        Ok(runtime) => {
            runtime.spawn(future);
        }
        Err(e) => {
            error!(cause = %e, "scheduler unavailable, polling on a dedicated thread");
            thread::spawn(move || futures::executor::block_on(future));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_http::thread_kind::current_thread_kind;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_worker_pool_marks_threads() {
        let pool = WorkerPool::new(&WorkerOptions::default()).unwrap();
        let (tx, rx) = mpsc::channel();

        let blocking_tx = tx.clone();
        pool.execute(Box::new(move || blocking_tx.send(current_thread_kind()).unwrap()));
        pool.spawn(Box::pin(async move { tx.send(current_thread_kind()).unwrap() }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), ThreadKind::Worker);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), ThreadKind::Worker);
    }

    #[test]
    fn test_direct_executor_runs_inline() {
        let (tx, rx) = mpsc::channel();
        DirectExecutor.execute(Box::new(move || tx.send(thread::current().id()).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), thread::current().id());
    }

    #[test]
    fn test_spawn_detached_outside_runtime() {
        let (tx, rx) = mpsc::channel();
        spawn_detached(Box::pin(async move { tx.send(1).unwrap() }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
