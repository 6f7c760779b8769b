//! Bounded executor for background remote operations.
//!
//! Remote deletions are dispatched onto a fixed pool of worker threads so a
//! large recursive removal cannot stall the calling thread or open an
//! unbounded number of connections. Each submission hands back a
//! [`TaskHandle`]; waiting on it surfaces the task's error, dropping it
//! makes the task fire-and-forget. A failing or panicking task never takes
//! a worker down with it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use blobdisk_common::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::error;

type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Job {
    Run { task: Task, done: Sender<Result<()>> },
    Exit,
}

/// Completion handle for one submitted task.
///
/// The task runs whether or not the handle is kept. A dropped handle means
/// nobody is listening; the worker still logs the task's failure before
/// discarding it.
#[derive(Debug)]
pub struct TaskHandle {
    done: Receiver<Result<()>>,
}

impl TaskHandle {
    /// Block until the task finishes and return its outcome.
    pub fn wait(self) -> Result<()> {
        match self.done.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::internal("task discarded before it could run")),
        }
    }
}

struct Pool {
    workers: Vec<JoinHandle<()>>,
    // Exit markers sent but not yet consumed by a worker.
    pending_exits: usize,
    // Prototype receiver; keeps the job channel connected even while the
    // pool is resized down to zero workers.
    rx: Receiver<Job>,
}

impl Pool {
    /// Drop finished workers together with the exit markers they consumed.
    ///
    /// A worker only finishes by consuming an exit marker while the
    /// executor is alive, so the reaped count and the consumed count match.
    fn reap(&mut self) {
        let before = self.workers.len();
        self.workers.retain(|worker| !worker.is_finished());
        let reaped = before - self.workers.len();
        self.pending_exits = self.pending_exits.saturating_sub(reaped);
    }

    /// Width the pool settles at once every queued exit marker is consumed.
    fn settled_width(&self) -> usize {
        self.workers.len().saturating_sub(self.pending_exits)
    }
}

/// Fixed-size pool of worker threads running blocking tasks.
pub struct TaskExecutor {
    name: String,
    tx: Sender<Job>,
    pool: Mutex<Pool>,
}

impl TaskExecutor {
    /// Spawn a pool of `threads` workers named after `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let executor = Self {
            name: name.into(),
            tx,
            pool: Mutex::new(Pool {
                workers: Vec::new(),
                pending_exits: 0,
                rx,
            }),
        };
        executor.set_max_threads(threads);
        executor
    }

    /// Queue a task for execution; never blocks.
    ///
    /// Tasks run in submission order per worker. If the executor is torn
    /// down before the task is picked up, the handle resolves with an
    /// error.
    pub fn execute<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (done, handle) = crossbeam_channel::bounded(1);
        let job = Job::Run {
            task: Box::new(task),
            done,
        };
        // Cannot disconnect while `self` holds the prototype receiver; if
        // it somehow does, the dropped job resolves the handle with an
        // error through the closed `done` channel.
        let _ = self.tx.send(job);
        TaskHandle { done: handle }
    }

    /// Resize the pool to `threads` workers.
    ///
    /// Growing spawns workers immediately. Shrinking queues exit markers
    /// behind any pending work, so tasks already submitted still run on the
    /// old width. Resizes are sized against the settled width, so exit
    /// markers from an earlier shrink are never queued twice.
    pub fn set_max_threads(&self, threads: usize) {
        let mut pool = self.pool.lock();
        pool.reap();
        let settled = pool.settled_width();
        if threads > settled {
            for _ in settled..threads {
                let rx = pool.rx.clone();
                let name = self.name.clone();
                pool.workers.push(thread::spawn(move || worker_loop(&name, &rx)));
            }
        } else {
            for _ in threads..settled {
                let _ = self.tx.send(Job::Exit);
            }
            pool.pending_exits += settled - threads;
        }
    }

    /// Pool width net of queued exit markers.
    #[must_use]
    pub fn threads(&self) -> usize {
        let mut pool = self.pool.lock();
        pool.reap();
        pool.settled_width()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        let mut pool = self.pool.lock();
        for _ in 0..pool.workers.len() {
            let _ = self.tx.send(Job::Exit);
        }
        for worker in pool.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(name: &str, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Run { task, done } => {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(result) => result,
                    Err(payload) => Err(Error::internal(format!(
                        "task panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };
                if let Err(e) = &outcome {
                    error!("executor {}: task failed: {}", name, e);
                }
                let _ = done.send(outcome);
            }
            Job::Exit => break,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_task_runs_and_reports_success() {
        let executor = TaskExecutor::new("test", 2);
        let handle = executor.execute(|| Ok(()));
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_task_error_is_delivered_to_handle() {
        let executor = TaskExecutor::new("test", 1);
        let handle = executor.execute(|| Err(Error::backend("bulk delete refused")));
        let err = handle.wait().unwrap_err();
        assert!(err.to_string().contains("bulk delete refused"));
    }

    #[test]
    fn test_panic_is_contained() {
        let executor = TaskExecutor::new("test", 1);
        let handle = executor.execute(|| panic!("kaboom"));
        let err = handle.wait().unwrap_err();
        assert!(err.to_string().contains("kaboom"));
        // The worker that caught the panic is still serving tasks.
        assert!(executor.execute(|| Ok(())).wait().is_ok());
    }

    #[test]
    fn test_dropped_handle_still_runs_task() {
        let ran = Arc::new(AtomicBool::new(false));
        {
            let executor = TaskExecutor::new("test", 1);
            let ran = Arc::clone(&ran);
            drop(executor.execute(move || {
                ran.store(true, Ordering::SeqCst);
                Err(Error::backend("nobody listening"))
            }));
            // Executor drop joins the workers, so the task has finished
            // once this scope ends.
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrency_stays_under_thread_count() {
        let executor = TaskExecutor::new("test", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<TaskHandle> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                executor.execute(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_resize_grows_pool() {
        let executor = TaskExecutor::new("test", 1);
        assert_eq!(executor.threads(), 1);
        executor.set_max_threads(4);
        assert_eq!(executor.threads(), 4);
    }

    #[test]
    fn test_tasks_queued_before_workers_exist() {
        let executor = TaskExecutor::new("test", 0);
        let handle = executor.execute(|| Ok(()));
        executor.set_max_threads(1);
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_shrink_drains_pending_work_first() {
        let executor = TaskExecutor::new("test", 2);
        let handles: Vec<TaskHandle> = (0..6)
            .map(|_| {
                executor.execute(|| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(())
                })
            })
            .collect();
        executor.set_max_threads(1);
        for handle in handles {
            handle.wait().unwrap();
        }
        assert!(executor.execute(|| Ok(())).wait().is_ok());
    }

    #[test]
    fn test_overlapping_shrinks_settle_at_target() {
        let executor = TaskExecutor::new("test", 4);
        let gate = Arc::new(Barrier::new(5));
        let handles: Vec<TaskHandle> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                executor.execute(move || {
                    gate.wait();
                    Ok(())
                })
            })
            .collect();
        // Both shrinks land while every worker is still busy.
        executor.set_max_threads(2);
        executor.set_max_threads(1);
        assert_eq!(executor.threads(), 1);
        gate.wait();
        for handle in handles {
            handle.wait().unwrap();
        }
        // The surviving worker still picks up new submissions, and a
        // repeated resize to the same width queues no further exits.
        executor.set_max_threads(1);
        assert!(executor.execute(|| Ok(())).wait().is_ok());
        assert_eq!(executor.threads(), 1);
    }
}
