//! The overlay's main queue.
//!
//! Handlers for non-handshake messages are posted here as named closures and
//! run one at a time by a single consumer. Each task is tagged with an
//! [`ActionType`]; droppable tasks that waited longer than the latency window
//! are discarded unrun, and code running inside a task can ask for that
//! task's type so it can shed outbound load.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::dispatch::ActionType;

thread_local! {
    static CURRENT_ACTION: Cell<Option<ActionType>> = const { Cell::new(None) };
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    name: &'static str,
    action: ActionType,
    posted_at: Instant,
    job: Job,
}

struct Shared {
    executed: AtomicU64,
    dropped: AtomicU64,
}

/// Posting handle; cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Task>,
    shared: Arc<Shared>,
}

/// The single consumer of the main queue.
pub struct SchedulerWorker {
    rx: mpsc::UnboundedReceiver<Task>,
    shared: Arc<Shared>,
    latency_window: Duration,
}

/// Create a connected scheduler handle and worker.
pub fn main_queue(latency_window: Duration) -> (Scheduler, SchedulerWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        executed: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        Scheduler {
            tx,
            shared: Arc::clone(&shared),
        },
        SchedulerWorker {
            rx,
            shared,
            latency_window,
        },
    )
}

impl Scheduler {
    /// Queue `job`. Returns `false` if the worker is gone, in which case the
    /// job is dropped without running.
    pub fn post<F>(&self, name: &'static str, action: ActionType, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Task {
                name,
                action,
                posted_at: Instant::now(),
                job: Box::new(job),
            })
            .is_ok()
    }

    /// Type of the task running on the calling thread; `None` outside the
    /// worker.
    pub fn current_action_type(&self) -> Option<ActionType> {
        CURRENT_ACTION.with(Cell::get)
    }

    pub fn executed_tasks(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    pub fn dropped_tasks(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl SchedulerWorker {
    /// Run every task queued so far (and any they post). Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            if self.execute(task) {
                ran += 1;
            }
        }
        ran
    }

    /// Consume tasks until shutdown or until every [`Scheduler`] is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let task = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("main queue shutting down");
                    break;
                }
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.execute(task);
        }
    }

    fn execute(&self, task: Task) -> bool {
        if task.action == ActionType::Droppable && task.posted_at.elapsed() > self.latency_window {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(task = task.name, "dropping stale task");
            // dropping the closure releases whatever it captured
            return false;
        }
        let previous = CURRENT_ACTION.with(|c| c.replace(Some(task.action)));
        (task.job)();
        CURRENT_ACTION.with(|c| c.set(previous));
        self.shared.executed.fetch_add(1, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn tasks_run_in_post_order() {
        let (scheduler, mut worker) = main_queue(Duration::from_secs(5));
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            scheduler.post("push", ActionType::Normal, move || log.lock().unwrap().push(i));
        }
        assert_eq!(worker.run_pending(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(scheduler.executed_tasks(), 3);
    }

    #[test]
    fn running_task_sees_its_action_type() {
        let (scheduler, mut worker) = main_queue(Duration::from_secs(5));
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            let handle = scheduler.clone();
            scheduler.post("probe", ActionType::Droppable, move || {
                *seen.lock().unwrap() = handle.current_action_type();
            });
        }
        worker.run_pending();
        assert_eq!(*seen.lock().unwrap(), Some(ActionType::Droppable));
        assert_eq!(scheduler.current_action_type(), None);
    }

    #[test]
    fn tasks_posted_by_tasks_run_in_same_drain() {
        let (scheduler, mut worker) = main_queue(Duration::from_secs(5));
        let hits = Arc::new(AtomicU64::new(0));
        {
            let hits = Arc::clone(&hits);
            let handle = scheduler.clone();
            scheduler.post("outer", ActionType::Normal, move || {
                let hits = Arc::clone(&hits);
                handle.post("inner", ActionType::Normal, move || {
                    hits.fetch_add(1, Ordering::Relaxed);
                });
            });
        }
        assert_eq!(worker.run_pending(), 2);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_droppable_tasks_are_discarded() {
        let (scheduler, mut worker) = main_queue(Duration::from_millis(100));
        let hits = Arc::new(AtomicU64::new(0));
        for action in [ActionType::Droppable, ActionType::Normal] {
            let hits = Arc::clone(&hits);
            scheduler.post("count", action, move || {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(worker.run_pending(), 1);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.dropped_tasks(), 1);
    }

    #[tokio::test]
    async fn run_exits_on_shutdown() {
        let (scheduler, worker) = main_queue(Duration::from_secs(5));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(worker.run(shutdown_rx));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        scheduler.post("signal", ActionType::Normal, move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
