//! The bounded work queue and its worker pool. Submission never blocks:
//! a full queue drops the task with a warning and the next scheduled
//! tick takes its place. Each accepted task runs with a soft deadline
//! (cancellation signal, body must wind down) and a hard deadline
//! (outright abort).
use super::error::TaskError;
use super::handlers::execute;
use super::{Task, TaskLog};
use crate::ecc::client::EccClientFactory;
use crate::remote::shell::ShellFactory;
use crate::store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts of task names between submission and completion. The poller
/// consults this so a slow task suppresses its own next tick.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<HashMap<&'static str, usize>>>);

impl InFlight {
    fn begin(&self, name: &'static str) {
        *self.0.lock().entry(name).or_insert(0) += 1;
    }

    fn end(&self, name: &'static str) {
        let mut guard = self.0.lock();
        if let Some(count) = guard.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                guard.remove(name);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.lock().contains_key(name)
    }
}

/// Handle for putting tasks on the queue. Clones share the queue and the
/// in-flight registry.
#[derive(Clone)]
pub struct Submitter {
    tx: mpsc::Sender<Task>,
    in_flight: InFlight,
    log: Arc<dyn TaskLog>,
}

impl Submitter {
    pub fn new(tx: mpsc::Sender<Task>, log: Arc<dyn TaskLog>) -> Self {
        Self {
            tx,
            in_flight: InFlight::default(),
            log,
        }
    }

    /// Enqueue a task. Returns false (after a warning) if the queue had
    /// no room; there is no retry.
    pub fn submit(&self, task: Task) -> bool {
        let name = task.name();
        match self.tx.try_send(task) {
            Ok(()) => {
                self.in_flight.begin(name);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.log
                    .warning(format!("Dropping {name} task, the work queue is full"));
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.log
                    .warning(format!("Dropping {name} task, the dispatcher is gone"));
                false
            }
        }
    }

    /// Enqueue a scheduled task unless one of the same name is still
    /// queued or running
    pub fn submit_scheduled(&self, task: Task) -> bool {
        if self.in_flight.contains(task.name()) {
            tracing::debug!("Suppressing {} tick, previous one still in flight", task.name());
            return false;
        }
        self.submit(task)
    }

    fn finished(&self, name: &'static str) {
        self.in_flight.end(name);
    }
}

/// Everything a task body needs, cheap to clone into a spawned task
#[derive(Clone)]
pub struct TaskContext {
    pub store: Store,
    pub clients: Arc<dyn EccClientFactory>,
    pub shells: Arc<dyn ShellFactory>,
    pub submitter: Submitter,
    pub log: Arc<dyn TaskLog>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        store: Store,
        clients: Arc<dyn EccClientFactory>,
        shells: Arc<dyn ShellFactory>,
        submitter: Submitter,
        log: Arc<dyn TaskLog>,
    ) -> Self {
        Self {
            store,
            clients,
            shells,
            submitter,
            log,
            cancel: CancellationToken::new(),
        }
    }

    fn with_cancel(&self, cancel: CancellationToken) -> Self {
        let mut ctx = self.clone();
        ctx.cancel = cancel;
        ctx
    }

    /// Race a suspension point against the soft-deadline signal. Task
    /// bodies wrap their network calls in this so cancellation lands at a
    /// clean point and resources unwind through Drop.
    pub async fn guard<T, E>(
        &self,
        task: &'static str,
        fut: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T, TaskError>
    where
        E: Into<TaskError>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TaskError::SoftTimeLimit(task)),
            result = fut => result.map_err(Into::into),
        }
    }
}

/// Run one task under its deadlines. Exactly one log record containing
/// "time limit" is written when either deadline cuts the body off.
pub async fn run_one(task: Task, ctx: &TaskContext) {
    let name = task.name();
    let limits = task.limits();
    let token = CancellationToken::new();
    let mut body = tokio::spawn(execute(task, ctx.with_cancel(token.clone())));

    let before_soft = tokio::select! {
        outcome = &mut body => Some(outcome),
        _ = tokio::time::sleep(limits.soft) => None,
    };
    let outcome = match before_soft {
        Some(outcome) => outcome,
        None => {
            token.cancel();
            tokio::select! {
                outcome = &mut body => outcome,
                _ = tokio::time::sleep(limits.hard.saturating_sub(limits.soft)) => {
                    body.abort();
                    ctx.log.error(format!(
                        "Task {name} ignored cancellation and was killed at its hard time limit"
                    ));
                    return;
                }
            }
        }
    };

    match outcome {
        Ok(Ok(())) => (),
        Ok(Err(TaskError::SoftTimeLimit(_))) => ctx.log.error(format!(
            "Task {name} hit its soft time limit and was interrupted"
        )),
        Ok(Err(e)) => ctx.log.error(format!("Task {name} failed: {e}")),
        Err(e) => ctx.log.error(format!("Task {name} died before finishing: {e}")),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 64,
        }
    }
}

/// The worker pool. Dropping the dispatcher without calling shutdown
/// leaves workers draining the queue until the process ends.
pub struct Dispatcher {
    submitter: Submitter,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn start(
        config: DispatcherConfig,
        store: Store,
        clients: Arc<dyn EccClientFactory>,
        shells: Arc<dyn ShellFactory>,
        log: Arc<dyn TaskLog>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let submitter = Submitter::new(tx, log.clone());
        let ctx = TaskContext::new(store, clients, shells, submitter.clone(), log);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shutdown = CancellationToken::new();
        let workers = (0..config.workers.max(1))
            .map(|_| tokio::spawn(worker_loop(rx.clone(), ctx.clone(), shutdown.clone())))
            .collect();
        Self {
            submitter,
            workers,
            shutdown,
        }
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    ctx: TaskContext,
    shutdown: CancellationToken,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => return,
                task = guard.recv() => task,
            }
        };
        let Some(task) = task else { return };
        let name = task.name();
        run_one(task, &ctx).await;
        ctx.submitter.finished(name);
    }
}
