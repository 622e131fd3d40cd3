use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Callback run on every tick of a scheduled task.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TaskEntry {
    active: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Named recurring tasks.
///
/// Every periodic activity in the service runs through here; nothing polls on
/// its own. Tasks are identified by name and can be paused, resumed and
/// removed by any component holding the scheduler. All operations are
/// non-blocking and tolerate misuse (unknown name, redundant pause) with a
/// warning rather than an error.
pub struct Scheduler {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Register and immediately start a task.
    ///
    /// `repeat == 0` runs forever; `repeat == N` fires the callback N times
    /// and then removes the task. Returns `false` if the name is taken.
    pub fn create(
        self: &Arc<Self>,
        name: &str,
        interval: Duration,
        repeat: u32,
        run: TaskFn,
    ) -> bool {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return false,
        };
        if tasks.contains_key(name) {
            tracing::warn!(task = name, "create skipped: name already exists");
            return false;
        }

        let (active, active_rx) = watch::channel(true);
        let handle = tokio::spawn(run_task(
            name.to_string(),
            interval,
            repeat,
            run,
            active_rx,
            Arc::downgrade(self),
        ));
        tasks.insert(
            name.to_string(),
            TaskEntry { active, handle },
        );

        tracing::info!(task = name, interval_ms = interval.as_millis() as u64, repeat, "created");
        true
    }

    pub fn exists(&self, name: &str) -> bool {
        match self.tasks.lock() {
            Ok(tasks) => tasks.contains_key(name),
            Err(_) => false,
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        match self.tasks.lock() {
            Ok(tasks) => tasks.get(name).is_some_and(|t| *t.active.borrow()),
            Err(_) => false,
        }
    }

    pub fn pause(&self, name: &str, reason: &str) {
        let tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        match tasks.get(name) {
            None => tracing::warn!(task = name, "pause skipped: no such task"),
            Some(entry) if !*entry.active.borrow() => {
                tracing::warn!(task = name, "pause skipped: already paused");
            }
            Some(entry) => {
                let _ = entry.active.send(false);
                tracing::info!(task = name, reason, "paused");
            }
        }
    }

    pub fn resume(&self, name: &str, reason: &str) {
        let tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        match tasks.get(name) {
            None => tracing::warn!(task = name, "resume skipped: no such task"),
            Some(entry) if *entry.active.borrow() => {
                tracing::warn!(task = name, "resume skipped: already active");
            }
            Some(entry) => {
                let _ = entry.active.send(true);
                tracing::info!(task = name, reason, "resumed");
            }
        }
    }

    /// Cancel and delete a task.
    pub fn remove(&self, name: &str, reason: &str) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        match tasks.remove(name) {
            None => tracing::warn!(task = name, "remove skipped: no such task"),
            Some(entry) => {
                entry.handle.abort();
                tracing::info!(task = name, reason, "removed");
            }
        }
    }

    /// Cancel every task. Used at service teardown.
    pub fn shutdown(&self) {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };
        for (name, entry) in tasks.drain() {
            entry.handle.abort();
            tracing::debug!(task = %name, "cancelled at shutdown");
        }
    }
}

async fn run_task(
    name: String,
    interval: Duration,
    repeat: u32,
    run: TaskFn,
    mut active: watch::Receiver<bool>,
    sched: Weak<Scheduler>,
) {
    let mut remaining = repeat;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the immediate first tick

    loop {
        if !*active.borrow() {
            if active.changed().await.is_err() {
                return;
            }
            if !*active.borrow() {
                continue;
            }
            // Resumed: restart the cadence from now.
            ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            continue;
        }

        tokio::select! {
            changed = active.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = ticker.tick() => {
                run().await;
                if repeat > 0 {
                    remaining -= 1;
                    if remaining == 0 {
                        if let Some(sched) = sched.upgrade() {
                            sched.remove(&name, "repeat count reached");
                        }
                        return;
                    }
                }
            }
        }
    }
}
