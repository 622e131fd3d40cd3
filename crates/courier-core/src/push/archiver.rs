use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::alert::AlertSink;
use crate::db::{follow_connectivity, CommandOptions, CommandQueue, DbSession, ProcParam};
use crate::sched::Scheduler;

pub const ARCHIVE_TASK: &str = "push.archive";

/// Periodically asks the store to move completed rows out of the live
/// table. The store procedure owns the actual row movement.
pub struct Archiver {
    commands: Arc<CommandQueue>,
    alert: Arc<dyn AlertSink>,
    module_id: u8,
    running: AtomicBool,
}

impl Archiver {
    pub fn new(commands: Arc<CommandQueue>, alert: Arc<dyn AlertSink>, module_id: u8) -> Arc<Self> {
        Arc::new(Self {
            commands,
            alert,
            module_id,
            running: AtomicBool::new(false),
        })
    }

    pub fn install(self: &Arc<Self>, sched: &Arc<Scheduler>, session: &Arc<DbSession>, interval: Duration) {
        follow_connectivity(sched.clone(), session.subscribe(), vec![ARCHIVE_TASK.to_string()]);
        let archiver = Arc::downgrade(self);
        sched.create(
            ARCHIVE_TASK,
            interval,
            0,
            Arc::new(move || {
                let archiver = archiver.clone();
                async move {
                    if let Some(archiver) = archiver.upgrade() {
                        archiver.run_once().await;
                    }
                }
                .boxed()
            }),
        );
    }

    pub async fn run_once(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let result = self
            .commands
            .call_procedure(
                "Proc_MODULE_Log_Process",
                vec![ProcParam::tiny_int("MODULE_ID", self.module_id)],
                vec![],
                CommandOptions::quiet(),
            )
            .await;

        if let Err(err) = result {
            tracing::error!(error = %err, "archive pass failed");
            self.alert.alert("archiver", &err.to_string());
        }

        self.running.store(false, Ordering::SeqCst);
    }
}
