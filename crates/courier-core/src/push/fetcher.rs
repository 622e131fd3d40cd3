use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::alert::AlertSink;
use crate::db::{follow_connectivity, CommandOptions, CommandQueue, DbSession, ProcParam};
use crate::sched::Scheduler;

use super::queue::PushQueue;
use super::record::PushRecord;

pub const FETCH_TASK: &str = "push.fetch";

/// Pulls newly assigned rows from the store into the in-memory queue.
pub struct Fetcher {
    commands: Arc<CommandQueue>,
    queue: Arc<PushQueue>,
    alert: Arc<dyn AlertSink>,
    module_id: u8,
    running: AtomicBool,
}

impl Fetcher {
    pub fn new(
        commands: Arc<CommandQueue>,
        queue: Arc<PushQueue>,
        alert: Arc<dyn AlertSink>,
        module_id: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            commands,
            queue,
            alert,
            module_id,
            running: AtomicBool::new(false),
        })
    }

    pub fn install(self: &Arc<Self>, sched: &Arc<Scheduler>, session: &Arc<DbSession>, interval: Duration) {
        follow_connectivity(sched.clone(), session.subscribe(), vec![FETCH_TASK.to_string()]);
        let fetcher = Arc::downgrade(self);
        sched.create(
            FETCH_TASK,
            interval,
            0,
            Arc::new(move || {
                let fetcher = fetcher.clone();
                async move {
                    if let Some(fetcher) = fetcher.upgrade() {
                        fetcher.run_once().await;
                    }
                }
                .boxed()
            }),
        );
    }

    /// One fetch tick. Guarded against overlapping a still-running previous
    /// tick; failures are logged and alerted, never stop future ticks.
    pub async fn run_once(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let result = self
            .commands
            .call_procedure(
                "Proc_MODULE_Get_Init_Data",
                vec![ProcParam::tiny_int("MODULE_ID", self.module_id)],
                vec![],
                CommandOptions::quiet(),
            )
            .await;

        match result {
            Ok(result) if !result.rows.is_empty() => {
                let mut records = Vec::with_capacity(result.rows.len());
                for row in &result.rows {
                    match PushRecord::from_row(row) {
                        Ok(record) => records.push(record),
                        Err(err) => {
                            tracing::warn!(error = %err, "skipping malformed row");
                        }
                    }
                }
                tracing::info!(count = records.len(), "fetched");
                self.queue.push(records);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, "fetch failed");
                self.alert.alert("fetcher", &err.to_string());
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}
