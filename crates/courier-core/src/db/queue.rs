use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::driver::{OutputParam, ProcParam, ProcedureResult, StatementResult};
use super::session::DbSession;
use crate::config::DatabaseConfig;
use crate::error::DbError;
use crate::sched::Scheduler;

pub const DRAIN_TASK: &str = "database.queue";
pub const HIBERNATE_TASK: &str = "database.queue.hibernate";

const HIBERNATE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Per-command execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandOptions {
    /// Suppress the per-command success log line. Used by high-frequency
    /// callers (fetch tick, record updates).
    pub no_success_log: bool,
}

impl CommandOptions {
    pub fn quiet() -> Self {
        Self {
            no_success_log: true,
        }
    }
}

#[derive(Debug, Clone)]
enum CommandKind {
    Procedure {
        name: String,
        params: Vec<ProcParam>,
        output_params: Vec<OutputParam>,
    },
    Statement {
        sql: String,
    },
}

#[derive(Debug)]
enum CommandReply {
    Procedure(ProcedureResult),
    Statement(StatementResult),
}

struct QueuedCommand {
    id: Uuid,
    kind: CommandKind,
    options: CommandOptions,
    reply: oneshot::Sender<Result<CommandReply, DbError>>,
}

struct QueueInner {
    queue: VecDeque<QueuedCommand>,
    draining: bool,
    last_drain: Instant,
}

/// Serialized access to the store: every command from every caller lands in
/// one queue and is executed in order against the session's single handle.
///
/// The drain task runs on a short fixed tick and processes the entire batch
/// that was queued when it woke, so commands enqueued before a drain begins
/// complete before anything enqueued after it starts its own batch. Each
/// command settles its caller's future exactly once.
pub struct CommandQueue {
    session: Arc<DbSession>,
    sched: Arc<Scheduler>,
    inner: Mutex<QueueInner>,
    config: DatabaseConfig,
}

impl CommandQueue {
    pub fn new(session: Arc<DbSession>, sched: Arc<Scheduler>, config: &DatabaseConfig) -> Arc<Self> {
        Arc::new(Self {
            session,
            sched,
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                draining: false,
                last_drain: Instant::now(),
            }),
            config: config.clone(),
        })
    }

    /// Register the drain task and, when configured, the hibernation watch.
    pub fn install_tasks(self: &Arc<Self>) {
        let queue = Arc::downgrade(self);
        self.sched.create(
            DRAIN_TASK,
            self.config.process_interval(),
            0,
            Arc::new(move || {
                let queue = queue.clone();
                async move {
                    if let Some(queue) = queue.upgrade() {
                        queue.drain().await;
                    }
                }
                .boxed()
            }),
        );

        if self.config.hibernate.enabled {
            let queue = Arc::downgrade(self);
            self.sched.create(
                HIBERNATE_TASK,
                HIBERNATE_CHECK_INTERVAL,
                0,
                Arc::new(move || {
                    let queue = queue.clone();
                    async move {
                        if let Some(queue) = queue.upgrade() {
                            queue.maybe_hibernate();
                        }
                    }
                    .boxed()
                }),
            );
        }
    }

    /// Queue a stored-procedure call and wait for its single execution.
    pub async fn call_procedure(
        &self,
        name: &str,
        params: Vec<ProcParam>,
        output_params: Vec<OutputParam>,
        options: CommandOptions,
    ) -> Result<ProcedureResult, DbError> {
        let rx = self.enqueue(
            CommandKind::Procedure {
                name: name.to_string(),
                params,
                output_params,
            },
            options,
        );
        match rx.await {
            Ok(Ok(CommandReply::Procedure(result))) => Ok(result),
            Ok(Ok(CommandReply::Statement(_))) => {
                Err(DbError::Execution("statement reply for procedure command".to_string()))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DbError::Dropped),
        }
    }

    /// Queue a raw statement and wait for its single execution.
    pub async fn execute(&self, sql: &str, options: CommandOptions) -> Result<StatementResult, DbError> {
        let rx = self.enqueue(
            CommandKind::Statement {
                sql: sql.to_string(),
            },
            options,
        );
        match rx.await {
            Ok(Ok(CommandReply::Statement(result))) => Ok(result),
            Ok(Ok(CommandReply::Procedure(_))) => {
                Err(DbError::Execution("procedure reply for statement command".to_string()))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DbError::Dropped),
        }
    }

    /// Append to the queue and wake the drain task if it is idle. The
    /// returned future settles when this specific command finishes.
    fn enqueue(
        &self,
        kind: CommandKind,
        options: CommandOptions,
    ) -> oneshot::Receiver<Result<CommandReply, DbError>> {
        let (tx, rx) = oneshot::channel();
        let command = QueuedCommand {
            id: Uuid::new_v4(),
            kind,
            options,
            reply: tx,
        };
        if let Ok(mut inner) = self.inner.lock() {
            inner.queue.push_back(command);
        }
        if !self.sched.is_running(DRAIN_TASK) {
            self.sched.resume(DRAIN_TASK, "command enqueued");
        }
        rx
    }

    /// One full pass: execute everything queued right now, in order.
    async fn drain(&self) {
        let batch: Vec<QueuedCommand> = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.draining || inner.queue.is_empty() {
                return;
            }
            inner.draining = true;
            inner.queue.drain(..).collect()
        };

        for command in batch {
            let QueuedCommand {
                id,
                kind,
                options,
                reply,
            } = command;
            let result = self.run(id, &kind, options).await;
            if reply.send(result).is_err() {
                tracing::debug!(command = %id, "result dropped, caller went away");
            }
        }

        if let Ok(mut inner) = self.inner.lock() {
            inner.draining = false;
            inner.last_drain = Instant::now();
        }
    }

    async fn run(
        &self,
        id: Uuid,
        kind: &CommandKind,
        options: CommandOptions,
    ) -> Result<CommandReply, DbError> {
        let Some(conn) = self.session.connection() else {
            tracing::warn!(command = %id, "rejected, not connected");
            return Err(DbError::NotConnected);
        };

        match kind {
            CommandKind::Procedure {
                name,
                params,
                output_params,
            } => match conn.call_procedure(name, params, output_params).await {
                Ok(mut result) => {
                    for output in output_params {
                        result
                            .return_values
                            .entry(output.name.clone())
                            .or_insert_with(|| output.default.clone());
                    }
                    if !options.no_success_log {
                        tracing::info!(
                            procedure = %name,
                            returns = %summarize(&result.return_values),
                            "procedure completed"
                        );
                    }
                    Ok(CommandReply::Procedure(result))
                }
                Err(err) => {
                    tracing::error!(procedure = %name, error = %err, "procedure failed");
                    Err(err)
                }
            },
            CommandKind::Statement { sql } => match conn.execute(sql).await {
                Ok(result) => {
                    if !options.no_success_log {
                        tracing::info!(sql = %sql, "statement completed");
                    }
                    Ok(CommandReply::Statement(result))
                }
                Err(err) => {
                    tracing::error!(sql = %sql, error = %err, "statement failed");
                    Err(err)
                }
            },
        }
    }

    /// Pause the drain task once the queue has been idle past the configured
    /// window. The next enqueue resumes it.
    fn maybe_hibernate(&self) {
        if !self.sched.is_running(DRAIN_TASK) {
            return;
        }
        let idle = {
            let Ok(inner) = self.inner.lock() else {
                return;
            };
            !inner.draining
                && inner.queue.is_empty()
                && inner.last_drain.elapsed() >= self.config.hibernate.idle_window()
        };
        if idle {
            self.sched.pause(DRAIN_TASK, "hibernate");
        }
    }
}

fn summarize(values: &super::driver::Row) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
