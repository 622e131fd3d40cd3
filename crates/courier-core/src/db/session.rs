use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};

use super::driver::{DriverEvent, SqlConnection, SqlDriver};
use super::queue::{DRAIN_TASK, HIBERNATE_TASK};
use crate::config::DatabaseConfig;
use crate::sched::Scheduler;

pub const RECONNECT_TASK: &str = "database.reconnect";

/// Connectivity transitions, emitted on state entry only. Every dependent
/// component subscribes to these instead of polling connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Connected,
    Disconnected,
}

/// Owns the single logical connection to the relational store.
///
/// The underlying handle is torn down and rebuilt on every reconnect; a
/// generation counter keeps events from discarded handles from driving the
/// state machine.
pub struct DbSession {
    driver: Arc<dyn SqlDriver>,
    sched: Arc<Scheduler>,
    config: DatabaseConfig,
    state: Mutex<ConnState>,
    conn: Mutex<Option<Arc<dyn SqlConnection>>>,
    generation: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl DbSession {
    pub fn new(
        driver: Arc<dyn SqlDriver>,
        sched: Arc<Scheduler>,
        config: DatabaseConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            driver,
            sched,
            config,
            state: Mutex::new(ConnState::Disconnected),
            conn: Mutex::new(None),
            generation: AtomicU64::new(0),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .map(|s| *s == ConnState::Connected)
            .unwrap_or(false)
    }

    fn is_connecting(&self) -> bool {
        self.state
            .lock()
            .map(|s| *s == ConnState::Connecting)
            .unwrap_or(false)
    }

    /// Current connection handle, if any.
    pub fn connection(&self) -> Option<Arc<dyn SqlConnection>> {
        self.conn.lock().ok().and_then(|c| c.clone())
    }

    /// First connect. A failed attempt is not fatal: the session goes
    /// offline and keeps retrying on the configured interval.
    pub async fn connect(self: &Arc<Self>) {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.user,
            password = %"*".repeat(self.config.password.len()),
            database = %self.config.database,
            "connecting"
        );
        self.establish(false).await;
    }

    async fn establish(self: &Arc<Self>, is_reconnect: bool) {
        self.transition(ConnState::Connecting);
        if is_reconnect {
            // Discard the old handle before dialing again.
            if let Ok(mut conn) = self.conn.lock() {
                *conn = None;
            }
            tracing::info!("reconnecting");
        }

        let result = self.driver.connect(&self.config).await;

        // Everything past the await is synchronous: removing the reconnect
        // task below may abort the task currently running this code.
        match result {
            Ok(handle) => self.finish_connect(handle.connection, handle.events, is_reconnect),
            Err(err) => {
                tracing::error!(error = %err, "connection attempt failed");
                self.mark_offline();
            }
        }
    }

    fn finish_connect(
        self: &Arc<Self>,
        connection: Arc<dyn SqlConnection>,
        events: mpsc::Receiver<DriverEvent>,
        is_reconnect: bool,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut conn) = self.conn.lock() {
            *conn = Some(connection);
        }
        let entered = self.transition(ConnState::Connected);

        if self.sched.exists(DRAIN_TASK) && !self.sched.is_running(DRAIN_TASK) {
            self.sched.resume(DRAIN_TASK, "database online");
        }
        if self.sched.exists(HIBERNATE_TASK) && !self.sched.is_running(HIBERNATE_TASK) {
            self.sched.resume(HIBERNATE_TASK, "database online");
        }
        if self.sched.exists(RECONNECT_TASK) {
            self.sched.remove(RECONNECT_TASK, "connection established");
        }

        tracing::info!(reconnect = is_reconnect, "connected");
        if entered {
            let _ = self.events.send(SessionEvent::Online);
        }

        tokio::spawn(watch_events(Arc::downgrade(self), events, generation));
    }

    /// Offline transition: discard the handle, stop the drain tasks, notify
    /// subscribers and make sure a reconnect task is ticking.
    fn mark_offline(self: &Arc<Self>) {
        if let Ok(mut conn) = self.conn.lock() {
            *conn = None;
        }
        let entered = self.transition(ConnState::Disconnected);

        if self.sched.is_running(DRAIN_TASK) {
            self.sched.pause(DRAIN_TASK, "database offline");
        }
        if self.sched.is_running(HIBERNATE_TASK) {
            self.sched.pause(HIBERNATE_TASK, "database offline");
        }

        if entered {
            let _ = self.events.send(SessionEvent::Offline);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.sched.exists(RECONNECT_TASK) {
            return;
        }
        let session = Arc::downgrade(self);
        self.sched.create(
            RECONNECT_TASK,
            self.config.reconnect_interval(),
            0,
            Arc::new(move || {
                let session = session.clone();
                async move {
                    let Some(session) = session.upgrade() else {
                        return;
                    };
                    if !session.is_connecting() {
                        session.establish(true).await;
                    }
                }
                .boxed()
            }),
        );
    }

    /// Returns whether the state actually changed (entry transition).
    fn transition(&self, next: ConnState) -> bool {
        match self.state.lock() {
            Ok(mut state) => {
                let entered = *state != next;
                *state = next;
                entered
            }
            Err(_) => false,
        }
    }
}

async fn watch_events(
    session: Weak<DbSession>,
    mut events: mpsc::Receiver<DriverEvent>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        if session.generation.load(Ordering::SeqCst) != generation {
            return; // stale handle
        }
        match event {
            DriverEvent::Error(message) => {
                tracing::error!(error = %message, "database server error");
            }
            DriverEvent::Closed => {
                tracing::warn!("connection closed, retrying shortly");
                session.mark_offline();
                return;
            }
        }
    }

    // Feed dropped without an explicit close.
    if let Some(session) = session.upgrade() {
        if session.generation.load(Ordering::SeqCst) == generation {
            tracing::warn!("connection event feed ended, treating as closed");
            session.mark_offline();
        }
    }
}

/// Pause the given tasks while the session is offline and resume them when
/// it comes back. Used by every periodic component that talks to the store.
pub fn follow_connectivity(
    sched: Arc<Scheduler>,
    mut events: broadcast::Receiver<SessionEvent>,
    tasks: Vec<String>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Online) => {
                    for task in &tasks {
                        if !sched.is_running(task) {
                            sched.resume(task, "database online");
                        }
                    }
                }
                Ok(SessionEvent::Offline) => {
                    for task in &tasks {
                        if sched.is_running(task) {
                            sched.pause(task, "database offline");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
