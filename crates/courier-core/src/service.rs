use std::sync::Arc;

use crate::alert::AlertSink;
use crate::config::ServiceConfig;
use crate::db::{CommandQueue, DbSession, SqlDriver};
use crate::push::{Archiver, Dispatcher, Fetcher, PushGateway, PushQueue, RecordStore};
use crate::sched::Scheduler;

/// Process-wide lifecycle owner.
///
/// Construction order matters: session before command queue before the
/// pipeline components, so everything a component depends on exists when its
/// first tick fires. The initial connect happens last; a failure there is
/// not fatal (the session retries on its own).
pub struct PushService {
    sched: Arc<Scheduler>,
    session: Arc<DbSession>,
    commands: Arc<CommandQueue>,
    queue: Arc<PushQueue>,
    store: Arc<RecordStore>,
    fetcher: Arc<Fetcher>,
    dispatcher: Arc<Dispatcher>,
    archiver: Arc<Archiver>,
}

impl PushService {
    pub async fn start(
        config: ServiceConfig,
        driver: Arc<dyn SqlDriver>,
        gateway: Arc<dyn PushGateway>,
        alert: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let sched = Scheduler::new();

        let session = DbSession::new(driver, sched.clone(), config.database.clone());
        let commands = CommandQueue::new(session.clone(), sched.clone(), &config.database);
        commands.install_tasks();

        let queue = Arc::new(PushQueue::new());
        let store = Arc::new(RecordStore::new(
            commands.clone(),
            queue.clone(),
            alert.clone(),
        ));

        let fetcher = Fetcher::new(
            commands.clone(),
            queue.clone(),
            alert.clone(),
            config.module.module_id,
        );
        fetcher.install(&sched, &session, config.module.fetch_interval());

        let dispatcher = Dispatcher::new(queue.clone(), store.clone(), gateway);
        dispatcher.install(&sched, &session, config.module.send_interval());

        let archiver = Archiver::new(commands.clone(), alert, config.module.module_id);
        archiver.install(&sched, &session, config.module.archive_interval());

        session.connect().await;

        Arc::new(Self {
            sched,
            session,
            commands,
            queue,
            store,
            fetcher,
            dispatcher,
            archiver,
        })
    }

    /// Cancel every scheduled task. In-flight deliveries are not cut short.
    pub fn shutdown(&self) {
        self.sched.shutdown();
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    pub fn session(&self) -> &Arc<DbSession> {
        &self.session
    }

    pub fn commands(&self) -> &Arc<CommandQueue> {
        &self.commands
    }

    pub fn queue(&self) -> &Arc<PushQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn archiver(&self) -> &Arc<Archiver> {
        &self.archiver
    }
}
