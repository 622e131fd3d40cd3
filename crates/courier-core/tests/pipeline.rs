use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::TryRecvError;

use courier_core::db::{CommandOptions, MemoryDriver, SessionEvent, DRAIN_TASK};
use courier_core::push::{PushGateway, DISPATCH_TASK, FETCH_TASK};
use courier_core::{LogAlertSink, PushError, PushService, ServiceConfig};

// ── Helpers ──────────────────────────────────────────────────────────

struct StubGateway {
    delay: Duration,
    failure: Option<String>,
    sent: AtomicUsize,
}

impl StubGateway {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            failure: None,
            sent: AtomicUsize::new(0),
        })
    }

    fn failing(code: &str) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::ZERO,
            failure: Some(code.to_string()),
            sent: AtomicUsize::new(0),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failure: None,
            sent: AtomicUsize::new(0),
        })
    }

    fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushGateway for StubGateway {
    async fn send(&self, _message: &Value) -> Result<String, PushError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.failure {
            Some(code) => Err(PushError::Provider {
                code: code.clone(),
                message: "stubbed rejection".to_string(),
            }),
            None => Ok(format!("projects/test/messages/{n}")),
        }
    }
}

fn fast_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.database.process_interval_ms = 10;
    config.database.reconnect_interval_ms = 50;
    config.module.fetch_interval_ms = 20;
    config.module.send_interval_ms = 25;
    config.module.archive_interval_ms = 3_600_000;
    config
}

/// Like `fast_config`, but the pipeline tasks never tick on their own; tests
/// drive fetch/dispatch manually.
fn manual_config() -> ServiceConfig {
    let mut config = fast_config();
    config.module.fetch_interval_ms = 3_600_000;
    config.module.send_interval_ms = 3_600_000;
    config
}

fn seeded_driver() -> Arc<MemoryDriver> {
    let driver = Arc::new(MemoryDriver::new());
    driver.seed(json!({
        "IDX": "1",
        "CUR_STATE": "INIT",
        "TOKEN": "tok",
        "TITLE": "T",
        "BODY": "B",
        "EXTRA_DATA": null,
    }));
    driver
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── End-to-end ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn seeded_record_reaches_done_on_success() {
    let driver = seeded_driver();
    let gateway = StubGateway::succeeding();
    let service = PushService::start(
        fast_config(),
        driver.clone(),
        gateway.clone(),
        Arc::new(LogAlertSink),
    )
    .await;

    wait_until("record persisted as DONE", || {
        driver
            .row("1")
            .map(|row| row["CUR_STATE"] == "DONE")
            .unwrap_or(false)
    })
    .await;

    let row = driver.row("1").unwrap();
    assert_eq!(row["RESULT_CODE"], "messaging/success");
    assert!(row["SEND_DATE"].is_string());

    wait_until("queue drained", || service.queue().is_empty()).await;
    assert_eq!(gateway.sent(), 1);

    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn rejected_record_reaches_done_with_provider_code() {
    let driver = seeded_driver();
    let gateway = StubGateway::failing("messaging/invalid-registration-token");
    let service = PushService::start(
        fast_config(),
        driver.clone(),
        gateway.clone(),
        Arc::new(LogAlertSink),
    )
    .await;

    wait_until("record persisted as DONE", || {
        driver
            .row("1")
            .map(|row| row["CUR_STATE"] == "DONE")
            .unwrap_or(false)
    })
    .await;

    let row = driver.row("1").unwrap();
    assert_eq!(row["RESULT_CODE"], "messaging/invalid-registration-token");

    wait_until("queue drained", || service.queue().is_empty()).await;
    assert_eq!(gateway.sent(), 1);

    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn store_observes_sending_before_done() {
    let driver = seeded_driver();
    // Slow delivery keeps the record in SENDING long enough to observe.
    let gateway = StubGateway::slow(Duration::from_millis(200));
    let service = PushService::start(
        fast_config(),
        driver.clone(),
        gateway.clone(),
        Arc::new(LogAlertSink),
    )
    .await;

    wait_until("record persisted as SENDING", || {
        driver
            .row("1")
            .map(|row| row["CUR_STATE"] == "SENDING")
            .unwrap_or(false)
    })
    .await;

    wait_until("record persisted as DONE", || {
        driver
            .row("1")
            .map(|row| row["CUR_STATE"] == "DONE")
            .unwrap_or(false)
    })
    .await;

    service.shutdown();
}

// ── Single flight ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn overlapping_dispatch_passes_send_once() {
    let driver = seeded_driver();
    let gateway = StubGateway::slow(Duration::from_millis(100));
    let service = PushService::start(
        manual_config(),
        driver.clone(),
        gateway.clone(),
        Arc::new(LogAlertSink),
    )
    .await;

    service.fetcher().run_once().await;
    assert_eq!(service.queue().len(), 1);

    // First pass claims and starts the delivery; the second sees the claim
    // and skips while the send is still in flight.
    service.dispatcher().run_once().await;
    service.dispatcher().run_once().await;

    wait_until("queue drained", || service.queue().is_empty()).await;
    assert_eq!(gateway.sent(), 1);
    assert_eq!(driver.row("1").unwrap()["CUR_STATE"], "DONE");

    service.shutdown();
}

// ── Command queue ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn commands_complete_in_enqueue_order() {
    let driver = Arc::new(MemoryDriver::new());
    let service = PushService::start(
        manual_config(),
        driver.clone(),
        StubGateway::succeeding(),
        Arc::new(LogAlertSink),
    )
    .await;

    let commands = service.commands();
    let (a, b, c) = tokio::join!(
        commands.execute("SELECT 'A'", CommandOptions::quiet()),
        commands.execute("SELECT 'B'", CommandOptions::quiet()),
        commands.execute("SELECT 'C'", CommandOptions::quiet()),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "SELECT 'A'".to_string(),
            "SELECT 'B'".to_string(),
            "SELECT 'C'".to_string(),
        ]
    );

    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn idle_queue_hibernates_and_wakes_on_enqueue() {
    let mut config = manual_config();
    config.database.hibernate.enabled = true;
    config.database.hibernate.idle_ms = 200;

    let driver = Arc::new(MemoryDriver::new());
    let service = PushService::start(
        config,
        driver.clone(),
        StubGateway::succeeding(),
        Arc::new(LogAlertSink),
    )
    .await;

    let sched = service.scheduler();
    service
        .commands()
        .execute("SELECT 1", CommandOptions::quiet())
        .await
        .unwrap();
    assert!(sched.is_running(DRAIN_TASK));

    wait_until("drain task hibernated", || !sched.is_running(DRAIN_TASK)).await;

    // A new command wakes the drain task and completes normally.
    service
        .commands()
        .execute("SELECT 2", CommandOptions::quiet())
        .await
        .unwrap();
    assert!(sched.is_running(DRAIN_TASK));

    service.shutdown();
}

// ── Reconnect ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connection_loss_pauses_tasks_until_reconnect() {
    let driver = Arc::new(MemoryDriver::new());
    let service = PushService::start(
        fast_config(),
        driver.clone(),
        StubGateway::succeeding(),
        Arc::new(LogAlertSink),
    )
    .await;

    let sched = service.scheduler();
    assert!(service.session().is_connected());
    assert!(sched.is_running(FETCH_TASK));
    assert!(sched.is_running(DISPATCH_TASK));

    let mut events = service.session().subscribe();
    driver.sever();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("offline event in time")
        .unwrap();
    assert_eq!(event, SessionEvent::Offline);

    wait_until("pipeline tasks paused", || {
        !sched.is_running(FETCH_TASK)
            && !sched.is_running(DISPATCH_TASK)
            && !sched.is_running(DRAIN_TASK)
    })
    .await;

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("online event in time")
        .unwrap();
    assert_eq!(event, SessionEvent::Online);

    wait_until("pipeline tasks resumed", || {
        sched.is_running(FETCH_TASK) && sched.is_running(DISPATCH_TASK) && sched.is_running(DRAIN_TASK)
    })
    .await;
    assert!(service.session().is_connected());

    // The online transition fired exactly once.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    service.shutdown();
}
