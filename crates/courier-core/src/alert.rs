/// Hook invoked with every operational failure (fetch, dispatch, archive,
/// record update). Operator-facing reporting (e-mail, paging) lives behind
/// this boundary; the service itself only calls it.
pub trait AlertSink: Send + Sync + 'static {
    fn alert(&self, component: &str, message: &str);
}

/// Default sink: records the alert in the service log.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, component: &str, message: &str) {
        tracing::error!(component, message, "operational alert");
    }
}
