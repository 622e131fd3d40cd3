use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};

use crate::db::{follow_connectivity, DbSession};
use crate::sched::Scheduler;

use super::gateway::PushGateway;
use super::queue::PushQueue;
use super::record::PushRecord;
use super::store::{sql_quote, RecordStore};

pub const DISPATCH_TASK: &str = "push.dispatch";

/// Drives each eligible record through the send pipeline:
/// claim → build message → persist SENDING → send → persist DONE → evict.
///
/// Records are delivered concurrently within a tick; ordering across records
/// is not guaranteed. The claim happens before any I/O, so a record can
/// never be in two pipelines at once, and SENDING is persisted before the
/// external call so a crash mid-flight is visible in the store.
pub struct Dispatcher {
    queue: Arc<PushQueue>,
    store: Arc<RecordStore>,
    gateway: Arc<dyn PushGateway>,
    running: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<PushQueue>,
        store: Arc<RecordStore>,
        gateway: Arc<dyn PushGateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            gateway,
            running: AtomicBool::new(false),
        })
    }

    pub fn install(self: &Arc<Self>, sched: &Arc<Scheduler>, session: &Arc<DbSession>, interval: Duration) {
        follow_connectivity(sched.clone(), session.subscribe(), vec![DISPATCH_TASK.to_string()]);
        let dispatcher = Arc::downgrade(self);
        sched.create(
            DISPATCH_TASK,
            interval,
            0,
            Arc::new(move || {
                let dispatcher = dispatcher.clone();
                async move {
                    if let Some(dispatcher) = dispatcher.upgrade() {
                        dispatcher.run_once().await;
                    }
                }
                .boxed()
            }),
        );
    }

    /// One dispatch tick: claim every eligible record and start its
    /// pipeline. Returns once the claims are made; deliveries proceed
    /// concurrently.
    pub async fn run_once(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        for record in self.queue.eligible() {
            // Claim before any I/O. A lost race means another pass owns it.
            if !self.queue.try_claim(&record.idx) {
                continue;
            }
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.deliver(record).await;
            });
        }

        self.running.store(false, Ordering::SeqCst);
    }

    async fn deliver(&self, record: PushRecord) {
        let message = build_message(&record);

        // Persist SENDING before the external call: a crash past this point
        // leaves the store showing SENDING, not INIT, for reconciliation.
        let _ = self
            .store
            .update(&record, "CUR_STATE = 'SENDING', SEND_DATE = GETDATE()")
            .await;

        match self.gateway.send(&message).await {
            Ok(message_id) => {
                tracing::info!(record = %record.idx, message_id = %message_id, "delivered");
                let _ = self
                    .store
                    .update(&record, "CUR_STATE = 'DONE', RESULT_CODE = 'messaging/success'")
                    .await;
            }
            Err(err) => {
                tracing::warn!(record = %record.idx, code = err.code(), error = %err, "delivery rejected");
                let set = format!(
                    "CUR_STATE = 'DONE', RESULT_CODE = '{}'",
                    sql_quote(err.code())
                );
                let _ = self.store.update(&record, &set).await;
            }
        }

        // DONE records leave memory immediately, success or failure.
        self.queue.remove(&record.idx);
    }
}

/// Fixed delivery template merged with the record's opaque extra data.
/// Malformed extra data degrades to no overrides.
fn build_message(record: &PushRecord) -> Value {
    let mut message = json!({
        "notification": {
            "title": record.title,
            "body": record.body,
        },
        "data": {
            "title": record.title,
            "message": record.body,
        },
        "token": record.token,
        "android": {
            "priority": "high",
            "ttl": 0,
            "notification": {
                "default_sound": true,
                "default_vibrate_timings": true,
                "default_light_settings": true,
            },
        },
        "apns": {
            "headers": {
                "apns-priority": "10",
            },
            "payload": {
                "aps": {
                    "sound": "default",
                },
            },
        },
    });

    let Some(extra) = record.extra_data.as_deref() else {
        return message;
    };
    match serde_json::from_str::<Value>(extra) {
        Ok(Value::Object(overrides)) => {
            if let Value::Object(base) = &mut message {
                for (key, value) in overrides {
                    base.insert(key, value);
                }
            }
        }
        Ok(_) | Err(_) => {
            tracing::warn!(record = %record.idx, "extra data is not a JSON object, ignored");
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::super::record::PushState;
    use super::*;

    fn record(extra: Option<&str>) -> PushRecord {
        PushRecord {
            idx: "1".to_string(),
            state: PushState::Init,
            token: "tok".to_string(),
            title: "Title".to_string(),
            body: "Body".to_string(),
            extra_data: extra.map(str::to_string),
            result_code: None,
            send_date: None,
        }
    }

    #[test]
    fn template_carries_record_fields() {
        let message = build_message(&record(None));
        assert_eq!(message["token"], "tok");
        assert_eq!(message["notification"]["title"], "Title");
        assert_eq!(message["data"]["message"], "Body");
        assert_eq!(message["android"]["priority"], "high");
        assert_eq!(message["apns"]["headers"]["apns-priority"], "10");
    }

    #[test]
    fn extra_data_overrides_top_level_keys() {
        let message = build_message(&record(Some(
            r#"{"data": {"deep_link": "app://orders/5"}, "fcm_options": {"analytics_label": "promo"}}"#,
        )));
        // Top-level spread: the data section is replaced, not deep-merged.
        assert_eq!(message["data"]["deep_link"], "app://orders/5");
        assert!(message["data"].get("title").is_none());
        assert_eq!(message["fcm_options"]["analytics_label"], "promo");
        // Untouched sections survive.
        assert_eq!(message["notification"]["title"], "Title");
    }

    #[test]
    fn malformed_extra_data_is_ignored() {
        let message = build_message(&record(Some("{not json")));
        assert_eq!(message["notification"]["title"], "Title");
        let message = build_message(&record(Some("[1, 2]")));
        assert_eq!(message["token"], "tok");
    }
}
