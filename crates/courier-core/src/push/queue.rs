use std::collections::HashMap;
use std::sync::Mutex;

use super::record::{PushRecord, PushState, RecordFlags};

/// In-memory queue of pending notifications plus their transient flags.
///
/// Mutated only by the fetcher (push), the dispatcher (claim, evict) and the
/// store round-trip path (replace). Record and flags always live and die
/// together. Lost on crash by design; the store's durable state is the
/// recovery source.
pub struct PushQueue {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: Vec<PushRecord>,
    flags: HashMap<String, RecordFlags>,
}

impl PushQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a fetched batch.
    pub fn push(&self, records: Vec<PushRecord>) {
        if records.is_empty() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        tracing::debug!(count = records.len(), total = inner.records.len() + records.len(), "queued");
        inner.records.extend(records);
    }

    /// The sole admission filter for dispatch: INIT/READY records with no
    /// in-flight send claim.
    pub fn eligible(&self) -> Vec<PushRecord> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .records
            .iter()
            .filter(|rec| matches!(rec.state, PushState::Init | PushState::Ready))
            .filter(|rec| !inner.flags.get(&rec.idx).map(|f| f.working).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn working(&self, idx: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.flags.get(idx).map(|f| f.working).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Claim a record for sending: sets `working` if and only if it was
    /// clear. Compare-and-set under the queue lock, so overlapping dispatch
    /// passes cannot both claim the same record.
    pub fn try_claim(&self, idx: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let flags = inner.flags.entry(idx.to_string()).or_default();
        if flags.working {
            return false;
        }
        flags.working = true;
        tracing::debug!(record = idx, "claimed");
        true
    }

    /// Swap in the merged row after a store round-trip.
    pub fn replace(&self, idx: &str, record: PushRecord) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.records.iter_mut().find(|r| r.idx == idx) {
            Some(slot) => *slot = record,
            None => tracing::warn!(record = idx, "replace skipped: not queued"),
        }
    }

    /// Delete a record and its flags together.
    pub fn remove(&self, idx: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.records.iter().position(|r| r.idx == idx) {
            Some(position) => {
                inner.records.remove(position);
                inner.flags.remove(idx);
                tracing::info!(record = idx, position, "removed");
            }
            None => tracing::debug!(record = idx, "remove skipped: not queued"),
        }
    }

    pub fn get(&self, idx: &str) -> Option<PushRecord> {
        self.inner
            .lock()
            .ok()?
            .records
            .iter()
            .find(|r| r.idx == idx)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PushQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(idx: &str, state: PushState) -> PushRecord {
        PushRecord {
            idx: idx.to_string(),
            state,
            token: "tok".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            extra_data: None,
            result_code: None,
            send_date: None,
        }
    }

    #[test]
    fn eligibility_filters_state_and_claim() {
        let queue = PushQueue::new();
        queue.push(vec![
            record("1", PushState::Init),
            record("2", PushState::Ready),
            record("3", PushState::Sending),
            record("4", PushState::Done),
            record("5", PushState::Unknown),
            record("6", PushState::Init),
        ]);
        assert!(queue.try_claim("6"));

        let eligible: Vec<String> = queue.eligible().into_iter().map(|r| r.idx).collect();
        assert_eq!(eligible, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn claim_is_exclusive_until_removed() {
        let queue = PushQueue::new();
        queue.push(vec![record("1", PushState::Init)]);

        assert!(!queue.working("1"));
        assert!(queue.try_claim("1"));
        assert!(queue.working("1"));
        assert!(!queue.try_claim("1"));

        queue.remove("1");
        assert!(!queue.working("1"));
        assert!(queue.get("1").is_none());
    }

    #[test]
    fn remove_unknown_record_is_a_noop() {
        let queue = PushQueue::new();
        queue.remove("ghost");
        assert!(queue.is_empty());
    }

    #[test]
    fn replace_swaps_the_queued_copy() {
        let queue = PushQueue::new();
        queue.push(vec![record("1", PushState::Init)]);

        let mut updated = record("1", PushState::Sending);
        updated.send_date = Some("2023-05-01T09:30:00Z".to_string());
        queue.replace("1", updated);

        let got = queue.get("1").unwrap();
        assert_eq!(got.state, PushState::Sending);
        assert!(got.send_date.is_some());
    }
}
