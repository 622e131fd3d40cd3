use serde::{Deserialize, Serialize};

use crate::db::Row;

/// Notification lifecycle. State only advances INIT/READY → SENDING → DONE;
/// DONE is terminal for both delivered and rejected messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushState {
    #[serde(rename = "INIT")]
    Init,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "SENDING")]
    Sending,
    #[serde(rename = "DONE")]
    Done,
    /// Labels this worker does not know. Never eligible for dispatch.
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

/// One row of the notification table, cached in memory while in flight.
/// The store stays authoritative: every persisted-field mutation round-trips
/// through it and the fresh row is merged back over this copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRecord {
    #[serde(rename = "IDX")]
    pub idx: String,
    #[serde(rename = "CUR_STATE")]
    pub state: PushState,
    #[serde(rename = "TOKEN")]
    pub token: String,
    #[serde(rename = "TITLE")]
    pub title: String,
    #[serde(rename = "BODY")]
    pub body: String,
    #[serde(rename = "EXTRA_DATA", default)]
    pub extra_data: Option<String>,
    #[serde(rename = "RESULT_CODE", default)]
    pub result_code: Option<String>,
    #[serde(rename = "SEND_DATE", default)]
    pub send_date: Option<String>,
}

impl PushRecord {
    pub fn from_row(row: &Row) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(row.clone()))
    }

    /// Merge a fresh store row over this record, column by column; columns
    /// present in the row win.
    pub fn merged_with(&self, row: &Row) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(base) = &mut value {
            for (column, v) in row {
                base.insert(column.clone(), v.clone());
            }
        }
        serde_json::from_value(value)
    }
}

/// Transient per-record state, keyed by IDX and never persisted. Absence is
/// equivalent to the defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFlags {
    /// Single-flight guard: true while a send attempt owns this record.
    pub working: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record() -> PushRecord {
        PushRecord {
            idx: "1".to_string(),
            state: PushState::Init,
            token: "tok".to_string(),
            title: "T".to_string(),
            body: "B".to_string(),
            extra_data: None,
            result_code: None,
            send_date: None,
        }
    }

    #[test]
    fn row_round_trip() {
        let row = json!({
            "IDX": "9",
            "CUR_STATE": "READY",
            "TOKEN": "tok",
            "TITLE": "hello",
            "BODY": "world",
            "EXTRA_DATA": null,
        });
        let rec = PushRecord::from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(rec.idx, "9");
        assert_eq!(rec.state, PushState::Ready);
        assert!(rec.extra_data.is_none());
        assert!(rec.result_code.is_none());
    }

    #[test]
    fn unknown_state_labels_are_tolerated() {
        let row = json!({
            "IDX": "9",
            "CUR_STATE": "PURGED",
            "TOKEN": "tok",
            "TITLE": "t",
            "BODY": "b",
        });
        let rec = PushRecord::from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(rec.state, PushState::Unknown);
    }

    #[test]
    fn merge_prefers_store_columns() {
        let rec = record();
        let row = json!({
            "CUR_STATE": "SENDING",
            "SEND_DATE": "2023-05-01T09:30:00Z",
        });
        let merged = rec.merged_with(row.as_object().unwrap()).unwrap();
        assert_eq!(merged.state, PushState::Sending);
        assert_eq!(merged.send_date.as_deref(), Some("2023-05-01T09:30:00Z"));
        // Untouched columns survive the merge.
        assert_eq!(merged.token, "tok");
        assert_eq!(merged.title, "T");
    }
}
