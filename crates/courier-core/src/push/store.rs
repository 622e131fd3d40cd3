use std::sync::Arc;

use crate::alert::AlertSink;
use crate::db::{CommandOptions, CommandQueue};
use crate::error::DbError;

use super::queue::PushQueue;
use super::record::PushRecord;

const TABLE: &str = "[dbo].[Tbl_Push_Data]";

/// The single mutation path for persisted record fields.
///
/// Each update writes the row and re-reads it in the same batch, then merges
/// the authoritative row back over the cached copy, so memory never drifts
/// from what was actually persisted.
pub struct RecordStore {
    commands: Arc<CommandQueue>,
    queue: Arc<PushQueue>,
    alert: Arc<dyn AlertSink>,
}

impl RecordStore {
    pub fn new(commands: Arc<CommandQueue>, queue: Arc<PushQueue>, alert: Arc<dyn AlertSink>) -> Self {
        Self {
            commands,
            queue,
            alert,
        }
    }

    pub async fn update(&self, record: &PushRecord, set_clause: &str) -> Result<(), DbError> {
        let idx = sql_quote(&record.idx);
        let sql = format!(
            "UPDATE TOP(1) {TABLE} SET {set_clause} WHERE IDX = '{idx}'\n\
             SELECT TOP 1 * FROM {TABLE} WHERE IDX = '{idx}'"
        );

        match self.commands.execute(&sql, CommandOptions::quiet()).await {
            Ok(result) => {
                if let Some(row) = result.rows.first() {
                    match record.merged_with(row) {
                        Ok(merged) => self.queue.replace(&record.idx, merged),
                        Err(err) => {
                            tracing::warn!(record = %record.idx, error = %err, "row merge failed");
                        }
                    }
                }
                tracing::info!(record = %record.idx, set = set_clause, "updated");
                Ok(())
            }
            Err(err) => {
                tracing::error!(record = %record.idx, set = set_clause, error = %err, "update failed");
                self.alert.alert("record-store", &err.to_string());
                Err(err)
            }
        }
    }
}

/// Double embedded quotes so values are safe inside a single-quoted literal.
pub(crate) fn sql_quote(value: &str) -> String {
    value.replace('\'', "''")
}
