use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::driver::{
    DriverEvent, DriverHandle, OutputParam, ProcParam, ProcedureResult, Row, SqlConnection,
    SqlDriver, SqlValue, StatementResult,
};
use crate::config::DatabaseConfig;
use crate::error::DbError;

/// In-memory store backend for local development and tests.
///
/// Holds the notification table as plain rows and implements the two
/// procedures the service calls, plus the narrow statement surface the
/// dispatcher emits (`UPDATE TOP(1) … SET k = 'v' | GETDATE() … WHERE IDX`
/// followed by a `SELECT TOP 1` of the same row). Any other statement is
/// recorded and returns no rows. The live connection can be severed on
/// demand so reconnect behaviour is testable.
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<Row>,
    archived: Vec<Row>,
    statements: Vec<String>,
    procedures: Vec<String>,
    connect_error: Option<String>,
    feed: Option<mpsc::Sender<DriverEvent>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Insert a notification row. Non-object values are ignored.
    pub fn seed(&self, row: Value) {
        if let Value::Object(row) = row {
            if let Ok(mut state) = self.state.lock() {
                state.rows.push(row);
            }
        }
    }

    pub fn rows(&self) -> Vec<Row> {
        self.state.lock().map(|s| s.rows.clone()).unwrap_or_default()
    }

    pub fn row(&self, idx: &str) -> Option<Row> {
        self.state
            .lock()
            .ok()?
            .rows
            .iter()
            .find(|row| row.get("IDX").and_then(Value::as_str) == Some(idx))
            .cloned()
    }

    pub fn archived(&self) -> Vec<Row> {
        self.state
            .lock()
            .map(|s| s.archived.clone())
            .unwrap_or_default()
    }

    /// Statements executed so far, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.statements.clone())
            .unwrap_or_default()
    }

    pub fn procedures(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.procedures.clone())
            .unwrap_or_default()
    }

    /// Make the next connect attempt fail with the given message.
    pub fn fail_next_connect(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.connect_error = Some(message.to_string());
        }
    }

    /// Drop the live connection, as a network fault would.
    pub fn sever(&self) {
        let feed = match self.state.lock() {
            Ok(mut state) => state.feed.take(),
            Err(_) => None,
        };
        if let Some(feed) = feed {
            let _ = feed.try_send(DriverEvent::Closed);
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlDriver for MemoryDriver {
    async fn connect(&self, _config: &DatabaseConfig) -> Result<DriverHandle, DbError> {
        let (tx, rx) = mpsc::channel(4);
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| DbError::Connect("memory driver state poisoned".to_string()))?;
            if let Some(message) = state.connect_error.take() {
                return Err(DbError::Connect(message));
            }
            state.feed = Some(tx);
        }
        Ok(DriverHandle {
            connection: Arc::new(MemoryConnection {
                state: self.state.clone(),
            }),
            events: rx,
        })
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    async fn call_procedure(
        &self,
        name: &str,
        params: &[ProcParam],
        _output_params: &[OutputParam],
    ) -> Result<ProcedureResult, DbError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DbError::Execution("memory driver state poisoned".to_string()))?;
        state.procedures.push(name.to_string());

        match name {
            "Proc_MODULE_Get_Init_Data" => {
                let module_id = params
                    .iter()
                    .find(|p| p.name == "MODULE_ID")
                    .map(|p| match p.value {
                        SqlValue::TinyInt(v) => i64::from(v),
                        SqlValue::Int(v) => v,
                        _ => -1,
                    });
                let mut handed_out = Vec::new();
                for row in state.rows.iter_mut() {
                    if row.get("CUR_STATE").and_then(Value::as_str) != Some("INIT") {
                        continue;
                    }
                    if let (Some(want), Some(have)) =
                        (module_id, row.get("MODULE_ID").and_then(Value::as_i64))
                    {
                        if want != have {
                            continue;
                        }
                    }
                    row.insert("CUR_STATE".to_string(), Value::String("READY".to_string()));
                    handed_out.push(row.clone());
                }
                Ok(ProcedureResult {
                    return_values: Row::new(),
                    rows: handed_out,
                })
            }
            "Proc_MODULE_Log_Process" => {
                let (done, live): (Vec<Row>, Vec<Row>) = state
                    .rows
                    .drain(..)
                    .partition(|row| row.get("CUR_STATE").and_then(Value::as_str) == Some("DONE"));
                let moved = done.len();
                state.rows = live;
                state.archived.extend(done);
                let mut return_values = Row::new();
                return_values.insert("MOVED".to_string(), Value::from(moved as u64));
                Ok(ProcedureResult {
                    return_values,
                    rows: Vec::new(),
                })
            }
            other => Err(DbError::Execution(format!("unknown procedure: {other}"))),
        }
    }

    async fn execute(&self, sql: &str) -> Result<StatementResult, DbError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DbError::Execution("memory driver state poisoned".to_string()))?;
        state.statements.push(sql.to_string());

        if sql.trim_start().starts_with("UPDATE TOP(1)") {
            return apply_update_batch(&mut state, sql);
        }
        Ok(StatementResult { rows: Vec::new() })
    }
}

fn apply_update_batch(state: &mut MemoryState, sql: &str) -> Result<StatementResult, DbError> {
    let set_start = sql
        .find(" SET ")
        .ok_or_else(|| DbError::Execution(format!("unparsable update: {sql}")))?;
    let where_start = sql[set_start..]
        .find(" WHERE ")
        .map(|i| set_start + i)
        .ok_or_else(|| DbError::Execution(format!("unparsable update: {sql}")))?;
    let assignments = parse_assignments(&sql[set_start + 5..where_start])?;

    let idx_marker = "IDX = '";
    let idx_at = sql[where_start..]
        .find(idx_marker)
        .map(|i| where_start + i + idx_marker.len())
        .ok_or_else(|| DbError::Execution(format!("unparsable update: {sql}")))?;
    let (idx, _) = parse_quoted(&sql[idx_at..])
        .ok_or_else(|| DbError::Execution(format!("unparsable update: {sql}")))?;

    let row = state
        .rows
        .iter_mut()
        .find(|row| row.get("IDX").and_then(Value::as_str) == Some(idx.as_str()));
    let Some(row) = row else {
        return Ok(StatementResult { rows: Vec::new() });
    };
    for (column, value) in assignments {
        row.insert(column, value);
    }
    Ok(StatementResult {
        rows: vec![row.clone()],
    })
}

fn parse_assignments(section: &str) -> Result<Vec<(String, Value)>, DbError> {
    let mut out = Vec::new();
    let mut rest = section.trim();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| DbError::Execution(format!("unparsable assignment: {rest}")))?;
        let column = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(stripped) = rest.strip_prefix('\'') {
            let (text, after) = parse_quoted(stripped)
                .ok_or_else(|| DbError::Execution(format!("unterminated string: {rest}")))?;
            value = Value::String(text);
            rest = after;
        } else if let Some(after) = rest.strip_prefix("GETDATE()") {
            value = Value::String(chrono::Utc::now().to_rfc3339());
            rest = after;
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let raw = rest[..end].trim();
            value = raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string()));
            rest = &rest[end..];
        }

        out.push((column, value));
        rest = rest.trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }
    Ok(out)
}

/// Scan a single-quoted SQL string body (`''` escapes a quote). Expects the
/// opening quote to be consumed already; returns the value and the remainder
/// after the closing quote.
fn parse_quoted(s: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
            continue;
        }
        if let Some((_, '\'')) = chars.peek() {
            chars.next();
            value.push('\'');
            continue;
        }
        return Some((value, &s[i + 1..]));
    }
    None
}
