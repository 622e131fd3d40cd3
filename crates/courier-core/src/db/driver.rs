use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::DatabaseConfig;
use crate::error::DbError;

/// A result row: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Typed procedure parameter values, mirroring the store driver's type set.
#[derive(Debug, Clone)]
pub enum SqlValue {
    TinyInt(u8),
    Int(i64),
    VarChar(String),
    Bit(bool),
}

#[derive(Debug, Clone)]
pub struct ProcParam {
    pub name: String,
    pub value: SqlValue,
}

impl ProcParam {
    pub fn tiny_int(name: &str, value: u8) -> Self {
        Self {
            name: name.to_string(),
            value: SqlValue::TinyInt(value),
        }
    }

    pub fn int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: SqlValue::Int(value),
        }
    }

    pub fn varchar(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: SqlValue::VarChar(value.to_string()),
        }
    }
}

/// Declared output parameter with the default used when the procedure does
/// not return it.
#[derive(Debug, Clone)]
pub struct OutputParam {
    pub name: String,
    pub default: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ProcedureResult {
    pub return_values: Row,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    pub rows: Vec<Row>,
}

/// Out-of-band events from a live connection.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// Server-side error. Log-only; the connection may still be usable.
    Error(String),
    /// The connection ended. Drives the session offline.
    Closed,
}

/// A successfully established connection plus its event feed.
pub struct DriverHandle {
    pub connection: std::sync::Arc<dyn SqlConnection>,
    pub events: mpsc::Receiver<DriverEvent>,
}

/// Vendor driver boundary. The store's wire protocol lives behind this; the
/// service never sees past it.
#[async_trait]
pub trait SqlDriver: Send + Sync + 'static {
    /// Open a fresh connection. Resolves once the connection is usable.
    async fn connect(&self, config: &DatabaseConfig) -> Result<DriverHandle, DbError>;
}

/// A single live connection. Exclusively owned by the command queue; no
/// other component touches it directly.
#[async_trait]
pub trait SqlConnection: Send + Sync + 'static {
    async fn call_procedure(
        &self,
        name: &str,
        params: &[ProcParam],
        output_params: &[OutputParam],
    ) -> Result<ProcedureResult, DbError>;

    async fn execute(&self, sql: &str) -> Result<StatementResult, DbError>;
}
