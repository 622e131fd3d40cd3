mod driver;
mod memory;
mod queue;
mod session;

pub use driver::{
    DriverEvent, DriverHandle, OutputParam, ProcParam, ProcedureResult, Row, SqlConnection,
    SqlDriver, SqlValue, StatementResult,
};
pub use memory::MemoryDriver;
pub use queue::{CommandOptions, CommandQueue, DRAIN_TASK, HIBERNATE_TASK};
pub use session::{follow_connectivity, DbSession, SessionEvent, RECONNECT_TASK};
