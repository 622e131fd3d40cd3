use async_trait::async_trait;
use serde_json::Value;

use crate::error::PushError;

/// Push-delivery API boundary. One call per message; the provider's verdict
/// (accept or a coded rejection) is a normal outcome, not a fault.
#[async_trait]
pub trait PushGateway: Send + Sync + 'static {
    /// Deliver one message. Returns the provider's message id.
    async fn send(&self, message: &Value) -> Result<String, PushError>;
}
