use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::PushConfig;
use crate::error::PushError;

use super::gateway::PushGateway;

/// FCM v1 HTTP client.
///
/// Posts to `projects/{project}/messages:send` with the configured bearer
/// credential and translates v1 error codes into the `messaging/...` result
/// codes recorded against the notification row.
pub struct FcmClient {
    http: reqwest::Client,
    endpoint: String,
    bearer_token: String,
}

impl FcmClient {
    pub fn new(config: &PushConfig) -> Result<Self, PushError> {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://fcm.googleapis.com/v1/projects/{}/messages:send",
                config.project_id
            )
        });
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| PushError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl PushGateway for FcmClient {
    async fn send(&self, message: &Value) -> Result<String, PushError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.bearer_token)
            .json(&json!({ "message": message }))
            .send()
            .await
            .map_err(|err| PushError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| PushError::Transport(err.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({}));

        if status.is_success() {
            let name = body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(name)
        } else {
            Err(provider_error(&body))
        }
    }
}

fn provider_error(body: &Value) -> PushError {
    let error = body.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("request rejected")
        .to_string();

    // v1 puts the FCM-specific code in error.details[].errorCode; the
    // canonical status is the fallback.
    let raw = error
        .and_then(|e| e.get("details"))
        .and_then(Value::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|d| d.get("errorCode").and_then(Value::as_str))
        })
        .or_else(|| error.and_then(|e| e.get("status")).and_then(Value::as_str))
        .unwrap_or("");

    PushError::Provider {
        code: messaging_code(raw),
        message,
    }
}

/// FCM v1 error code to the `messaging/...` strings the admin SDKs expose.
fn messaging_code(raw: &str) -> String {
    match raw {
        "UNREGISTERED" => "messaging/registration-token-not-registered",
        "INVALID_ARGUMENT" => "messaging/invalid-argument",
        "SENDER_ID_MISMATCH" => "messaging/mismatched-credential",
        "QUOTA_EXCEEDED" => "messaging/message-rate-exceeded",
        "UNAVAILABLE" => "messaging/server-unavailable",
        "INTERNAL" => "messaging/internal-error",
        "THIRD_PARTY_AUTH_ERROR" => "messaging/third-party-auth-error",
        _ => "messaging/unknown-error",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn maps_known_error_codes() {
        assert_eq!(
            messaging_code("UNREGISTERED"),
            "messaging/registration-token-not-registered"
        );
        assert_eq!(messaging_code("QUOTA_EXCEEDED"), "messaging/message-rate-exceeded");
        assert_eq!(messaging_code("NO_SUCH_CODE"), "messaging/unknown-error");
    }

    #[test]
    fn prefers_detail_error_code_over_status() {
        let body = json!({
            "error": {
                "status": "NOT_FOUND",
                "message": "Requested entity was not found.",
                "details": [
                    { "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError", "errorCode": "UNREGISTERED" }
                ]
            }
        });
        match provider_error(&body) {
            PushError::Provider { code, message } => {
                assert_eq!(code, "messaging/registration-token-not-registered");
                assert_eq!(message, "Requested entity was not found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unparsable_bodies_fall_back_to_unknown() {
        match provider_error(&json!({})) {
            PushError::Provider { code, .. } => assert_eq!(code, "messaging/unknown-error"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn derives_endpoint_from_project_id() {
        let config = PushConfig {
            project_id: "acme-app".to_string(),
            ..Default::default()
        };
        let client = FcmClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint,
            "https://fcm.googleapis.com/v1/projects/acme-app/messages:send"
        );
    }
}
