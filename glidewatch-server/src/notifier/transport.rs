//! OneBot v11 action calls over WebSocket.
//!
//! Each call opens a short-lived connection, sends one action frame and waits
//! for the first reply that is not an event push.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::config::Target;
use crate::error::NotifyError;

static ECHO_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where and how to reach the OneBot implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub access_token: Option<String>,
}

/// Outbound action frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneBotRequest {
    pub action: String,
    pub params: Value,
    pub echo: String,
}

impl OneBotRequest {
    pub fn group(group_id: i64, message: &str) -> Self {
        Self {
            action: "send_group_msg".to_string(),
            params: json!({ "group_id": group_id, "message": message }),
            echo: next_echo("group"),
        }
    }

    pub fn private(user_id: i64, message: &str) -> Self {
        Self {
            action: "send_private_msg".to_string(),
            params: json!({ "user_id": user_id, "message": message }),
            echo: next_echo("private"),
        }
    }

    pub fn for_target(target: Target, message: &str) -> Self {
        match target {
            Target::Group(id) => Self::group(id, message),
            Target::Private(id) => Self::private(id, message),
        }
    }
}

fn next_echo(kind: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = ECHO_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{kind}_{millis}_{seq}")
}

/// Action reply. OneBot implementations disagree on which fields they fill,
/// so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneBotResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub retcode: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub echo: Option<String>,
}

impl OneBotResponse {
    /// Parse a text frame. Returns `Ok(None)` for event pushes (frames with a
    /// `post_type`), which are not replies.
    pub fn parse(text: &str) -> Result<Option<Self>, NotifyError> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("post_type").is_some() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// `status` decides when present, then `retcode`. A reply with neither
    /// counts as delivered.
    pub fn into_result(self) -> Result<(), NotifyError> {
        if let Some(status) = self.status {
            if status == "ok" {
                return Ok(());
            }
            return Err(NotifyError::Rejected(
                self.msg.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        if let Some(retcode) = self.retcode {
            if retcode == 0 {
                return Ok(());
            }
            return Err(NotifyError::Rejected(
                self.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
pub trait OneBotTransport: Send + Sync {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: OneBotRequest,
    ) -> Result<OneBotResponse, NotifyError>;
}

/// One connection per call via tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl OneBotTransport for WsTransport {
    async fn call(
        &self,
        endpoint: &Endpoint,
        request: OneBotRequest,
    ) -> Result<OneBotResponse, NotifyError> {
        let mut handshake = endpoint.url.as_str().into_client_request()?;
        if let Some(token) = endpoint.access_token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| NotifyError::InvalidEndpoint(e.to_string()))?;
            handshake.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(handshake).await?;
        let (mut write, mut read) = stream.split();

        let frame = serde_json::to_string(&request)?;
        trace!(action = %request.action, echo = %request.echo, "Sending OneBot action");
        write.send(Message::Text(frame)).await?;

        while let Some(message) = read.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            debug!(response = %text, "OneBot reply");
            let Some(response) = OneBotResponse::parse(&text)? else {
                continue;
            };
            if response
                .echo
                .as_deref()
                .is_some_and(|echo| echo != request.echo)
            {
                continue;
            }
            let _ = write.send(Message::Close(None)).await;
            return Ok(response);
        }
        Err(NotifyError::Closed)
    }
}
