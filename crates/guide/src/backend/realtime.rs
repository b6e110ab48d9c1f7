//! Realtime change feed over the Phoenix-channel websocket.
//!
//! One socket per subscription: join `realtime:public:<table>` with a
//! `postgres_changes` config, heartbeat every 30 seconds, and forward each
//! change (carrying the full row) to an `mpsc` receiver. The reader task stops
//! when the receiver is dropped or the socket closes.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::BackendError;
use super::types::{ChangeEvent, ChangeKind};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const FEED_CAPACITY: usize = 64;

/// Envelope of every Phoenix message.
#[derive(Debug, Deserialize)]
struct PhoenixMessage {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Channel topic for a table in the public schema.
fn topic(table: &str) -> String {
    format!("realtime:public:{table}")
}

/// `phx_join` message subscribing to every change on `table`.
pub(crate) fn join_message(
    table: &str,
    filter: Option<&str>,
    access_token: Option<&str>,
    msg_ref: u64,
) -> Value {
    let mut change = json!({ "event": "*", "schema": "public", "table": table });
    if let Some(filter) = filter {
        change["filter"] = Value::String(filter.to_string());
    }

    let mut payload = json!({ "config": { "postgres_changes": [change] } });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }

    json!({
        "topic": topic(table),
        "event": "phx_join",
        "payload": payload,
        "ref": msg_ref.to_string(),
    })
}

fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

/// Decode one socket frame.
///
/// Returns the change it carries, `None` for protocol chatter (replies,
/// heartbeats, presence), or an error for a rejected join.
pub(crate) fn parse_message(text: &str) -> Result<Option<ChangeEvent>, BackendError> {
    let message: PhoenixMessage = serde_json::from_str(text)?;

    match message.event.as_str() {
        "postgres_changes" => {
            let ChangePayload { data } = serde_json::from_value(message.payload)?;
            Ok(Some(ChangeEvent {
                table: data.table,
                kind: data.kind,
                record: data.record.filter(|r| !r.is_null()),
                old_record: data
                    .old_record
                    .filter(|r| r.as_object().is_some_and(|o| !o.is_empty())),
            }))
        }
        "phx_reply" | "system" | "phx_error" => {
            let status = message.payload.get("status").and_then(Value::as_str);
            if message.event == "phx_error" || status == Some("error") {
                let reason = message
                    .payload
                    .pointer("/response/reason")
                    .or_else(|| message.payload.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("channel error");
                return Err(BackendError::Realtime(reason.to_string()));
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// A realtime subscription about to be opened.
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    socket_url: Url,
    access_token: Option<String>,
}

impl RealtimeFeed {
    /// Feed on `socket_url`, authorised as the user owning `access_token`.
    #[must_use]
    pub const fn new(socket_url: Url, access_token: Option<String>) -> Self {
        Self {
            socket_url,
            access_token,
        }
    }

    /// Connect, join the table channel and spawn the reader task.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Realtime` if the socket cannot be opened or the
    /// join message cannot be sent.
    pub async fn subscribe(
        self,
        table: &str,
        filter: Option<&str>,
    ) -> Result<mpsc::Receiver<ChangeEvent>, BackendError> {
        info!(table, filter, "Connecting realtime socket");

        let (ws_stream, _) = connect_async(self.socket_url.as_str())
            .await
            .map_err(|e| BackendError::Realtime(format!("WebSocket connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let join = join_message(table, filter, self.access_token.as_deref(), 1);
        write
            .send(Message::Text(join.to_string().into()))
            .await
            .map_err(|e| BackendError::Realtime(format!("join failed: {e}")))?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let table = table.to_string();

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut next_ref: u64 = 2;

            loop {
                tokio::select! {
                    () = tx.closed() => {
                        debug!(table = %table, "Realtime receiver dropped");
                        break;
                    }
                    _ = heartbeat.tick() => {
                        let beat = heartbeat_message(next_ref);
                        next_ref += 1;
                        if let Err(e) = write.send(Message::Text(beat.to_string().into())).await {
                            error!(table = %table, error = %e, "Failed to send heartbeat");
                            break;
                        }
                    }
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => match parse_message(text.as_str()) {
                            Ok(Some(event)) => {
                                debug!(table = %table, kind = ?event.kind, "Realtime change");
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(table = %table, error = %e, "Realtime channel error");
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                error!(table = %table, error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(table = %table, "Realtime socket closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            error!(table = %table, error = %e, "Realtime socket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }

            let _ = write.send(Message::Close(None)).await;
        });

        Ok(rx)
    }
}
