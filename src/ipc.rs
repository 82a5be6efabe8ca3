//! Host/UI Channel Transport
//!
//! Asynchronous bidirectional message transport between the privileged host
//! process and the sandboxed UI process. Channels are named; requests get at
//! most one response, correlated by channel name with one outstanding call
//! per channel. A response that arrives with no matching outstanding request
//! is discarded.
//!
//! The in-process transport here runs both endpoints over paired tokio
//! channels. Frames are plain serde values, so the same protocol can ride an
//! actual process boundary unchanged.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{BridgeError, Result, WireError};

/// Host→UI request carrying the focused window identity; the UI answers with
/// a [`CredentialMatchResponse`].
pub const CHANNEL_AUTOTYPE_TRIGGER: &str = "autotype:trigger";

/// UI→host one-way send with a (username, password) payload; triggers
/// injection into the focused window.
pub const CHANNEL_AUTOTYPE_EXECUTE: &str = "autotype:execute";

/// UI→host request/response returning the identity of the window behind the
/// active one.
pub const CHANNEL_GET_NEXT_WINDOW: &str = "autotype:get_next_window";

/// Frame capacity of each direction of the transport.
const FRAME_BUFFER: usize = 32;

/// Asks the UI process to resolve a window identity to a credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialMatchRequest {
    pub window_identity: String,
}

impl fmt::Debug for CredentialMatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The identity names whatever the user is focused on. Keep it out of
        // Debug output so it can never reach a log line.
        f.debug_struct("CredentialMatchRequest")
            .field("window_identity", &"<redacted>")
            .finish()
    }
}

/// The UI process answer. Both fields absent means "no match".
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialMatchResponse {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialMatchResponse {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

impl fmt::Debug for CredentialMatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMatchResponse")
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything that moves between the endpoints.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Request { channel: String, payload: Value },
    Response {
        channel: String,
        result: std::result::Result<Value, WireError>,
    },
    Event { channel: String, payload: Value },
}

/// An inbound request or event taken off an endpoint.
pub struct IpcMessage {
    pub channel: String,
    pub payload: Value,
    /// Present for requests, absent for one-way events.
    pub reply: Option<IpcResponder>,
}

impl fmt::Debug for IpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads may carry credentials; only the channel is printable.
        f.debug_struct("IpcMessage")
            .field("channel", &self.channel)
            .field("payload", &"<redacted>")
            .field("reply", &self.reply.is_some())
            .finish()
    }
}

/// One-shot reply handle for an inbound request.
pub struct IpcResponder {
    channel: String,
    outbound: mpsc::Sender<Frame>,
}

impl fmt::Debug for IpcResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcResponder")
            .field("channel", &self.channel)
            .finish()
    }
}

impl IpcResponder {
    /// Answer the request with a payload.
    pub async fn ok(self, payload: Value) {
        self.finish(Ok(payload)).await;
    }

    /// Answer the request with a serialized error.
    pub async fn err(self, error: WireError) {
        self.finish(Err(error)).await;
    }

    async fn finish(self, result: std::result::Result<Value, WireError>) {
        let frame = Frame::Response {
            channel: self.channel,
            result,
        };
        // A closed peer means the other process is gone; nothing to do.
        let _ = self.outbound.send(frame).await;
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<std::result::Result<Value, WireError>>>>>;

/// Cloneable sending half of an endpoint.
#[derive(Clone)]
pub struct IpcHandle {
    outbound: mpsc::Sender<Frame>,
    pending: PendingMap,
}

impl IpcHandle {
    /// One-way send on a named channel.
    pub async fn send(&self, channel: &str, payload: Value) -> Result<()> {
        self.outbound
            .send(Frame::Event {
                channel: channel.to_string(),
                payload,
            })
            .await
            .map_err(|_| BridgeError::Ipc("peer endpoint closed".to_string()))
    }

    /// Send a request and await exactly one response.
    ///
    /// Only one call may be outstanding per channel; a second concurrent
    /// call on the same channel fails instead of queueing.
    pub async fn request(&self, channel: &str, payload: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            if pending.contains_key(channel) {
                return Err(BridgeError::Ipc(format!(
                    "a request is already outstanding on channel {channel}"
                )));
            }
            pending.insert(channel.to_string(), tx);
        }

        let sent = self
            .outbound
            .send(Frame::Request {
                channel: channel.to_string(),
                payload,
            })
            .await;
        if sent.is_err() {
            self.pending.lock().unwrap().remove(channel);
            return Err(BridgeError::Ipc("peer endpoint closed".to_string()));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(wire)) => Err(BridgeError::from(wire)),
            Err(_) => Err(BridgeError::Ipc(format!(
                "channel {channel} closed before a response arrived"
            ))),
        }
    }
}

/// One side of the transport: a sending handle plus the inbound queue.
pub struct IpcEndpoint {
    handle: IpcHandle,
    inbound: mpsc::Receiver<IpcMessage>,
}

impl IpcEndpoint {
    /// Cloneable sending half, usable while another owner drains `recv`.
    pub fn handle(&self) -> IpcHandle {
        self.handle.clone()
    }

    /// Next inbound request/event. `None` once the peer endpoint is gone.
    pub async fn recv(&mut self) -> Option<IpcMessage> {
        self.inbound.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv) for polling loops.
    pub fn try_recv(&mut self) -> Option<IpcMessage> {
        self.inbound.try_recv().ok()
    }

    pub async fn send(&self, channel: &str, payload: Value) -> Result<()> {
        self.handle.send(channel, payload).await
    }

    pub async fn request(&self, channel: &str, payload: Value) -> Result<Value> {
        self.handle.request(channel, payload).await
    }
}

/// Build a connected pair of endpoints: `(host, ui)`.
///
/// Spawns one demultiplexer task per endpoint, so this must be called from
/// within a tokio runtime.
pub fn channel() -> (IpcEndpoint, IpcEndpoint) {
    let (to_ui, from_host) = mpsc::channel(FRAME_BUFFER);
    let (to_host, from_ui) = mpsc::channel(FRAME_BUFFER);

    let host = endpoint("host", to_ui, from_ui);
    let ui = endpoint("ui", to_host, from_host);
    (host, ui)
}

fn endpoint(
    side: &'static str,
    outbound: mpsc::Sender<Frame>,
    raw_inbound: mpsc::Receiver<Frame>,
) -> IpcEndpoint {
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);

    tokio::spawn(demux(
        side,
        raw_inbound,
        Arc::clone(&pending),
        inbound_tx,
        outbound.clone(),
    ));

    IpcEndpoint {
        handle: IpcHandle { outbound, pending },
        inbound: inbound_rx,
    }
}

/// Routes responses to their waiting request and queues everything else for
/// the endpoint owner.
async fn demux(
    side: &'static str,
    mut raw_inbound: mpsc::Receiver<Frame>,
    pending: PendingMap,
    inbound_tx: mpsc::Sender<IpcMessage>,
    outbound: mpsc::Sender<Frame>,
) {
    while let Some(frame) = raw_inbound.recv().await {
        match frame {
            Frame::Response { channel, result } => {
                let waiter = pending.lock().unwrap().remove(&channel);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!(
                            side,
                            channel = %channel,
                            "discarding response with no outstanding request"
                        );
                    }
                }
            }
            Frame::Request { channel, payload } => {
                let message = IpcMessage {
                    reply: Some(IpcResponder {
                        channel: channel.clone(),
                        outbound: outbound.clone(),
                    }),
                    channel,
                    payload,
                };
                if inbound_tx.send(message).await.is_err() {
                    break;
                }
            }
            Frame::Event { channel, payload } => {
                let message = IpcMessage {
                    channel,
                    payload,
                    reply: None,
                };
                if inbound_tx.send(message).await.is_err() {
                    break;
                }
            }
        }
    }

    // Peer gone: wake every waiter with a closed-channel error.
    pending.lock().unwrap().clear();
    debug!(side, "ipc endpoint closed");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let (host, mut ui) = channel();

        let server = tokio::spawn(async move {
            let msg = ui.recv().await.expect("request arrives");
            assert_eq!(msg.channel, CHANNEL_AUTOTYPE_TRIGGER);
            msg.reply.unwrap().ok(json!({"username": "alice"})).await;
        });

        let reply = host
            .request(CHANNEL_AUTOTYPE_TRIGGER, json!({"window_identity": "x"}))
            .await
            .unwrap();
        assert_eq!(reply["username"], "alice");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_one_outstanding_request_per_channel() {
        let (host, _ui) = channel();

        let handle = host.handle();
        let first = tokio::spawn(async move {
            // Never answered; parks as the outstanding call.
            let _ = handle.request(CHANNEL_GET_NEXT_WINDOW, Value::Null).await;
        });
        tokio::task::yield_now().await;

        let second = host.request(CHANNEL_GET_NEXT_WINDOW, Value::Null).await;
        assert!(matches!(second, Err(BridgeError::Ipc(_))));
        first.abort();
    }

    #[tokio::test]
    async fn test_stray_response_is_discarded() {
        let (mut host, ui) = channel();

        // Hand-craft a response nobody asked for.
        ui.handle()
            .outbound
            .send(Frame::Response {
                channel: CHANNEL_AUTOTYPE_TRIGGER.to_string(),
                result: Ok(Value::Null),
            })
            .await
            .unwrap();

        // The stray response must not surface as an inbound message, and the
        // endpoint must still work afterwards.
        ui.send(CHANNEL_AUTOTYPE_EXECUTE, json!({"username": "a", "password": "b"}))
            .await
            .unwrap();
        let next = host.recv().await.expect("event still arrives");
        assert_eq!(next.channel, CHANNEL_AUTOTYPE_EXECUTE);
        assert!(next.reply.is_none());
    }

    #[tokio::test]
    async fn test_request_fails_once_peer_is_gone() {
        let (host, ui) = channel();
        drop(ui);
        // Give the demux task a moment to observe the closed peer.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let result = host.request(CHANNEL_GET_NEXT_WINDOW, Value::Null).await;
        assert!(matches!(result, Err(BridgeError::Ipc(_))));
    }

    #[test]
    fn test_match_payloads_redact_debug_output() {
        let request = CredentialMatchRequest {
            window_identity: "https://example.com".to_string(),
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("example.com"));

        let response = CredentialMatchResponse {
            username: Some("alice".to_string()),
            password: Some("p1".to_string()),
        };
        let rendered = format!("{:?}", response);
        assert!(!rendered.contains("alice"));
        assert!(!rendered.contains("p1"));
    }
}
