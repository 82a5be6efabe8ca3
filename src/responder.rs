//! UI-Process Auto-Type Service
//!
//! The sandboxed side of the bridge: answers credential-match requests from
//! the host using the in-memory vault, and exposes the picker flow the UI
//! uses when the user selects a credential by hand.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, Result, WireError};
use crate::ipc::{
    CredentialMatchRequest, CredentialMatchResponse, IpcEndpoint, IpcHandle, IpcMessage,
    CHANNEL_AUTOTYPE_EXECUTE, CHANNEL_AUTOTYPE_TRIGGER, CHANNEL_GET_NEXT_WINDOW,
};
use crate::matcher::CredentialMatcher;

/// Serves the host's trigger requests against the decrypted vault.
pub struct AutoTypeResponder {
    matcher: CredentialMatcher,
    ipc: IpcEndpoint,
}

impl AutoTypeResponder {
    pub fn new(matcher: CredentialMatcher, ipc: IpcEndpoint) -> Self {
        Self { matcher, ipc }
    }

    /// Handle for the UI-initiated flows, usable while `run` owns the
    /// endpoint.
    pub fn picker(&self) -> PickerHandle {
        PickerHandle {
            ipc: self.ipc.handle(),
        }
    }

    /// Serve requests until the host endpoint goes away.
    pub async fn run(&mut self) {
        while let Some(message) = self.ipc.recv().await {
            self.dispatch(message).await;
        }
        debug!("host endpoint closed, auto-type responder stopping");
    }

    async fn dispatch(&self, message: IpcMessage) {
        match message.channel.as_str() {
            CHANNEL_AUTOTYPE_TRIGGER => {
                let Some(reply) = message.reply else {
                    debug!("trigger arrived without a reply handle, dropping");
                    return;
                };

                match serde_json::from_value::<CredentialMatchRequest>(message.payload) {
                    Ok(request) => {
                        // Always answer, with the empty response on no match,
                        // so the host's cycle can finish either way.
                        let response = self.matcher.match_window(&request.window_identity);
                        match serde_json::to_value(&response) {
                            Ok(payload) => reply.ok(payload).await,
                            Err(e) => {
                                reply
                                    .err(WireError::from(&BridgeError::Ipc(e.to_string())))
                                    .await
                            }
                        }
                    }
                    Err(e) => {
                        reply
                            .err(WireError::from(&BridgeError::Ipc(e.to_string())))
                            .await
                    }
                }
            }
            other => {
                debug!(channel = other, "unhandled channel on UI endpoint");
            }
        }
    }
}

/// The UI picker's host surface: query the real target window while our own
/// window has focus, then push the user's selection for injection.
#[derive(Clone)]
pub struct PickerHandle {
    ipc: IpcHandle,
}

impl PickerHandle {
    /// Identity of the window behind the credential manager's own UI.
    pub async fn next_window_identity(&self) -> Result<String> {
        let reply = self.ipc.request(CHANNEL_GET_NEXT_WINDOW, Value::Null).await?;
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Ipc("window identity reply was not a string".to_string()))
    }

    /// Ask the host to type the selected credential.
    pub async fn execute(&self, username: &str, password: &SecretString) -> Result<()> {
        let payload = serde_json::to_value(CredentialMatchResponse {
            username: Some(username.to_string()),
            password: Some(password.expose_secret().to_string()),
        })
        .map_err(|e| BridgeError::Ipc(e.to_string()))?;
        self.ipc.send(CHANNEL_AUTOTYPE_EXECUTE, payload).await
    }
}
