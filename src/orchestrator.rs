//! Auto-Type Orchestration
//!
//! Owns the trigger→match→inject cycle on the host side: capture the focused
//! window identity, ask the UI process for a matching credential, and type
//! the result. One cycle runs at a time; a trigger that lands mid-cycle is
//! ignored so keystrokes can never land in a window the user already left.

use std::sync::{Arc, Mutex};

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HotkeyConfig;
use crate::error::{BridgeError, Result};
use crate::ipc::{CredentialMatchRequest, CredentialMatchResponse, IpcHandle, CHANNEL_AUTOTYPE_TRIGGER};
use crate::native::{TextInjector, WindowInspector};

/// Which window the trigger flow targets. Selected by the caller; the
/// orchestrator never falls back from one to the other on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowQueryMode {
    /// The window with current OS focus.
    #[default]
    Active,
    /// The window one level down the activation stack. Used when the focus
    /// target is transiently the credential manager's own UI.
    BehindActive,
}

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    HotkeyTriggered,
    AwaitingWindowIdentity,
    AwaitingMatch,
    Injecting,
}

/// How a trigger ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A credential was typed into the target window.
    Injected,
    /// Nothing in the vault matched; no keystrokes were produced.
    NoMatch,
    /// Another cycle was already running; this trigger was dropped.
    Ignored,
}

/// Host-side driver of the auto-type sequence.
pub struct AutoTypeOrchestrator {
    windows: Arc<dyn WindowInspector>,
    injector: Arc<dyn TextInjector>,
    ipc: IpcHandle,
    mode: WindowQueryMode,
    phase: Mutex<CyclePhase>,
}

impl AutoTypeOrchestrator {
    pub fn new(
        windows: Arc<dyn WindowInspector>,
        injector: Arc<dyn TextInjector>,
        ipc: IpcHandle,
        mode: WindowQueryMode,
    ) -> Self {
        Self {
            windows,
            injector,
            ipc,
            mode,
            phase: Mutex::new(CyclePhase::Idle),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().unwrap()
    }

    /// Run one full cycle in response to the global hotkey.
    pub async fn handle_trigger(&self) -> Result<CycleOutcome> {
        if !self.begin_cycle() {
            debug!("trigger ignored, a cycle is already in flight");
            return Ok(CycleOutcome::Ignored);
        }

        let outcome = self.run_cycle().await;
        self.set_phase(CyclePhase::Idle);
        outcome
    }

    /// Inject a credential the UI process picked directly (the in-app picker
    /// flow). Dropped when a hotkey cycle is already running.
    pub async fn handle_execute(&self, response: CredentialMatchResponse) -> Result<CycleOutcome> {
        if response.is_empty() {
            return Ok(CycleOutcome::NoMatch);
        }
        if !self.begin_cycle() {
            debug!("execute request ignored, a cycle is already in flight");
            return Ok(CycleOutcome::Ignored);
        }

        self.set_phase(CyclePhase::Injecting);
        let result = self.inject(response).await;
        self.set_phase(CyclePhase::Idle);
        result.map(|_| CycleOutcome::Injected)
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.set_phase(CyclePhase::AwaitingWindowIdentity);
        let identity = match self.mode {
            WindowQueryMode::Active => self.windows.active_window_identity().await?,
            WindowQueryMode::BehindActive => self.windows.window_behind_active().await?,
        };

        self.set_phase(CyclePhase::AwaitingMatch);
        let request = CredentialMatchRequest {
            window_identity: identity,
        };
        let payload = serde_json::to_value(&request)
            .map_err(|e| BridgeError::Ipc(e.to_string()))?;
        let reply = self.ipc.request(CHANNEL_AUTOTYPE_TRIGGER, payload).await?;
        let response: CredentialMatchResponse =
            serde_json::from_value(reply).map_err(|e| BridgeError::Ipc(e.to_string()))?;

        if response.is_empty() {
            debug!("no credential matched the focused window");
            return Ok(CycleOutcome::NoMatch);
        }

        self.set_phase(CyclePhase::Injecting);
        self.inject(response).await?;
        info!("auto-type cycle complete");
        Ok(CycleOutcome::Injected)
    }

    /// Type whatever fields the match produced: both as a pair, a single
    /// field on its own.
    async fn inject(&self, response: CredentialMatchResponse) -> Result<()> {
        match (response.username, response.password) {
            (Some(username), Some(password)) => {
                self.injector
                    .inject_credential_pair(&username, &SecretString::from(password))
                    .await
            }
            (Some(username), None) => {
                self.injector
                    .inject_text(&SecretString::from(username))
                    .await
            }
            (None, Some(password)) => {
                self.injector
                    .inject_text(&SecretString::from(password))
                    .await
            }
            (None, None) => Ok(()),
        }
    }

    fn begin_cycle(&self) -> bool {
        let mut phase = self.phase.lock().unwrap();
        if *phase == CyclePhase::Idle {
            *phase = CyclePhase::HotkeyTriggered;
            true
        } else {
            false
        }
    }

    fn set_phase(&self, next: CyclePhase) {
        *self.phase.lock().unwrap() = next;
    }
}

/// The registered global hotkey. Dropping the binding releases the OS-wide
/// chord.
pub struct HotkeyBinding {
    manager: GlobalHotKeyManager,
    hotkey: HotKey,
}

impl HotkeyBinding {
    /// Register the configured chord with the OS.
    pub fn register(config: &HotkeyConfig) -> Result<Self> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| BridgeError::HotkeyRegistration(e.to_string()))?;
        let hotkey = config.to_hotkey();
        manager
            .register(hotkey)
            .map_err(|e| BridgeError::HotkeyRegistration(e.to_string()))?;
        Ok(Self { manager, hotkey })
    }

    /// Drain pending hotkey events; true when our chord was pressed.
    pub fn try_recv_pressed(&self) -> bool {
        let mut pressed = false;
        while let Ok(event) = GlobalHotKeyEvent::receiver().try_recv() {
            if event.id == self.hotkey.id() && event.state == HotKeyState::Pressed {
                pressed = true;
            }
        }
        pressed
    }
}

impl Drop for HotkeyBinding {
    fn drop(&mut self) {
        let _ = self.manager.unregister(self.hotkey);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::ipc::{self, CHANNEL_AUTOTYPE_TRIGGER};
    use crate::native::mock::MockNative;

    fn orchestrator(
        native: &Arc<MockNative>,
        ipc: IpcHandle,
        mode: WindowQueryMode,
    ) -> AutoTypeOrchestrator {
        AutoTypeOrchestrator::new(
            Arc::clone(native) as Arc<dyn WindowInspector>,
            Arc::clone(native) as Arc<dyn TextInjector>,
            ipc,
            mode,
        )
    }

    /// Answer one trigger request with a fixed response.
    fn answer_trigger(mut ui: ipc::IpcEndpoint, response: CredentialMatchResponse) {
        tokio::spawn(async move {
            while let Some(msg) = ui.recv().await {
                if msg.channel == CHANNEL_AUTOTYPE_TRIGGER {
                    let payload = serde_json::to_value(&response).unwrap();
                    msg.reply.unwrap().ok(payload).await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_trigger_injects_matched_credential() {
        let native = Arc::new(MockNative::new());
        let (host, ui) = ipc::channel();
        let orchestrator = orchestrator(&native, host.handle(), WindowQueryMode::Active);

        answer_trigger(
            ui,
            CredentialMatchResponse {
                username: Some("alice".to_string()),
                password: Some("p1".to_string()),
            },
        );

        let outcome = orchestrator.handle_trigger().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Injected);
        assert_eq!(
            native.injected_pairs.lock().unwrap().as_slice(),
            &[("alice".to_string(), "p1".to_string())]
        );
        assert_eq!(orchestrator.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_no_match_is_a_silent_no_op() {
        let native = Arc::new(MockNative::new());
        let (host, ui) = ipc::channel();
        let orchestrator = orchestrator(&native, host.handle(), WindowQueryMode::Active);

        answer_trigger(ui, CredentialMatchResponse::default());

        let outcome = orchestrator.handle_trigger().await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoMatch);
        assert!(native.injected_pairs.lock().unwrap().is_empty());
        assert!(native.injected_text.lock().unwrap().is_empty());
        assert_eq!(orchestrator.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_password_only_match_types_single_field() {
        let native = Arc::new(MockNative::new());
        let (host, ui) = ipc::channel();
        let orchestrator = orchestrator(&native, host.handle(), WindowQueryMode::Active);

        answer_trigger(
            ui,
            CredentialMatchResponse {
                username: None,
                password: Some("p1".to_string()),
            },
        );

        let outcome = orchestrator.handle_trigger().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Injected);
        assert!(native.injected_pairs.lock().unwrap().is_empty());
        assert_eq!(
            native.injected_text.lock().unwrap().as_slice(),
            &["p1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_behind_active_mode_queries_the_next_window() {
        let native = Arc::new(MockNative::new());
        let (host, mut ui) = ipc::channel();
        let orchestrator =
            orchestrator(&native, host.handle(), WindowQueryMode::BehindActive);

        let seen = tokio::spawn(async move {
            let msg = ui.recv().await.unwrap();
            let request: CredentialMatchRequest =
                serde_json::from_value(msg.payload.clone()).unwrap();
            msg.reply
                .unwrap()
                .ok(serde_json::to_value(CredentialMatchResponse::default()).unwrap())
                .await;
            request.window_identity
        });

        orchestrator.handle_trigger().await.unwrap();
        assert_eq!(seen.await.unwrap(), "Sign in - Aurora Mail");
    }

    #[tokio::test]
    async fn test_second_trigger_mid_cycle_is_ignored() {
        let native = Arc::new(MockNative::new());
        let (host, mut ui) = ipc::channel();
        let orchestrator =
            Arc::new(orchestrator(&native, host.handle(), WindowQueryMode::Active));

        // Hold the match response so the first cycle stays in flight.
        let slow_ui = tokio::spawn(async move {
            let msg = ui.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            msg.reply
                .unwrap()
                .ok(json!({"username": "alice", "password": "p1"}))
                .await;
        });

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.handle_trigger().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = orchestrator.handle_trigger().await.unwrap();
        assert_eq!(second, CycleOutcome::Ignored);

        assert_eq!(first.await.unwrap().unwrap(), CycleOutcome::Injected);
        slow_ui.await.unwrap();
        assert_eq!(native.injected_pairs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_request_injects_directly() {
        let native = Arc::new(MockNative::new());
        let (host, _ui) = ipc::channel();
        let orchestrator = orchestrator(&native, host.handle(), WindowQueryMode::Active);

        let outcome = orchestrator
            .handle_execute(CredentialMatchResponse {
                username: Some("bob".to_string()),
                password: Some("hunter2".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Injected);
        assert_eq!(native.injected_pairs.lock().unwrap().len(), 1);

        let empty = orchestrator
            .handle_execute(CredentialMatchResponse::default())
            .await
            .unwrap();
        assert_eq!(empty, CycleOutcome::NoMatch);
        assert_eq!(native.injected_pairs.lock().unwrap().len(), 1);
    }
}
