//! Host Process Composition Root
//!
//! One explicit top-level struct owns the host-side components and their
//! lifecycle: construct, init (hotkey registration), run (event loop),
//! shutdown (release the hotkey). No container and no framework hooks; the
//! embedding application passes the native backends in and drives these
//! four steps.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::biometric::BiometricUnlockCoordinator;
use crate::config::BridgeConfig;
use crate::error::WireError;
use crate::ipc::{
    CredentialMatchResponse, IpcEndpoint, IpcMessage, CHANNEL_AUTOTYPE_EXECUTE,
    CHANNEL_GET_NEXT_WINDOW,
};
use crate::native::{BiometricProvider, KeychainStore, TextInjector, WindowInspector};
use crate::orchestrator::{AutoTypeOrchestrator, HotkeyBinding};

/// How often the event loop polls for hotkey and channel activity.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

/// Initialize logging for a host binary
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// The privileged host side of the bridge.
pub struct BridgeHost {
    windows: Arc<dyn WindowInspector>,
    orchestrator: Arc<AutoTypeOrchestrator>,
    biometrics: Arc<BiometricUnlockCoordinator>,
    ipc: IpcEndpoint,
    hotkey: Option<HotkeyBinding>,
    config: BridgeConfig,
}

impl BridgeHost {
    /// Wire the host components together. Nothing touches the OS yet; that
    /// happens in [`init`](Self::init).
    pub fn new(
        windows: Arc<dyn WindowInspector>,
        injector: Arc<dyn TextInjector>,
        biometrics: Arc<dyn BiometricProvider>,
        keychain: Arc<dyn KeychainStore>,
        ipc: IpcEndpoint,
        config: BridgeConfig,
    ) -> Self {
        let orchestrator = Arc::new(AutoTypeOrchestrator::new(
            Arc::clone(&windows),
            injector,
            ipc.handle(),
            config.window_query,
        ));
        let coordinator = Arc::new(BiometricUnlockCoordinator::new(
            biometrics,
            keychain,
            config.prompt_message.clone(),
        ));

        Self {
            windows,
            orchestrator,
            biometrics: coordinator,
            ipc,
            hotkey: None,
            config,
        }
    }

    /// Register the global hotkey. Failure is not fatal: auto-type by hotkey
    /// stays disabled and everything else keeps working. No retry.
    pub fn init(&mut self) {
        match HotkeyBinding::register(&self.config.hotkey) {
            Ok(binding) => {
                info!(
                    chord = %self.config.hotkey.display_string(),
                    "auto-type hotkey registered"
                );
                self.hotkey = Some(binding);
            }
            Err(e) => {
                warn!("auto-type hotkey unavailable, feature disabled: {e}");
            }
        }
    }

    pub fn orchestrator(&self) -> &Arc<AutoTypeOrchestrator> {
        &self.orchestrator
    }

    pub fn biometrics(&self) -> &Arc<BiometricUnlockCoordinator> {
        &self.biometrics
    }

    /// The host event loop: poll the hotkey, drain the channel, sleep.
    /// Returns once `shutdown` flips to true (or its sender is dropped),
    /// after releasing the hotkey.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("bridge host event loop running");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Some(binding) = &self.hotkey {
                if binding.try_recv_pressed() {
                    if let Err(e) = self.orchestrator.handle_trigger().await {
                        if !e.is_recoverable() {
                            error!("auto-type failed: {e}");
                        }
                    }
                }
            }

            while let Some(message) = self.ipc.try_recv() {
                self.dispatch(message).await;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        self.shutdown();
    }

    /// Release OS resources. In-flight work is abandoned, not recovered.
    pub fn shutdown(&mut self) {
        if self.hotkey.take().is_some() {
            info!("released global auto-type hotkey");
        }
        info!("bridge host shut down");
    }

    async fn dispatch(&self, message: IpcMessage) {
        match message.channel.as_str() {
            CHANNEL_AUTOTYPE_EXECUTE => {
                match serde_json::from_value::<CredentialMatchResponse>(message.payload) {
                    Ok(response) => {
                        if let Err(e) = self.orchestrator.handle_execute(response).await {
                            error!("credential injection failed: {e}");
                        }
                    }
                    Err(e) => debug!("malformed execute payload: {e}"),
                }
            }
            CHANNEL_GET_NEXT_WINDOW => {
                let Some(reply) = message.reply else {
                    return;
                };
                match self.windows.window_behind_active().await {
                    Ok(identity) => reply.ok(Value::String(identity)).await,
                    Err(e) => reply.err(WireError::from(&e)).await,
                }
            }
            other => {
                debug!(channel = other, "unhandled channel on host endpoint");
            }
        }
    }
}
