//! Native Capability Contracts
//!
//! The bridge core never talks to the OS directly. Everything that needs a
//! platform API (window introspection, keystroke injection, the biometric
//! prompt, the keychain) goes through the async traits in this module, and
//! the embedding application supplies one implementation per target OS.
//!
//! The traits are split by concern so a backend only has to implement what
//! its platform actually supports (e.g. a Wayland backend without window
//! introspection can still provide the keychain).

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Result;

/// Identifies the OS window currently holding input focus.
///
/// Window identities are ephemeral: produced here, consumed within one
/// auto-type cycle, and never logged or written to disk.
#[async_trait]
pub trait WindowInspector: Send + Sync {
    /// Identity of the window with current OS focus.
    async fn active_window_identity(&self) -> Result<String>;

    /// Identity of the window one level down the OS activation stack.
    /// Used when the focused window is the credential manager's own UI.
    async fn window_behind_active(&self) -> Result<String>;
}

/// Simulated keystroke output into the focused window.
#[async_trait]
pub trait TextInjector: Send + Sync {
    /// Type a single string with the keyboard.
    async fn inject_text(&self, text: &SecretString) -> Result<()>;

    /// Type username and password separated with Tab.
    async fn inject_credential_pair(&self, username: &str, password: &SecretString)
        -> Result<()>;
}

/// OS biometric facility: availability probe, the verification prompt, and
/// the OS-held key fragment derivation.
#[async_trait]
pub trait BiometricProvider: Send + Sync {
    /// Whether biometric verification can be offered. Must not prompt.
    async fn available(&self) -> Result<bool>;

    /// Show the OS verification prompt, parented to `window_handle`.
    /// Returns `Ok(false)` when the user fails or cancels verification.
    async fn prompt(&self, window_handle: &[u8], message: &str) -> Result<bool>;

    /// Derive key material from the OS-held secret. Returns a base64 key and
    /// the base64 challenge used to create it, separated by a `|` character:
    /// `"<keyB64>|<ivB64>"`. If a challenge is provided it is used as-is,
    /// otherwise the backend generates a random one.
    async fn derive_key_material(&self, challenge_b64: Option<&str>) -> Result<String>;
}

/// Platform credential storage (Credential Manager / Keychain / Secret
/// Service).
#[async_trait]
pub trait KeychainStore: Send + Sync {
    /// Fetch the stored password, `None` if no entry exists.
    async fn get_password(&self, service: &str, account: &str) -> Result<Option<String>>;

    /// Fetch a password stored by the legacy (Keytar-era) entry format,
    /// `None` if no such entry exists.
    async fn get_password_legacy(&self, service: &str, account: &str)
        -> Result<Option<String>>;

    /// Save the password, adding an entry if none exists and overwriting
    /// any existing one.
    async fn set_password(&self, service: &str, account: &str, password: &str) -> Result<()>;

    /// Delete the stored password. Idempotent: absent entries are not an
    /// error.
    async fn delete_password(&self, service: &str, account: &str) -> Result<()>;
}
