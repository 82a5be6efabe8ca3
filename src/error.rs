//! Error Types for the Desktop Bridge
//!
//! One error enum for the whole crate, plus the serialized form that crosses
//! the host/UI process boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge core
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Hotkey Errors =====
    /// The OS refused the global hotkey binding
    #[error("Hotkey registration failed: {0}")]
    HotkeyRegistration(String),

    // ===== Window / Injection Errors =====
    /// Querying the focused window (or the one behind it) failed
    #[error("Window query failed: {0}")]
    WindowQuery(String),

    /// Failed to inject keystrokes
    #[error("Failed to inject keystrokes: {0}")]
    InputInjection(String),

    // ===== IPC Errors =====
    /// Channel transport failure or protocol violation
    #[error("IPC error: {0}")]
    Ipc(String),

    // ===== Biometric / Key Material Errors =====
    /// Biometric prompt failed or was cancelled by the user
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// OS secret source unavailable or key derivation failed
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    // ===== Keychain Errors =====
    /// Keychain/credential storage error
    #[error("Keychain error: {0}")]
    KeychainIo(String),

    // ===== Configuration Errors =====
    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Stable kind tag used when the error is serialized across the
    /// process boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::HotkeyRegistration(_) => "hotkey_registration",
            BridgeError::WindowQuery(_) => "window_query",
            BridgeError::InputInjection(_) => "input_injection",
            BridgeError::Ipc(_) => "ipc",
            BridgeError::Authentication(_) => "authentication",
            BridgeError::Derivation(_) => "derivation",
            BridgeError::Crypto(_) => "crypto",
            BridgeError::KeychainIo(_) => "keychain_io",
            BridgeError::Config(_) => "config",
        }
    }

    /// Check if this error is recoverable by simply retrying the action
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BridgeError::Authentication(_))
    }
}

/// The shape an error takes when it crosses the IPC boundary: a kind tag and
/// a message, never a native error chain.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&BridgeError> for WireError {
    fn from(err: &BridgeError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<WireError> for BridgeError {
    fn from(wire: WireError) -> Self {
        match wire.kind.as_str() {
            "hotkey_registration" => BridgeError::HotkeyRegistration(wire.message),
            "window_query" => BridgeError::WindowQuery(wire.message),
            "input_injection" => BridgeError::InputInjection(wire.message),
            "authentication" => BridgeError::Authentication(wire.message),
            "derivation" => BridgeError::Derivation(wire.message),
            "crypto" => BridgeError::Crypto(wire.message),
            "keychain_io" => BridgeError::KeychainIo(wire.message),
            "config" => BridgeError::Config(wire.message),
            _ => BridgeError::Ipc(wire.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_round_trip() {
        let err = BridgeError::Authentication("prompt cancelled".to_string());
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, "authentication");

        let back = BridgeError::from(wire);
        assert!(matches!(back, BridgeError::Authentication(_)));
        assert!(back.is_recoverable());
    }

    #[test]
    fn test_unknown_kind_maps_to_ipc() {
        let wire = WireError {
            kind: "something_new".to_string(),
            message: "boom".to_string(),
        };
        assert!(matches!(BridgeError::from(wire), BridgeError::Ipc(_)));
    }
}
