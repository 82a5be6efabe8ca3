//! Platform Keychain Storage
//!
//! The production [`KeychainStore`] backend over the OS credential store
//! (Windows Credential Manager, macOS Keychain, Secret Service on Linux).
//! Legacy reads target the entries written by the Keytar-era storage so old
//! installations keep working until their next write.

use async_trait::async_trait;

use crate::error::{BridgeError, Result};
use crate::native::KeychainStore;

/// Keyring target the Keytar-era entries live under.
const LEGACY_TARGET: &str = "keytar";

/// OS keychain backend.
pub struct OsKeychain;

impl OsKeychain {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(service, account)
            .map_err(|e| BridgeError::KeychainIo(e.to_string()))
    }

    fn legacy_entry(service: &str, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new_with_target(LEGACY_TARGET, service, account)
            .map_err(|e| BridgeError::KeychainIo(e.to_string()))
    }

    fn read(entry: keyring::Entry) -> Result<Option<String>> {
        match entry.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(BridgeError::KeychainIo(e.to_string())),
        }
    }
}

impl Default for OsKeychain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeychainStore for OsKeychain {
    async fn get_password(&self, service: &str, account: &str) -> Result<Option<String>> {
        Self::read(Self::entry(service, account)?)
    }

    async fn get_password_legacy(
        &self,
        service: &str,
        account: &str,
    ) -> Result<Option<String>> {
        Self::read(Self::legacy_entry(service, account)?)
    }

    async fn set_password(&self, service: &str, account: &str, password: &str) -> Result<()> {
        Self::entry(service, account)?
            .set_password(password)
            .map_err(|e| BridgeError::KeychainIo(e.to_string()))
    }

    async fn delete_password(&self, service: &str, account: &str) -> Result<()> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(BridgeError::KeychainIo(e.to_string())),
        }
    }
}
