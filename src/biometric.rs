//! Biometric Unlock Coordination
//!
//! Manages the locally cached vault-unlock secret: key material derived from
//! an OS-held fragment (optionally combined with a client-held fragment), an
//! encrypted envelope stored in the OS keychain, and the biometric prompt
//! that gates every retrieval.
//!
//! The derivation challenge doubles as the envelope iv. It must be retained
//! by the caller: re-deriving the key requires the exact same challenge, and
//! an envelope whose challenge is lost can never be opened again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use hmac::Mac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::{BridgeError, Result};
use crate::native::{BiometricProvider, KeychainStore};

/// Byte length of the derivation challenge, which is also the cipher iv.
const CHALLENGE_LEN: usize = 16;

/// A host-derived key fragment, optionally combined with a fragment held by
/// the client before any key is formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    pub os_key_part_b64: String,
    pub client_key_part_b64: Option<String>,
}

impl KeyMaterial {
    fn digest_material(&self) -> String {
        match self.client_key_part_b64.as_deref() {
            Some(client) if !client.is_empty() => {
                format!("{}|{}", self.os_key_part_b64, client)
            }
            _ => self.os_key_part_b64.clone(),
        }
    }

    /// The symmetric key both fragments combine into.
    fn combined_key(&self) -> Zeroizing<[u8; 32]> {
        let digest = Sha256::digest(self.digest_material().as_bytes());
        Zeroizing::new(digest.into())
    }
}

/// A key and the challenge it was derived with. Re-derivation with the same
/// challenge reproduces the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedKey {
    pub key_b64: String,
    pub iv_b64: String,
}

/// States of one biometric verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptState {
    Locked,
    PromptPending,
    Unlocked,
    Failed,
}

/// Coordinates key derivation, envelope storage, and the biometric gate.
///
/// Calls for the same `(service, account)` entry are serialized: a second
/// `get_secret`/`set_secret` waits for the first to finish and then runs its
/// own prompt. An unlock is scoped to the single call that prompted for it.
pub struct BiometricUnlockCoordinator {
    biometrics: Arc<dyn BiometricProvider>,
    keychain: Arc<dyn KeychainStore>,
    /// Native window handle the OS prompt is parented to.
    prompt_handle: Vec<u8>,
    prompt_message: String,
    entry_locks: StdMutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

impl BiometricUnlockCoordinator {
    pub fn new(
        biometrics: Arc<dyn BiometricProvider>,
        keychain: Arc<dyn KeychainStore>,
        prompt_message: String,
    ) -> Self {
        Self {
            biometrics,
            keychain,
            prompt_handle: Vec::new(),
            prompt_message,
            entry_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Parent the OS prompt to an application window.
    pub fn set_prompt_handle(&mut self, handle: Vec<u8>) {
        self.prompt_handle = handle;
    }

    /// Whether biometric unlock can be offered at all. Never prompts.
    pub async fn available(&self) -> Result<bool> {
        self.biometrics.available().await
    }

    /// Derive key material from the OS secret source.
    ///
    /// With a challenge, the result is deterministic; without one, a fresh
    /// random challenge is generated and returned in `iv_b64` so the caller
    /// can store it alongside whatever the key protects.
    pub async fn derive_key_material(&self, challenge_b64: Option<&str>) -> Result<DerivedKey> {
        let challenge = match challenge_b64 {
            Some(c) => c.to_string(),
            None => {
                let mut fresh = [0u8; CHALLENGE_LEN];
                rand::thread_rng().fill_bytes(&mut fresh);
                BASE64.encode(fresh)
            }
        };

        let raw = self
            .biometrics
            .derive_key_material(Some(&challenge))
            .await
            .map_err(|e| BridgeError::Derivation(e.to_string()))?;
        parse_derived(&raw)
    }

    /// Encrypt `secret` and write the envelope to the keychain entry
    /// `(service, account)`, overwriting any prior entry. Returns the stored
    /// key id.
    ///
    /// Without `key_material`, the OS fragment is re-derived with `iv_b64`
    /// as the challenge, so the envelope is self-contained.
    pub async fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &SecretString,
        key_material: Option<&KeyMaterial>,
        iv_b64: &str,
    ) -> Result<String> {
        let lock = self.entry_lock(service, account);
        let _guard = lock.lock().await;

        let material = self.resolve_material(key_material, iv_b64).await?;
        let envelope = seal(secret.expose_secret().as_bytes(), &material.combined_key(), iv_b64)?;

        self.keychain.set_password(service, account, &envelope).await?;
        debug!(service, account, "stored biometric secret envelope");
        Ok(format!("{service}/{account}"))
    }

    /// Run the biometric prompt and, on success, decrypt the stored envelope.
    ///
    /// Prompt failure or cancellation returns an authentication error and
    /// releases nothing; the caller may retry. Every retrieval prompts again.
    pub async fn get_secret(
        &self,
        service: &str,
        account: &str,
        key_material: Option<&KeyMaterial>,
    ) -> Result<SecretString> {
        let lock = self.entry_lock(service, account);
        let _guard = lock.lock().await;

        self.verify_identity().await?;

        let envelope = self
            .keychain
            .get_password(service, account)
            .await?
            .ok_or_else(|| {
                BridgeError::KeychainIo("no biometric secret stored for entry".to_string())
            })?;

        let iv_b64 = envelope_iv(&envelope)?;
        let material = self.resolve_material(key_material, &iv_b64).await?;
        let plaintext = open(&envelope, &material.combined_key())?;

        let secret = String::from_utf8(plaintext.to_vec())
            .map_err(|_| BridgeError::Crypto("decrypted secret is not valid UTF-8".to_string()))?;
        Ok(SecretString::from(secret))
    }

    /// Remove the keychain entry. Absent entries are not an error.
    pub async fn delete_secret(&self, service: &str, account: &str) -> Result<()> {
        let lock = self.entry_lock(service, account);
        let _guard = lock.lock().await;

        self.keychain.delete_password(service, account).await
    }

    // ===== Password-style secrets (not biometric-gated) =====

    /// Read a stored password, falling back to the legacy entry format for
    /// entries written before the current storage scheme.
    pub async fn password(&self, service: &str, account: &str) -> Result<Option<SecretString>> {
        if let Some(password) = self.keychain.get_password(service, account).await? {
            return Ok(Some(SecretString::from(password)));
        }

        match self.keychain.get_password_legacy(service, account).await? {
            Some(password) => {
                debug!(service, account, "read password from legacy keychain entry");
                Ok(Some(SecretString::from(password)))
            }
            None => Ok(None),
        }
    }

    /// Store a password in the primary entry format. Legacy entries
    /// normalize into this format the next time they are written.
    pub async fn set_password(
        &self,
        service: &str,
        account: &str,
        password: &SecretString,
    ) -> Result<()> {
        self.keychain
            .set_password(service, account, password.expose_secret())
            .await
    }

    /// Remove a stored password. Idempotent.
    pub async fn delete_password(&self, service: &str, account: &str) -> Result<()> {
        self.keychain.delete_password(service, account).await
    }

    // ===== Internals =====

    /// Walk one verification through the prompt: pending, then unlocked or
    /// failed. The unlock only covers the call that owns it.
    async fn verify_identity(&self) -> Result<()> {
        let mut state = PromptState::Locked;
        trace!(?state, "biometric gate entered");

        state = PromptState::PromptPending;
        trace!(?state, "requesting biometric verification");

        let granted = self
            .biometrics
            .prompt(&self.prompt_handle, &self.prompt_message)
            .await
            .map_err(|e| BridgeError::Authentication(e.to_string()))?;

        state = if granted {
            PromptState::Unlocked
        } else {
            PromptState::Failed
        };
        trace!(?state, "biometric verification finished");

        if state == PromptState::Unlocked {
            Ok(())
        } else {
            Err(BridgeError::Authentication(
                "biometric prompt failed or was cancelled".to_string(),
            ))
        }
    }

    async fn resolve_material(
        &self,
        key_material: Option<&KeyMaterial>,
        iv_b64: &str,
    ) -> Result<KeyMaterial> {
        match key_material {
            Some(material) => Ok(material.clone()),
            None => {
                let derived = self.derive_key_material(Some(iv_b64)).await?;
                Ok(KeyMaterial {
                    os_key_part_b64: derived.key_b64,
                    client_key_part_b64: None,
                })
            }
        }
    }

    fn entry_lock(&self, service: &str, account: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.entry_locks.lock().unwrap();
        locks
            .entry((service.to_string(), account.to_string()))
            .or_default()
            .clone()
    }
}

/// Parse the native `"<keyB64>|<ivB64>"` reply.
fn parse_derived(raw: &str) -> Result<DerivedKey> {
    let mut parts = raw.splitn(2, '|');
    let (Some(key_b64), Some(iv_b64)) = (parts.next(), parts.next()) else {
        return Err(BridgeError::Derivation(
            "malformed key material reply".to_string(),
        ));
    };

    for part in [key_b64, iv_b64] {
        BASE64
            .decode(part)
            .map_err(|e| BridgeError::Derivation(e.to_string()))?;
    }

    Ok(DerivedKey {
        key_b64: key_b64.to_string(),
        iv_b64: iv_b64.to_string(),
    })
}

/// Expand the combined key into separate encryption and MAC keys.
/// Uses HKDF-Expand with info strings "enc" and "mac".
fn stretch(key: &Zeroizing<[u8; 32]>) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
    let hk = Hkdf::<Sha256>::from_prk(key.as_ref())
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;

    let mut enc_key = Zeroizing::new([0u8; 32]);
    let mut mac_key = Zeroizing::new([0u8; 32]);
    hk.expand(b"enc", enc_key.as_mut())
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    hk.expand(b"mac", mac_key.as_mut())
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;

    Ok((enc_key, mac_key))
}

type HmacSha256 = hmac::Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypt a secret into the envelope format `"<ivB64>|<ctB64>|<macB64>"`
/// (AES-256-CBC, HMAC-SHA256 over iv and ciphertext).
fn seal(plaintext: &[u8], key: &Zeroizing<[u8; 32]>, iv_b64: &str) -> Result<String> {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

    let iv = BASE64
        .decode(iv_b64)
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    if iv.len() != CHALLENGE_LEN {
        return Err(BridgeError::Crypto(format!(
            "iv must be {CHALLENGE_LEN} bytes, got {}",
            iv.len()
        )));
    }

    let (enc_key, mac_key) = stretch(key)?;

    let cipher = Aes256CbcEnc::new_from_slices(enc_key.as_ref(), &iv)
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key.as_ref())
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    Ok(format!(
        "{}|{}|{}",
        iv_b64,
        BASE64.encode(&ciphertext),
        BASE64.encode(tag)
    ))
}

/// Verify and decrypt an envelope produced by [`seal`].
fn open(envelope: &str, key: &Zeroizing<[u8; 32]>) -> Result<Zeroizing<Vec<u8>>> {
    use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

    let parts: Vec<&str> = envelope.split('|').collect();
    if parts.len() != 3 {
        return Err(BridgeError::Crypto("invalid envelope format".to_string()));
    }

    let iv = BASE64
        .decode(parts[0])
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    let ciphertext = BASE64
        .decode(parts[1])
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    let tag = BASE64
        .decode(parts[2])
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;

    let (enc_key, mac_key) = stretch(key)?;

    // Verify MAC before touching the ciphertext.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key.as_ref())
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    mac.update(&iv);
    mac.update(&ciphertext);
    mac.verify_slice(&tag)
        .map_err(|_| BridgeError::Crypto("MAC verification failed".to_string()))?;

    let cipher = Aes256CbcDec::new_from_slices(enc_key.as_ref(), &iv)
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;
    let mut buffer = ciphertext.clone();
    let plaintext = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| BridgeError::Crypto(e.to_string()))?;

    Ok(Zeroizing::new(plaintext.to_vec()))
}

/// The iv half of a stored envelope; it is also the derivation challenge.
fn envelope_iv(envelope: &str) -> Result<String> {
    envelope
        .split('|')
        .next()
        .filter(|iv| !iv.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Crypto("invalid envelope format".to_string()))
}
