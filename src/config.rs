//! Application configuration storage

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::orchestrator::WindowQueryMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub hotkey: HotkeyConfig,
    /// Which window a hotkey trigger targets.
    #[serde(default)]
    pub window_query: WindowQueryMode,
    /// Keychain service namespace for this installation's entries.
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,
    /// Message shown on the OS biometric prompt.
    #[serde(default = "default_prompt_message")]
    pub prompt_message: String,
}

fn default_keychain_service() -> String {
    "vault-desktop-bridge".to_string()
}

fn default_prompt_message() -> String {
    "Verify your identity to unlock the vault".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hotkey: HotkeyConfig::default(),
            window_query: WindowQueryMode::Active,
            keychain_service: default_keychain_service(),
            prompt_message: default_prompt_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    pub modifiers: Vec<String>, // "ctrl", "alt", "shift", "win"
    pub key: String,            // "V", "P", "F8", ...
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            modifiers: vec!["ctrl".to_string(), "alt".to_string()],
            key: "V".to_string(),
        }
    }
}

impl HotkeyConfig {
    pub fn display_string(&self) -> String {
        let mut parts = Vec::new();
        for m in &self.modifiers {
            match m.as_str() {
                "ctrl" => parts.push("Ctrl"),
                "alt" => parts.push("Alt"),
                "shift" => parts.push("Shift"),
                "win" => parts.push("Win"),
                _ => {}
            }
        }
        parts.push(&self.key);
        parts.join("+")
    }

    /// Build the OS chord this configuration describes.
    pub fn to_hotkey(&self) -> HotKey {
        let mut modifiers = Modifiers::empty();
        for m in &self.modifiers {
            match m.as_str() {
                "ctrl" => modifiers |= Modifiers::CONTROL,
                "alt" => modifiers |= Modifiers::ALT,
                "shift" => modifiers |= Modifiers::SHIFT,
                "win" => modifiers |= Modifiers::SUPER,
                _ => {}
            }
        }

        let mods = if modifiers.is_empty() {
            None
        } else {
            Some(modifiers)
        };
        HotKey::new(mods, key_code(&self.key))
    }
}

fn key_code(key: &str) -> Code {
    match key {
        "A" => Code::KeyA, "B" => Code::KeyB, "C" => Code::KeyC, "D" => Code::KeyD,
        "E" => Code::KeyE, "F" => Code::KeyF, "G" => Code::KeyG, "H" => Code::KeyH,
        "I" => Code::KeyI, "J" => Code::KeyJ, "K" => Code::KeyK, "L" => Code::KeyL,
        "M" => Code::KeyM, "N" => Code::KeyN, "O" => Code::KeyO, "P" => Code::KeyP,
        "Q" => Code::KeyQ, "R" => Code::KeyR, "S" => Code::KeyS, "T" => Code::KeyT,
        "U" => Code::KeyU, "V" => Code::KeyV, "W" => Code::KeyW, "X" => Code::KeyX,
        "Y" => Code::KeyY, "Z" => Code::KeyZ,
        "F1" => Code::F1, "F2" => Code::F2, "F3" => Code::F3, "F4" => Code::F4,
        "F5" => Code::F5, "F6" => Code::F6, "F7" => Code::F7, "F8" => Code::F8,
        "F9" => Code::F9, "F10" => Code::F10, "F11" => Code::F11, "F12" => Code::F12,
        _ => Code::KeyV, // Default fallback
    }
}

fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "vaultbridge", "vault-desktop-bridge").ok_or_else(|| {
        BridgeError::Config("no home directory for configuration".to_string())
    })?;
    let config_dir = dirs.config_dir();

    if !config_dir.exists() {
        fs::create_dir_all(config_dir)
            .map_err(|e| BridgeError::Config(e.to_string()))?;
    }

    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> Result<BridgeConfig> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let content =
        fs::read_to_string(&path).map_err(|e| BridgeError::Config(e.to_string()))?;

    serde_json::from_str(&content).map_err(|e| BridgeError::Config(e.to_string()))
}

pub fn save_config(config: &BridgeConfig) -> Result<()> {
    let path = config_path()?;

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| BridgeError::Config(e.to_string()))?;

    fs::write(&path, content).map_err(|e| BridgeError::Config(e.to_string()))
}
