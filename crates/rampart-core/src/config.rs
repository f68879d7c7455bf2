//! Server configuration.
//!
//! Resolution order: environment variables over config file over defaults.
//! The config file lives at `$RAMPART_CONFIG`, falling back to
//! `~/.config/rampart/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::crypto::{Keypair, KEY_LENGTH};

// ── Well-known keys ───────────────────────────────────────────────────────────
//
// Fixture values for custom-server interoperation. The standard keypair is
// the one patched clients ship with; the stock public key is what an
// unpatched client encrypts its login against. None of these participate
// in the session algorithm itself.

/// Public half of the standard client keypair.
pub const STANDARD_PUBLIC_KEY: [u8; KEY_LENGTH] = [
    0x72, 0xF1, 0xA4, 0xA4, 0xC4, 0x8E, 0x44, 0xDA, 0x0C, 0x42, 0x31, 0x0F, 0x80, 0x0E, 0x96,
    0x62, 0x4E, 0x6D, 0xC6, 0xA6, 0x41, 0xA9, 0xD4, 0x1C, 0x3B, 0x50, 0x39, 0xD8, 0xDF, 0xAD,
    0xC2, 0x7E,
];

/// Private half of the standard client keypair.
pub const STANDARD_PRIVATE_KEY: [u8; KEY_LENGTH] = [
    0x18, 0x91, 0xD4, 0x01, 0xFA, 0xDB, 0x51, 0xD2, 0x5D, 0x3A, 0x91, 0x74, 0xD4, 0x72, 0xA9,
    0xF6, 0x91, 0xA4, 0x5B, 0x97, 0x42, 0x85, 0x4C, 0x80, 0x15, 0x72, 0x55, 0xA9, 0xFC, 0x24,
    0xBD, 0x27,
];

/// The stock server's public key, as baked into unpatched clients.
pub const STOCK_SERVER_PUBLIC_KEY: [u8; KEY_LENGTH] = [
    0x13, 0x15, 0xD5, 0xBA, 0x6C, 0x3F, 0x2C, 0x8E, 0x5F, 0x0A, 0x9D, 0x4E, 0x7B, 0x61, 0x83,
    0x2F, 0x9D, 0xD0, 0xB2, 0xA7, 0xC4, 0x4E, 0x18, 0x35, 0x6B, 0x9F, 0x07, 0xCA, 0x13, 0xE4,
    0x0D, 0x5A,
];

/// Private key this server listens with unless configured otherwise. The
/// public half is derived on load; clients are patched to match it.
pub const DEFAULT_SERVER_PRIVATE_KEY: &str =
    "c09a65ee8d3b17c2490fd15a3e86b04752cf98013d6ab47e2c50e19f8a33d7c4";

/// The standard client keypair as an injectable `Keypair`.
pub fn standard_keypair() -> Keypair {
    Keypair::from_parts(STANDARD_PUBLIC_KEY, STANDARD_PRIVATE_KEY)
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RampartConfig {
    pub network: NetworkConfig,
    pub keys: KeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the TCP listener binds.
    pub listen_addr: String,
    /// Grace period announced to clients when the server shuts down.
    pub shutdown_notice_secs: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Hex-encoded Curve25519 private key. The public half is derived.
    pub server_private_key: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9339".to_owned(),
            shutdown_notice_secs: 120,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            server_private_key: DEFAULT_SERVER_PRIVATE_KEY.to_owned(),
        }
    }
}

impl KeyConfig {
    /// Decode the configured private key and derive the full keypair.
    pub fn keypair(&self) -> Result<Keypair, ConfigError> {
        let bytes = hex::decode(&self.server_private_key)?;
        let private: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| ConfigError::WrongKeyLength(bytes.len()))?;
        Ok(Keypair::from_private(private))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("server private key is not valid hex: {0}")]
    BadKeyHex(#[from] hex::FromHexError),
    #[error("server private key is {0} bytes, expected {}", KEY_LENGTH)]
    WrongKeyLength(usize),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RampartConfig {
    /// Load config: env vars over file over defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults if it does not
    /// exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_owned(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_owned(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RAMPART_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        std::env::var("HOME")
                            .map(PathBuf::from)
                            .unwrap_or_else(|_| PathBuf::from("/tmp"))
                            .join(".config")
                    })
                    .join("rampart")
                    .join("config.toml")
            })
    }

    /// Apply RAMPART_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RAMPART_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Ok(v) = std::env::var("RAMPART_NETWORK__SHUTDOWN_NOTICE_SECS") {
            if let Ok(secs) = v.parse() {
                self.network.shutdown_notice_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("RAMPART_KEYS__SERVER_PRIVATE_KEY") {
            self.keys.server_private_key = v;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_listens_on_the_stock_port() {
        let config = RampartConfig::default();
        assert_eq!(config.network.listen_addr, "0.0.0.0:9339");
        assert!(config.network.shutdown_notice_secs > 0);
    }

    #[test]
    fn default_key_config_yields_a_keypair() {
        let keypair = RampartConfig::default().keys.keypair().unwrap();
        assert_ne!(keypair.public, [0u8; KEY_LENGTH]);
    }

    #[test]
    fn standard_keypair_matches_the_constants() {
        let keypair = standard_keypair();
        assert_eq!(keypair.public, STANDARD_PUBLIC_KEY);
    }

    #[test]
    fn non_hex_key_is_rejected() {
        let keys = KeyConfig {
            server_private_key: "not hex at all".to_owned(),
        };
        assert!(matches!(keys.keypair(), Err(ConfigError::BadKeyHex(_))));
    }

    #[test]
    fn short_key_is_rejected() {
        let keys = KeyConfig {
            server_private_key: "c0ffee".to_owned(),
        };
        assert!(matches!(
            keys.keypair(),
            Err(ConfigError::WrongKeyLength(3))
        ));
    }

    #[test]
    fn config_parses_from_toml() {
        let text = r#"
            [network]
            listen_addr = "127.0.0.1:9400"

            [keys]
            server_private_key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
        "#;
        let config: RampartConfig = toml::from_str(text).unwrap();
        assert_eq!(config.network.listen_addr, "127.0.0.1:9400");
        // Unset fields keep their defaults
        assert_eq!(config.network.shutdown_notice_secs, 120);
        config.keys.keypair().unwrap();
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!(
            "rampart-config-missing-{}.toml",
            std::process::id()
        ));
        let config = RampartConfig::load_from(&path).unwrap();
        assert_eq!(config.network.listen_addr, "0.0.0.0:9339");
    }

    #[test]
    fn config_file_round_trips_through_load() {
        let dir = std::env::temp_dir().join(format!("rampart-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let text = toml::to_string_pretty(&RampartConfig::default()).unwrap();
        std::fs::write(&path, text).unwrap();

        let config = RampartConfig::load_from(&path).unwrap();
        assert_eq!(
            config.keys.server_private_key,
            DEFAULT_SERVER_PRIVATE_KEY
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
