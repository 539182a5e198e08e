//! Runtime configuration loader and common helpers.

use std::{fmt, fs, path::Path, str::FromStr};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::sync::TrackingConfig;

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";

/// ------------------------------------------------------------------
/// Serializable Settings (what `save_to_file` writes)
/// ------------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize)]
pub struct SerializableSettings {
    pub rpc_url: String,
    pub ws_url: String,
    pub commitment: String,
    pub active_wallet: Option<String>,
    pub always_track: Vec<String>,
    pub token_program_id: String,
}

/// ------------------------------------------------------------------
/// Main Settings object
/// ------------------------------------------------------------------
#[derive(Clone)]
pub struct Settings {
    /* -------- infrastructure ------------------------ */
    pub rpc_url: String,
    pub ws_url: String,
    pub commitment: CommitmentConfig,

    /* -------- tracking ------------------------------ */
    pub active_wallet: Option<Pubkey>,
    pub always_track: Vec<Pubkey>,
    pub token_program_id: Pubkey,
}

impl Settings {
    /// --------------------------------------------------------------
    /// Read `settings.json` from disk.
    /// --------------------------------------------------------------
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading settings file {:?}", path.as_ref()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("parsing settings file {:?}", path.as_ref()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(raw)?;

        /* -------- endpoints -------------------------------------- */
        let rpc_url = json["rpc_url"]
            .as_str()
            .unwrap_or(DEFAULT_RPC_URL)
            .to_string();
        let ws_url = match json["ws_url"].as_str() {
            Some(url) => url.to_string(),
            None => websocket_url_for(&rpc_url),
        };
        let commitment = match json["commitment"].as_str() {
            Some(level) => CommitmentConfig::from_str(level)
                .map_err(|_| anyhow!("unknown commitment level `{level}`"))?,
            None => CommitmentConfig::confirmed(),
        };

        /* -------- principals ------------------------------------- */
        let active_wallet = json["active_wallet"]
            .as_str()
            .map(|s| parse_pubkey("active_wallet", s))
            .transpose()?;

        let mut always_track = Vec::new();
        if let Some(entries) = json["always_track"].as_array() {
            for entry in entries {
                let s = entry
                    .as_str()
                    .ok_or_else(|| anyhow!("always_track entries must be strings"))?;
                always_track.push(parse_pubkey("always_track", s)?);
            }
        }

        let token_program_id = match json["token_program_id"].as_str() {
            Some(s) => parse_pubkey("token_program_id", s)?,
            None => spl_token::id(),
        };

        Ok(Self {
            rpc_url,
            ws_url,
            commitment,
            active_wallet,
            always_track,
            token_program_id,
        })
    }

    /// --------------------------------------------------------------
    /// Load settings from default config/settings.json file.
    /// --------------------------------------------------------------
    pub fn load() -> Result<Self> {
        Self::load_from_file("config/settings.json")
    }

    /// --------------------------------------------------------------
    /// Save settings to a specific file path.
    /// --------------------------------------------------------------
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json_string = serde_json::to_string_pretty(&self.to_serializable())?;
        fs::write(&path, json_string)
            .with_context(|| format!("writing settings to {:?}", path.as_ref()))?;
        Ok(())
    }

    pub fn to_serializable(&self) -> SerializableSettings {
        SerializableSettings {
            rpc_url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            commitment: self.commitment.commitment.to_string(),
            active_wallet: self.active_wallet.map(|k| k.to_string()),
            always_track: self.always_track.iter().map(|k| k.to_string()).collect(),
            token_program_id: self.token_program_id.to_string(),
        }
    }

    /// --------------------------------------------------------------
    /// Helper: the reconciler's view of these settings.
    /// --------------------------------------------------------------
    pub fn tracking_config(&self) -> TrackingConfig {
        TrackingConfig {
            token_program_id: self.token_program_id,
            always_track: self.always_track.clone(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("rpc_url", &self.rpc_url)
            .field("ws_url", &self.ws_url)
            .field("commitment", &self.commitment.commitment)
            .field("active_wallet", &self.active_wallet)
            .field("always_track", &self.always_track.len())
            .finish_non_exhaustive()
    }
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| anyhow!("{field}: invalid pubkey `{value}`: {e}"))
}

/// http→ws, https→wss, and the default RPC port 8899 → pubsub port 8900.
pub fn websocket_url_for(rpc_url: &str) -> String {
    let swapped = if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        rpc_url.to_string()
    };
    swapped.replace(":8899", ":8900")
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::commitment_config::CommitmentLevel;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_json_str("{}").unwrap();
        assert_eq!(settings.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(settings.ws_url, "ws://127.0.0.1:8900");
        assert_eq!(settings.commitment, CommitmentConfig::confirmed());
        assert_eq!(settings.active_wallet, None);
        assert!(settings.always_track.is_empty());
        assert_eq!(settings.token_program_id, spl_token::id());
    }

    #[test]
    fn test_full_file_round_trip() {
        let wallet = Pubkey::new_unique();
        let fee = Pubkey::new_unique();
        let raw = serde_json::json!({
            "rpc_url": "https://api.mainnet-beta.solana.com",
            "commitment": "processed",
            "active_wallet": wallet.to_string(),
            "always_track": [fee.to_string()],
        })
        .to_string();

        let path = std::env::temp_dir().join(format!("settings-{}.json", Pubkey::new_unique()));
        fs::write(&path, raw).unwrap();
        let settings = Settings::load_from_file(&path).unwrap();

        assert_eq!(settings.ws_url, "wss://api.mainnet-beta.solana.com");
        assert_eq!(settings.commitment.commitment, CommitmentLevel::Processed);
        assert_eq!(settings.active_wallet, Some(wallet));
        assert_eq!(settings.tracking_config().always_track, vec![fee]);

        settings.save_to_file(&path).unwrap();
        let reloaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(reloaded.active_wallet, Some(wallet));
        assert_eq!(reloaded.ws_url, settings.ws_url);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_invalid_pubkey_is_rejected() {
        let err = Settings::from_json_str(r#"{"always_track": ["not-a-key"]}"#).unwrap_err();
        assert!(err.to_string().contains("always_track"));
    }

    #[test]
    fn test_unknown_commitment_is_rejected() {
        assert!(Settings::from_json_str(r#"{"commitment": "eventually"}"#).is_err());
    }
}
