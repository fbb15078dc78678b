use std::path::PathBuf;

use crate::access::AccessPolicy;
use crate::error::LedgerError;
use crate::journal::KeyMaterial;
use crate::types::Address;

// Where the local-node deploy lands the Streamer contract.
const DEFAULT_CUSTODY: &str = "0x5fc8d32690cc91d4c39d9d3abcbd16989f875707";

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: String,
    /// Ledger and simulated chain, written together.
    pub state_file: PathBuf,
    pub custody: Address,
    pub participants: Vec<Address>,
    pub api_key: Option<String>,
    pub sim_enabled: bool,
    pub signing_key_b64: Option<String>,
    pub verifying_key_b64: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, LedgerError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(var: F) -> Result<Self, LedgerError> {
        let non_empty = |k: &str| var(k).filter(|v| !v.trim().is_empty());

        let custody = Address::parse(&non_empty("STREAMER_CUSTODY_ADDRESS").unwrap_or_else(|| DEFAULT_CUSTODY.into()))?;

        let participants = non_empty("STREAMER_PARTICIPANTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(Address::parse)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let sim_enabled = match non_empty("STREAMER_SIM_ENABLED").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("1") | Some("true") | Some("yes") | Some("on") => true,
            Some("0") | Some("false") | Some("no") | Some("off") => false,
            Some(other) => return Err(LedgerError::Validation(format!("STREAMER_SIM_ENABLED: '{}'", other))),
        };

        Ok(Self {
            bind: non_empty("STREAMER_BIND").unwrap_or_else(|| "0.0.0.0:8000".into()),
            state_file: non_empty("STREAMER_STATE_FILE").unwrap_or_else(|| "streamer_state.json".into()).into(),
            custody,
            participants,
            api_key: non_empty("STREAMER_API_KEY"),
            sim_enabled,
            signing_key_b64: non_empty("STREAMER_ED25519_PRIVATE_KEY_B64"),
            verifying_key_b64: non_empty("STREAMER_ED25519_PUBLIC_KEY_B64"),
        })
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::with_participants(self.participants.iter().cloned())
    }

    pub fn key_material(&self) -> KeyMaterial {
        KeyMaterial::from_b64(self.signing_key_b64.as_deref(), self.verifying_key_b64.as_deref())
    }
}
