use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::{Ledger, LedgerState};
use crate::sim::{ChainState, SimChain};

/// Reads a JSON snapshot. A missing file is `Ok(None)`; a corrupt one is an error.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LedgerError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| LedgerError::LedgerIo(e.to_string()))?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// tmp write + fsync + rename, so a crash leaves either the old or the new snapshot.
/// Each call writes its own tmp file; concurrent writers never share one.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let json_str = serde_json::to_string_pretty(value)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp_file = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_file, json_str).await.map_err(|e| LedgerError::LedgerIo(e.to_string()))?;

    { // fsync tmp
        let f = File::open(&tmp_file).map_err(|e| LedgerError::LedgerIo(e.to_string()))?;
        f.sync_all().map_err(|e| LedgerError::LedgerIo(e.to_string()))?;
    }

    if let Err(e) = tokio::fs::rename(&tmp_file, path).await {
        let _ = tokio::fs::remove_file(&tmp_file).await;
        return Err(LedgerError::LedgerIo(e.to_string()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) { let _ = dir.sync_all(); }
    }
    Ok(())
}

/// Ledger and simulated chain as one document. One file, one rename: a crash
/// can never leave credits on disk for tokens the chain never moved.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Snapshot {
    pub ledger: LedgerState,
    pub chain: ChainState,
}

/// The service's state file.
pub struct Store {
    path: PathBuf,
    // Held across snapshot + write so a later commit never loses to an older one.
    commit_lock: Mutex<()>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), commit_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Snapshot>, LedgerError> {
        let snapshot = load_json(&self.path)?;
        if snapshot.is_none() {
            info!("no snapshot at {}, starting fresh", self.path.display());
        }
        Ok(snapshot)
    }

    pub async fn commit(&self, ledger: &Ledger, chain: &SimChain) -> Result<(), LedgerError> {
        let _serial = self.commit_lock.lock().await;
        let (ledger, chain) = ledger.snapshot_with(|| chain.snapshot());
        write_json_atomic(&self.path, &Snapshot { ledger, chain }).await
    }
}
