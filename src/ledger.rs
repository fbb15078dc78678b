use crate::error::LedgerError;
use crate::journal::{self, KeyMaterial};
use crate::types::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// token -> owner -> custodied amount
pub type Balances = BTreeMap<Address, BTreeMap<Address, Amount>>;

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct LedgerState {
    pub meta: Meta,
    pub balances: Balances,
    pub journal: Vec<Receipt>,
}

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Meta {
    pub version: u64,
    pub created_at: String,
}

/// Authoritative (owner, token) -> amount store.
///
/// Every method takes the lock for one read-modify-write and releases it
/// before returning, so nothing here is ever held across a gateway call.
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Self { state: RwLock::new(fresh_state()) }
    }

    pub fn from_state(state: LedgerState) -> Self {
        info!("📚 Ledger mounted. version={} receipts={}", state.meta.version, state.journal.len());
        Self { state: RwLock::new(state) }
    }

    /// Clones the state and runs `also` while mutations are still held off,
    /// so whatever `also` captures is cut at the same instant.
    pub fn snapshot_with<T>(&self, also: impl FnOnce() -> T) -> (LedgerState, T) {
        let st = self.state.read();
        let other = also();
        (st.clone(), other)
    }

    pub fn current_version(&self) -> u64 {
        self.state.read().meta.version
    }

    pub fn balance_of(&self, owner: &Address, token: &Address) -> Amount {
        entry_of(&self.state.read().balances, owner, token)
    }

    pub fn credit(&self, owner: &Address, token: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let mut st = self.state.write();
        let entry = st
            .balances
            .entry(token.clone())
            .or_default()
            .entry(owner.clone())
            .or_default();
        let next = entry.checked_add(amount).ok_or(LedgerError::Overflow)?;
        *entry = next;
        st.meta.version += 1;
        Ok(next)
    }

    pub fn debit(&self, owner: &Address, token: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let mut st = self.state.write();
        let available = entry_of(&st.balances, owner, token);
        let next = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds { requested: amount, available })?;
        st.balances
            .entry(token.clone())
            .or_default()
            .insert(owner.clone(), next);
        st.meta.version += 1;
        Ok(next)
    }

    /// Sum of every owner's entry for `token`.
    pub fn obligations(&self, token: &Address) -> Result<Amount, LedgerError> {
        let st = self.state.read();
        let Some(owners) = st.balances.get(token) else { return Ok(Amount::ZERO) };
        owners
            .values()
            .try_fold(Amount::ZERO, |acc, v| acc.checked_add(*v))
            .ok_or(LedgerError::Overflow)
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.state.read().balances.keys().cloned().collect()
    }

    /// (owner, token, amount) for every entry, zero entries included.
    pub fn entries(&self) -> Vec<(Address, Address, Amount)> {
        self.state
            .read()
            .balances
            .iter()
            .flat_map(|(token, owners)| {
                owners.iter().map(move |(owner, amt)| (owner.clone(), token.clone(), *amt))
            })
            .collect()
    }

    pub fn journal(&self) -> Vec<Receipt> {
        self.state.read().journal.clone()
    }

    /// Appends a chained receipt for an operation whose ledger mutation is
    /// already applied.
    pub fn record(
        &self,
        kind: OperationKind,
        owner: &Address,
        token: &Address,
        amount: Amount,
        keys: &KeyMaterial,
    ) -> Result<Receipt, LedgerError> {
        let mut st = self.state.write();
        let balance_after = entry_of(&st.balances, owner, token);
        let receipt = journal::seal(draft(&st, kind, owner, token, amount, balance_after), keys)?;
        st.journal.push(receipt.clone());
        Ok(receipt)
    }

    /// Credit and its deposit receipt in one write section: either both land
    /// or neither does.
    pub fn credit_recorded(
        &self,
        owner: &Address,
        token: &Address,
        amount: Amount,
        keys: &KeyMaterial,
    ) -> Result<Receipt, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let mut st = self.state.write();
        let next = entry_of(&st.balances, owner, token)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let receipt = journal::seal(draft(&st, OperationKind::Deposit, owner, token, amount, next), keys)?;

        st.balances
            .entry(token.clone())
            .or_default()
            .insert(owner.clone(), next);
        st.meta.version += 1;
        st.journal.push(receipt.clone());
        Ok(receipt)
    }

    pub fn verify_journal(&self, keys: &KeyMaterial) -> JournalCheck {
        let st = self.state.read();
        journal::check(&st.journal, &st.balances, keys)
    }

    pub fn verify_chain(&self, keys: &KeyMaterial) -> JournalCheck {
        journal::check_chain(&self.state.read().journal, keys)
    }

    /// Replay of one token's receipts against its live entries.
    pub fn replay_problem(&self, token: &Address) -> Option<String> {
        let st = self.state.read();
        journal::replay_problem(&st.journal, &st.balances, Some(token))
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn fresh_state() -> LedgerState {
    LedgerState {
        meta: Meta { version: 0, created_at: chrono::Utc::now().to_rfc3339() },
        ..Default::default()
    }
}

fn entry_of(balances: &Balances, owner: &Address, token: &Address) -> Amount {
    balances
        .get(token)
        .and_then(|owners| owners.get(owner))
        .copied()
        .unwrap_or_default()
}

fn draft(
    st: &LedgerState,
    kind: OperationKind,
    owner: &Address,
    token: &Address,
    amount: Amount,
    balance_after: Amount,
) -> Receipt {
    Receipt {
        id: uuid::Uuid::new_v4().to_string(),
        seq: st.journal.len() as u64,
        kind,
        owner: owner.clone(),
        token: token.clone(),
        amount,
        balance_after,
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        previous_record_hash: st.journal.last().map(|r| r.record_hash.clone()),
        record_hash: "".into(),
        record_signature: None,
    }
}
