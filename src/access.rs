use std::collections::BTreeSet;

use crate::error::LedgerError;
use crate::types::Address;

/// Who may act on which balance entry.
///
/// Entries are caller-bound: a caller only ever credits or debits its own
/// entry. When a participant set is configured, callers outside it are
/// refused outright.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    participants: Option<BTreeSet<Address>>,
}

impl AccessPolicy {
    pub fn open() -> Self {
        Self { participants: None }
    }

    pub fn with_participants<I: IntoIterator<Item = Address>>(participants: I) -> Self {
        let set: BTreeSet<Address> = participants.into_iter().collect();
        Self { participants: if set.is_empty() { None } else { Some(set) } }
    }

    pub fn participants(&self) -> Option<&BTreeSet<Address>> {
        self.participants.as_ref()
    }

    pub fn authorize(&self, caller: &Address, owner: &Address) -> Result<(), LedgerError> {
        if caller != owner {
            return Err(LedgerError::Unauthorized);
        }
        match &self.participants {
            Some(set) if !set.contains(caller) => Err(LedgerError::Unauthorized),
            _ => Ok(()),
        }
    }
}
