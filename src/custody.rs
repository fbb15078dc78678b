//! Deposit / withdraw protocol.
//!
//! Deposit pulls first and credits after, so a failed pull never leaves a
//! phantom balance. The credit is the amount custody was seen to receive,
//! never the amount asked for. Withdraw debits first and pushes after, so a token that
//! calls back into the custodian while its transfer is in flight already
//! sees the reduced entry. A failed push re-credits the entry before the
//! error is reported.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::access::AccessPolicy;
use crate::error::LedgerError;
use crate::gateway::TokenGateway;
use crate::journal::KeyMaterial;
use crate::ledger::Ledger;
use crate::types::*;

pub struct Custodian<G> {
    ledger: Ledger,
    gateway: G,
    custody: Address,
    access: AccessPolicy,
    keys: KeyMaterial,
    // One per token: operations on a token run one at a time (same-thread
    // reentry allowed), which keeps the per-token solvency check exact.
    token_gates: Mutex<HashMap<Address, Arc<ReentrantMutex<()>>>>,
}

impl<G: TokenGateway> Custodian<G> {
    pub fn new(ledger: Ledger, gateway: G, custody: Address) -> Self {
        Self {
            ledger,
            gateway,
            custody,
            access: AccessPolicy::open(),
            keys: KeyMaterial::none(),
            token_gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_access(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    pub fn with_keys(mut self, keys: KeyMaterial) -> Self {
        self.keys = keys;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn custody_address(&self) -> &Address {
        &self.custody
    }

    fn token_gate(&self, token: &Address) -> Arc<ReentrantMutex<()>> {
        self.token_gates
            .lock()
            .entry(token.clone())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    // --------------------------
    // Deposit
    // --------------------------
    pub fn deposit(&self, caller: &Address, token: &Address, amount: Amount) -> Result<Receipt, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        self.access.authorize(caller, caller)?;

        let gate = self.token_gate(token);
        let _serial = gate.lock();

        // Checked before the pull: tokens that could never be credited are not taken.
        self.ledger
            .balance_of(caller, token)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        let granted = self.gateway.allowance(caller, &self.custody, token)?;
        if granted < amount {
            warn!("deposit refused owner={} token={} amount={} allowance={}", caller, token, amount, granted);
            return Err(LedgerError::InsufficientAllowance { required: amount, granted });
        }

        let before = self.gateway.custodied_balance(token)?;
        if let Err(e) = self.gateway.pull_from(caller, token, amount) {
            warn!("deposit pull failed owner={} token={} amount={} err={}", caller, token, amount, e);
            return Err(e.into());
        }
        let after = self.gateway.custodied_balance(token)?;

        // Only what actually arrived may be credited, whatever surplus custody already holds.
        let received = after.checked_sub(before).unwrap_or_default();
        if received != amount {
            error!(
                "deposit short transfer owner={} token={} amount={} received={}",
                caller, token, amount, received
            );
            return Err(LedgerError::ConsistencyViolation(format!(
                "short_transfer: token {} pulled {} but custody received {}",
                token, amount, received
            )));
        }
        self.ensure_covered(token, amount, after)?;

        let receipt = self.ledger.credit_recorded(caller, token, amount, &self.keys)?;
        info!(
            "deposit owner={} token={} amount={} balance={} seq={}",
            caller, token, amount, receipt.balance_after, receipt.seq
        );
        Ok(receipt)
    }

    // --------------------------
    // Withdraw
    // --------------------------
    pub fn withdraw(
        &self,
        caller: &Address,
        owner: &Address,
        token: &Address,
        amount: Amount,
    ) -> Result<Receipt, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        self.access.authorize(caller, owner)?;

        let gate = self.token_gate(token);
        let _serial = gate.lock();

        let pending = match PendingDebit::take(&self.ledger, owner, token, amount) {
            Ok(p) => p,
            Err(e) => {
                warn!("withdraw refused owner={} token={} amount={} err={}", owner, token, amount, e);
                return Err(e);
            }
        };

        if let Err(e) = self.gateway.push_to(owner, token, amount) {
            let err = LedgerError::from(e);
            pending.compensate()?;
            match &err {
                LedgerError::ConsistencyViolation(msg) => {
                    error!("withdraw hit short custody owner={} token={} amount={} detail={}", owner, token, amount, msg)
                }
                _ => warn!("withdraw push failed, entry restored owner={} token={} amount={} err={}", owner, token, amount, err),
            }
            return Err(err);
        }
        pending.settle();

        let receipt = self.ledger.record(OperationKind::Withdraw, owner, token, amount, &self.keys)?;
        info!(
            "withdraw owner={} token={} amount={} balance={} seq={}",
            owner, token, amount, receipt.balance_after, receipt.seq
        );
        Ok(receipt)
    }

    // --------------------------
    // Queries
    // --------------------------
    pub fn balance_of(&self, owner: &Address, token: &Address) -> Amount {
        self.ledger.balance_of(owner, token)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address, token: &Address) -> Result<Amount, LedgerError> {
        Ok(self.gateway.allowance(owner, spender, token)?)
    }

    pub fn custodied_balance(&self, token: &Address) -> Result<Amount, LedgerError> {
        Ok(self.gateway.custodied_balance(token)?)
    }

    /// Per-token solvency plus journal verification. Each token's replay is
    /// compared under that token's gate, so an in-flight withdraw is never
    /// mistaken for divergence.
    pub fn audit(&self) -> Result<AuditReport, LedgerError> {
        let mut tokens = vec![];
        let mut diverged = vec![];
        for token in self.ledger.tokens() {
            let gate = self.token_gate(&token);
            let _serial = gate.lock();
            let obligations = self.ledger.obligations(&token)?;
            let custodied = self.gateway.custodied_balance(&token)?;
            diverged.extend(self.ledger.replay_problem(&token));
            tokens.push(TokenSolvency { token, obligations, custodied, solvent: obligations <= custodied });
        }

        let mut journal = self.ledger.verify_chain(&self.keys);
        if !diverged.is_empty() {
            journal.replay_matches = false;
            journal.problems.extend(diverged);
        }
        Ok(AuditReport { tokens, journal })
    }

    /// Obligations plus `incoming` must stay within what custody holds.
    fn ensure_covered(&self, token: &Address, incoming: Amount, custodied: Amount) -> Result<(), LedgerError> {
        let owed = self
            .ledger
            .obligations(token)?
            .checked_add(incoming)
            .ok_or(LedgerError::Overflow)?;
        if owed > custodied {
            error!("solvency broken token={} obligations={} custodied={}", token, owed, custodied);
            return Err(LedgerError::ConsistencyViolation(format!(
                "insolvent: token {} would owe {} but custodies {}",
                token, owed, custodied
            )));
        }
        Ok(())
    }
}

/// A debit that is undone unless settled. Dropping it unsettled (early
/// return, panic in the gateway) re-credits the entry.
struct PendingDebit<'a> {
    ledger: &'a Ledger,
    owner: &'a Address,
    token: &'a Address,
    amount: Amount,
    armed: bool,
}

impl<'a> PendingDebit<'a> {
    fn take(ledger: &'a Ledger, owner: &'a Address, token: &'a Address, amount: Amount) -> Result<Self, LedgerError> {
        ledger.debit(owner, token, amount)?;
        Ok(Self { ledger, owner, token, amount, armed: true })
    }

    fn settle(mut self) {
        self.armed = false;
    }

    fn compensate(mut self) -> Result<(), LedgerError> {
        self.armed = false;
        self.ledger.credit(self.owner, self.token, self.amount).map(|_| ()).map_err(|e| {
            error!("compensation failed owner={} token={} amount={} err={}", self.owner, self.token, self.amount, e);
            LedgerError::ConsistencyViolation(format!("compensation_failed: {}", e))
        })
    }
}

impl Drop for PendingDebit<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.ledger.credit(self.owner, self.token, self.amount) {
            Ok(_) => warn!("withdraw abandoned, entry restored owner={} token={} amount={}", self.owner, self.token, self.amount),
            Err(e) => error!("compensation failed owner={} token={} amount={} err={}", self.owner, self.token, self.amount, e),
        }
    }
}
