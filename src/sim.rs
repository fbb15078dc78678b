//! In-process ERC20 chain.
//!
//! Backs the service binary and the test suite. Semantics follow the usual
//! ERC20 rules: `approve` overwrites, `transferFrom` checks the allowance
//! before the holder's balance and spends the allowance.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::gateway::{GatewayError, TokenGateway};
use crate::types::{Address, Amount};

#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct TokenBook {
    pub total_supply: Amount,
    pub balances: BTreeMap<Address, Amount>,
    /// owner -> spender -> remaining allowance
    pub allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl TokenBook {
    fn balance(&self, holder: &Address) -> Amount {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or_default()
    }

    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), GatewayError> {
        let held = self.balance(from);
        let left = held
            .checked_sub(amount)
            .ok_or(GatewayError::InsufficientBalance { required: amount, held })?;
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or_else(|| GatewayError::Reverted("balance_overflow".into()))?;
        self.balances.insert(from.clone(), left);
        self.balances.insert(to.clone(), credited);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct ChainState {
    pub tokens: BTreeMap<Address, TokenBook>,
}

pub struct SimChain {
    state: RwLock<ChainState>,
}

impl Default for SimChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChain {
    pub fn new() -> Self {
        Self { state: RwLock::new(ChainState::default()) }
    }

    pub fn from_state(state: ChainState) -> Self {
        info!("⛓️  Sim chain mounted. tokens={}", state.tokens.len());
        Self { state: RwLock::new(state) }
    }

    pub fn snapshot(&self) -> ChainState {
        self.state.read().clone()
    }

    pub fn mint(&self, token: &Address, to: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let mut st = self.state.write();
        let book = st.tokens.entry(token.clone()).or_default();
        let supply = book.total_supply.checked_add(amount).ok_or(LedgerError::Overflow)?;
        let held = book.balance(to).checked_add(amount).ok_or(LedgerError::Overflow)?;
        book.total_supply = supply;
        book.balances.insert(to.clone(), held);
        debug!("mint token={} to={} amount={}", token, to, amount);
        Ok(held)
    }

    pub fn approve(&self, token: &Address, owner: &Address, spender: &Address, amount: Amount) {
        let mut st = self.state.write();
        let book = st.tokens.entry(token.clone()).or_default();
        book.allowances
            .entry(owner.clone())
            .or_default()
            .insert(spender.clone(), amount);
        debug!("approve token={} owner={} spender={} amount={}", token, owner, spender, amount);
    }

    pub fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> Amount {
        self.state
            .read()
            .tokens
            .get(token)
            .map(|b| b.allowance(owner, spender))
            .unwrap_or_default()
    }

    pub fn balance_of(&self, token: &Address, holder: &Address) -> Amount {
        self.state
            .read()
            .tokens
            .get(token)
            .map(|b| b.balance(holder))
            .unwrap_or_default()
    }

    pub fn total_supply(&self, token: &Address) -> Amount {
        self.state
            .read()
            .tokens
            .get(token)
            .map(|b| b.total_supply)
            .unwrap_or_default()
    }

    pub fn transfer(&self, token: &Address, from: &Address, to: &Address, amount: Amount) -> Result<(), GatewayError> {
        let mut st = self.state.write();
        let book = st.tokens.entry(token.clone()).or_default();
        book.move_balance(from, to, amount)
    }

    pub fn transfer_from(
        &self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), GatewayError> {
        let mut st = self.state.write();
        let book = st.tokens.entry(token.clone()).or_default();

        let granted = book.allowance(from, spender);
        let remaining = granted
            .checked_sub(amount)
            .ok_or(GatewayError::InsufficientAllowance { required: amount, granted })?;
        book.move_balance(from, to, amount)?;
        book.allowances
            .entry(from.clone())
            .or_default()
            .insert(spender.clone(), remaining);
        Ok(())
    }
}

/// [`TokenGateway`] over a [`SimChain`] for one custody account.
#[derive(Clone)]
pub struct SimGateway {
    chain: Arc<SimChain>,
    custody: Address,
}

impl SimGateway {
    pub fn new(chain: Arc<SimChain>, custody: Address) -> Self {
        Self { chain, custody }
    }

    pub fn chain(&self) -> &Arc<SimChain> {
        &self.chain
    }

    pub fn custody(&self) -> &Address {
        &self.custody
    }
}

impl TokenGateway for SimGateway {
    fn allowance(&self, owner: &Address, spender: &Address, token: &Address) -> Result<Amount, GatewayError> {
        Ok(self.chain.allowance(token, owner, spender))
    }

    fn pull_from(&self, payer: &Address, token: &Address, amount: Amount) -> Result<(), GatewayError> {
        self.chain.transfer_from(token, &self.custody, payer, &self.custody, amount)
    }

    fn push_to(&self, payee: &Address, token: &Address, amount: Amount) -> Result<(), GatewayError> {
        let custodied = self.chain.balance_of(token, &self.custody);
        if custodied < amount {
            return Err(GatewayError::InsufficientCustody { required: amount, custodied });
        }
        self.chain.transfer(token, &self.custody, payee, amount)
    }

    fn custodied_balance(&self, token: &Address) -> Result<Amount, GatewayError> {
        Ok(self.chain.balance_of(token, &self.custody))
    }
}
