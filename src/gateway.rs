//! Seam to the external fungible-token primitive.
//!
//! The custodian never touches token state directly: it asks a [`TokenGateway`]
//! to pull tokens into custody, push them out, and report what custody holds.
//! Implementations are untrusted. A call may revert, time out, move less than
//! asked, or call back into the custodian before returning.

use thiserror::Error;

use crate::error::LedgerError;
use crate::types::{Address, Amount};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("insufficient allowance: required {required}, granted {granted}")]
    InsufficientAllowance { required: Amount, granted: Amount },
    #[error("insufficient balance: required {required}, held {held}")]
    InsufficientBalance { required: Amount, held: Amount },
    #[error("insufficient custody: required {required}, custodied {custodied}")]
    InsufficientCustody { required: Amount, custodied: Amount },
    #[error("timed out")]
    Timeout,
    #[error("reverted: {0}")]
    Reverted(String),
}

impl From<GatewayError> for LedgerError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InsufficientAllowance { required, granted } => {
                LedgerError::InsufficientAllowance { required, granted }
            }
            GatewayError::InsufficientBalance { required, .. } => {
                LedgerError::InsufficientBalance { required }
            }
            GatewayError::InsufficientCustody { required, custodied } => LedgerError::ConsistencyViolation(
                format!("custody_short: required {} custodied {}", required, custodied),
            ),
            GatewayError::Timeout => LedgerError::GatewayFailure("timeout".into()),
            GatewayError::Reverted(reason) => LedgerError::GatewayFailure(format!("reverted: {}", reason)),
        }
    }
}

/// ERC20-style primitive as seen from the custody account.
pub trait TokenGateway: Send + Sync {
    /// Allowance `owner` granted to `spender` on `token`.
    fn allowance(&self, owner: &Address, spender: &Address, token: &Address) -> Result<Amount, GatewayError>;

    /// Move `amount` of `token` from `payer` into custody (`transferFrom`).
    fn pull_from(&self, payer: &Address, token: &Address, amount: Amount) -> Result<(), GatewayError>;

    /// Move `amount` of custodied `token` out to `payee` (`transfer`).
    fn push_to(&self, payee: &Address, token: &Address, amount: Amount) -> Result<(), GatewayError>;

    /// Tokens currently held by the custody account.
    fn custodied_balance(&self, token: &Address) -> Result<Amount, GatewayError>;
}

impl<G: TokenGateway + ?Sized> TokenGateway for std::sync::Arc<G> {
    fn allowance(&self, owner: &Address, spender: &Address, token: &Address) -> Result<Amount, GatewayError> {
        (**self).allowance(owner, spender, token)
    }

    fn pull_from(&self, payer: &Address, token: &Address, amount: Amount) -> Result<(), GatewayError> {
        (**self).pull_from(payer, token, amount)
    }

    fn push_to(&self, payee: &Address, token: &Address, amount: Amount) -> Result<(), GatewayError> {
        (**self).push_to(payee, token, amount)
    }

    fn custodied_balance(&self, token: &Address) -> Result<Amount, GatewayError> {
        (**self).custodied_balance(token)
    }
}
