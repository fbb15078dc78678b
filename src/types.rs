use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

pub type Hash = String;
pub type Timestamp = String;

// ----------------------
// Address
// ----------------------

/// Account or token-contract identity: `0x` + 40 hex digits, kept lower case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let s = raw.trim();
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| LedgerError::Validation(format!("address_missing_0x: '{}'", raw)))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LedgerError::Validation(format!("address_malformed: '{}'", raw)));
        }
        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = LedgerError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = LedgerError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------
// Amount
// ----------------------

/// Token quantity in base units. All arithmetic is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(v: u128) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(v as u128)
    }
}

impl FromStr for Amount {
    type Err = LedgerError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Amount)
            .map_err(|_| LedgerError::Validation(format!("amount_malformed: '{}'", s)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Decimal string on the wire: token amounts routinely exceed 2^53.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(v as u128))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
                Ok(Amount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u128::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom("amount must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.trim()
                    .parse::<u128>()
                    .map(Amount)
                    .map_err(|_| E::custom(format!("invalid amount '{}'", v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

// ----------------------
// Journal
// ----------------------
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdraw,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Receipt {
    pub id: String,
    pub seq: u64,
    pub kind: OperationKind,
    pub owner: Address,
    pub token: Address,
    pub amount: Amount,
    pub balance_after: Amount,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub previous_record_hash: Option<Hash>,
    pub record_hash: Hash,
    #[serde(default)]
    pub record_signature: Option<String>, // base64(ed25519(sig(record_hash bytes)))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JournalCheck {
    pub records: usize,
    pub chain_intact: bool,
    pub signatures_valid: bool,
    pub replay_matches: bool,
    #[serde(default)]
    pub problems: Vec<String>,
}

impl JournalCheck {
    pub fn is_ok(&self) -> bool {
        self.chain_intact && self.signatures_valid && self.replay_matches
    }
}

// ----------------------
// Audit
// ----------------------
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenSolvency {
    pub token: Address,
    pub obligations: Amount,
    pub custodied: Amount,
    pub solvent: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub tokens: Vec<TokenSolvency>,
    pub journal: JournalCheck,
}

impl AuditReport {
    pub fn is_healthy(&self) -> bool {
        self.journal.is_ok() && self.tokens.iter().all(|t| t.solvent)
    }
}

// ----------------------
// API
// ----------------------
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DepositReq {
    pub token: Address,
    pub amount: Amount,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WithdrawReq {
    pub token: Address,
    pub amount: Amount,
    #[serde(default)]
    pub owner: Option<Address>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MintReq {
    pub token: Address,
    pub to: Address,
    pub amount: Amount,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApproveReq {
    pub token: Address,
    pub spender: Address,
    pub amount: Amount,
}
