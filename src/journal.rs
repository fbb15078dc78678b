use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use serde_jcs::to_string as jcs_to_string;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::ledger::Balances;
use crate::types::*;

#[derive(Clone, Default)]
pub struct KeyMaterial {
    pub signing: Option<SigningKey>,
    pub verifying: Option<VerifyingKey>,
}

impl KeyMaterial {
    pub fn none() -> Self {
        Self::default()
    }

    /// Keys from base64 32-byte encodings. The verifying key falls back to the
    /// signing key's public half. Undecodable input yields no key.
    pub fn from_b64(priv_b64: Option<&str>, pub_b64: Option<&str>) -> Self {
        let signing: Option<SigningKey> = priv_b64
            .and_then(|s| B64.decode(s).ok())
            .and_then(|b| {
                let arr: [u8; 32] = b.as_slice().try_into().ok()?;
                Some(SigningKey::from_bytes(&arr))
            });

        let verifying: Option<VerifyingKey> = pub_b64
            .and_then(|s| B64.decode(s).ok())
            .and_then(|b| {
                let arr: [u8; 32] = b.as_slice().try_into().ok()?;
                VerifyingKey::from_bytes(&arr).ok()
            })
            .or_else(|| signing.as_ref().map(|sk| sk.verifying_key()));

        Self { signing, verifying }
    }

    pub fn sign_b64(&self, msg: &[u8]) -> Option<String> {
        self.signing.as_ref().map(|sk| {
            let sig: Signature = sk.sign(msg);
            B64.encode(sig.to_bytes())
        })
    }

    pub fn verify_sig_b64(&self, msg: &[u8], sig_b64: &str) -> bool {
        let vk = match &self.verifying { Some(v) => v, None => return false };
        let sig_bytes = match B64.decode(sig_b64) { Ok(b) => b, Err(_) => return false };
        let arr: [u8; 64] = match sig_bytes.as_slice().try_into() { Ok(a) => a, Err(_) => return false };
        let sig = Signature::from_bytes(&arr);
        vk.verify(msg, &sig).is_ok()
    }
}

// --------------------------
// JCS (RFC8785) + SHA-256
// --------------------------
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn jcs_hash<T: Serialize>(data: &T) -> Result<String, LedgerError> {
    let s = jcs_to_string(data)?;
    Ok(sha256_hex(s.as_bytes()))
}

/// Hash of a receipt with its own hash and signature blanked.
pub fn receipt_hash(receipt: &Receipt) -> Result<Hash, LedgerError> {
    let mut tmp = receipt.clone();
    tmp.record_hash = "".into();
    tmp.record_signature = None;
    jcs_hash(&tmp)
}

/// Fills `record_hash` and, when a signing key is loaded, `record_signature`.
pub fn seal(mut receipt: Receipt, keys: &KeyMaterial) -> Result<Receipt, LedgerError> {
    receipt.record_hash = receipt_hash(&receipt)?;
    receipt.record_signature = keys.sign_b64(receipt.record_hash.as_bytes());
    Ok(receipt)
}

// --------------------------
// Verification
// --------------------------

/// Walks the chain and replays every receipt from an empty ledger. The replay
/// must land exactly on `balances` (zero entries are ignored on both sides).
pub fn check(records: &[Receipt], balances: &Balances, keys: &KeyMaterial) -> JournalCheck {
    let mut out = check_chain(records, keys);
    if let Some(problem) = replay_problem(records, balances, None) {
        out.replay_matches = false;
        out.problems.push(problem);
    }
    out
}

/// Sequence, links, hashes and signatures only. `replay_matches` is left true.
pub fn check_chain(records: &[Receipt], keys: &KeyMaterial) -> JournalCheck {
    let mut problems = vec![];
    let mut chain_intact = true;
    let mut signatures_valid = true;

    let mut prev: Option<&Hash> = None;
    for (i, r) in records.iter().enumerate() {
        if r.seq != i as u64 {
            chain_intact = false;
            problems.push(format!("seq_gap: index {} carries seq {}", i, r.seq));
        }
        if r.previous_record_hash.as_ref() != prev {
            chain_intact = false;
            problems.push(format!("broken_link: seq {}", r.seq));
        }
        match receipt_hash(r) {
            Ok(h) if h == r.record_hash => {}
            Ok(_) => {
                chain_intact = false;
                problems.push(format!("hash_mismatch: seq {}", r.seq));
            }
            Err(e) => {
                chain_intact = false;
                problems.push(format!("hash_error: seq {}: {}", r.seq, e));
            }
        }
        if let (Some(sig), true) = (r.record_signature.as_deref(), keys.verifying.is_some()) {
            if !keys.verify_sig_b64(r.record_hash.as_bytes(), sig) {
                signatures_valid = false;
                problems.push(format!("bad_signature: seq {}", r.seq));
            }
        }
        prev = Some(&r.record_hash);
    }

    JournalCheck {
        records: records.len(),
        chain_intact,
        signatures_valid,
        replay_matches: true,
        problems,
    }
}

/// Replays the receipts (of one token, or all) and compares against
/// `balances`. `None` when they agree.
pub fn replay_problem(records: &[Receipt], balances: &Balances, token: Option<&Address>) -> Option<String> {
    let in_scope = |t: &Address| token.map_or(true, |only| only == t);
    let mut replay: Balances = BTreeMap::new();

    for r in records.iter().filter(|r| in_scope(&r.token)) {
        let entry = replay
            .entry(r.token.clone())
            .or_default()
            .entry(r.owner.clone())
            .or_default();
        let next = match r.kind {
            OperationKind::Deposit => entry.checked_add(r.amount),
            OperationKind::Withdraw => entry.checked_sub(r.amount),
        };
        match next {
            Some(v) => *entry = v,
            None => return Some(format!("replay_out_of_range: seq {}", r.seq)),
        }
    }

    let live: Vec<_> = non_zero(balances).into_iter().filter(|(t, _, _)| in_scope(t)).collect();
    if non_zero(&replay) != live {
        return Some(match token {
            Some(t) => format!("replay_diverges_from_balances: token {}", t),
            None => "replay_diverges_from_balances".into(),
        });
    }
    None
}

fn non_zero(b: &Balances) -> Vec<(&Address, &Address, Amount)> {
    b.iter()
        .flat_map(|(token, owners)| owners.iter().map(move |(owner, amt)| (token, owner, *amt)))
        .filter(|(_, _, amt)| !amt.is_zero())
        .collect()
}
