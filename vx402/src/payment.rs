//! Payment and access-token records.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::chain::{Chain, TxTransfer};
use crate::time::UnixTimestamp;

/// Opaque surrogate key for a payment record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PaymentId(pub u64);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a payment.
///
/// A payment enters `PendingConfirmation` on the first verification attempt
/// that finds the transaction but not enough confirmations. It moves to
/// `Verified` once all checks pass, or to `Rejected` on a terminal failure
/// (wrong recipient, wrong amount, high risk). Insufficient confirmations is
/// retryable and never causes `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Transaction found but below the confirmation threshold.
    PendingConfirmation,
    /// All checks passed; a token may be issued.
    Verified,
    /// A terminal check failed; no token can ever be issued for this payment.
    Rejected,
}

/// Durable record of one on-chain payment.
///
/// The `(chain, tx_hash)` pair is unique: replaying the same transaction hash
/// can never mint a second token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Surrogate key assigned by the store.
    pub id: PaymentId,
    /// On-chain transaction hash, the natural idempotency key.
    pub tx_hash: String,
    /// Chain the transaction was observed on.
    pub chain: Chain,
    /// Transfer amount in whole USDC.
    pub amount: Decimal,
    /// Paying address.
    pub from_address: String,
    /// Receiving address.
    pub to_address: String,
    /// Block number (slot on Solana) containing the transaction.
    pub block_number: u64,
    /// Confirmation count observed at the most recent verification attempt.
    pub confirmations: u64,
    /// Risk score in `[0.0, 1.0]` computed at verification time.
    pub risk_score: f64,
    /// Current lifecycle state.
    pub status: PaymentStatus,
    /// Error code of the terminal failure, for audit. `None` unless
    /// `status == Rejected`.
    pub reject_reason: Option<String>,
    /// Protected-API calls this payment buys.
    pub requests_allocated: u32,
    /// Calls consumed so far. Invariant: `requests_used <= requests_allocated`.
    pub requests_used: u32,
    /// When the record was first created.
    pub created_at: UnixTimestamp,
    /// When the payment reached `Verified`, if it has.
    pub verified_at: Option<UnixTimestamp>,
}

impl Payment {
    /// Builds a fresh record from an observed transfer. The store assigns the
    /// real id on insert.
    #[must_use]
    pub fn from_transfer(
        tx_hash: &str,
        chain: Chain,
        transfer: &TxTransfer,
        risk_score: f64,
        status: PaymentStatus,
    ) -> Self {
        Self {
            id: PaymentId(0),
            tx_hash: tx_hash.to_owned(),
            chain,
            amount: transfer.amount,
            from_address: transfer.from.clone(),
            to_address: transfer.to.clone(),
            block_number: transfer.block_number,
            confirmations: transfer.confirmations,
            risk_score,
            status,
            reject_reason: None,
            requests_allocated: 0,
            requests_used: 0,
            created_at: UnixTimestamp::now(),
            verified_at: None,
        }
    }

    /// Remaining quota allocated to this payment.
    #[must_use]
    pub const fn requests_remaining(&self) -> u32 {
        self.requests_allocated.saturating_sub(self.requests_used)
    }
}

/// Access-token record. Only the SHA-256 hash of the token is ever stored;
/// the plaintext is returned once at issuance and cannot be recovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Hex SHA-256 of the plaintext token.
    pub token_hash: String,
    /// The payment this token was minted from. Exactly one token may exist
    /// per payment.
    pub payment_id: PaymentId,
    /// Remaining quota; monotonically non-increasing.
    pub requests_remaining: u32,
    /// Hard expiry. A token past this instant is invalid regardless of
    /// remaining quota.
    pub expires_at: UnixTimestamp,
    /// Issuance time.
    pub created_at: UnixTimestamp,
}

/// Snapshot of transfer details returned to the client after verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    /// Transaction hash as submitted.
    pub tx_hash: String,
    /// Chain the payment was made on.
    pub chain: Chain,
    /// Transfer amount in whole USDC, serialized as a string.
    pub amount_usdc: Decimal,
    /// Paying address.
    pub from_address: String,
    /// Receiving address.
    pub to_address: String,
    /// Confirmations at verification time.
    pub confirmations: u64,
    /// Block number (slot on Solana).
    pub block_number: u64,
    /// Computed risk score.
    pub risk_score: f64,
}

/// Successful outcome of [`crate::verify::PaymentVerifier::verify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedPayment {
    /// Id of the verified payment record.
    pub payment_id: PaymentId,
    /// Calls the payment buys.
    pub requests_allocated: u32,
    /// Transfer details.
    pub verification: Verification,
}
