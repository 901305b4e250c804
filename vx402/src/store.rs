//! Persistence contract and the in-memory store.
//!
//! [`PaymentStore`] is the seam between the verification core and storage.
//! The one operation with real concurrency teeth is
//! [`PaymentStore::decrement_remaining`]: it must be atomic at the store
//! level, never a read-then-write at the caller, so that a token with quota
//! `N` yields exactly `N` successful consumptions under concurrent callers.
//!
//! [`MemoryStore`] implements the contract over `dashmap`. `get_mut` holds
//! the shard write lock for the duration of the decrement, which makes the
//! check-and-decrement a single serialized operation. Durable backends (SQL
//! with `UPDATE ... WHERE remaining > 0 RETURNING remaining`) implement the
//! same trait.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::chain::Chain;
use crate::error::StoreError;
use crate::payment::{AccessToken, Payment, PaymentId, PaymentStatus};
use crate::time::UnixTimestamp;

/// Result of an atomic quota decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Decrement succeeded; this many requests remain afterwards.
    Remaining(u32),
    /// Quota was already zero; nothing was decremented.
    Exhausted,
}

/// Filter for [`PaymentStore::stats`].
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    /// Restrict to one chain.
    pub chain: Option<Chain>,
    /// Restrict to one paying address.
    pub from_address: Option<String>,
}

/// Aggregate counters over payment records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaymentStats {
    /// All payment records matching the filter.
    pub total_payments: u64,
    /// Records in `Verified` state.
    pub verified_payments: u64,
    /// Records in `Rejected` state.
    pub rejected_payments: u64,
    /// Records in `PendingConfirmation` state.
    pub pending_payments: u64,
    /// Sum of verified amounts, in USDC.
    pub total_amount_usdc: Decimal,
    /// Sum of allocated request quotas.
    pub total_requests_allocated: u64,
    /// Sum of consumed requests.
    pub total_requests_used: u64,
    /// Distinct paying addresses.
    pub unique_payers: u64,
}

/// Durable record of payments, tokens, and usage counters.
#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new payment, assigning its id.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicatePayment`] when a record for the same
    /// `(chain, tx_hash)` already exists.
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError>;

    /// Replaces an existing payment record by id.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::PaymentMissing`] when the id is unknown.
    async fn update_payment(&self, payment: Payment) -> Result<(), StoreError>;

    /// Looks up a payment by its natural key.
    ///
    /// # Errors
    ///
    /// Fails only on backend faults.
    async fn find_payment_by_tx_hash(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Looks up a payment by id.
    ///
    /// # Errors
    ///
    /// Fails only on backend faults.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    /// Inserts a token, enforcing one token per payment.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::DuplicateToken`] when the payment already has
    /// a token.
    async fn insert_token(&self, token: AccessToken) -> Result<(), StoreError>;

    /// Looks up a token by the hash of its plaintext.
    ///
    /// # Errors
    ///
    /// Fails only on backend faults.
    async fn find_token(&self, token_hash: &str) -> Result<Option<AccessToken>, StoreError>;

    /// Looks up the token minted from a payment, if any.
    ///
    /// # Errors
    ///
    /// Fails only on backend faults.
    async fn find_token_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<AccessToken>, StoreError>;

    /// Atomically decrements a token's remaining quota if it is positive,
    /// and bumps the owning payment's `requests_used` on success.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::TokenMissing`] when the hash is unknown.
    async fn decrement_remaining(
        &self,
        token_hash: &str,
    ) -> Result<DecrementOutcome, StoreError>;

    /// Deletes tokens whose expiry is at or before `now`, returning how many
    /// were removed. The owning payment records are kept for audit.
    ///
    /// # Errors
    ///
    /// Fails only on backend faults.
    async fn purge_expired_tokens(&self, now: UnixTimestamp) -> Result<u64, StoreError>;

    /// Aggregate counters over matching payments.
    ///
    /// # Errors
    ///
    /// Fails only on backend faults.
    async fn stats(&self, filter: &StatsFilter) -> Result<PaymentStats, StoreError>;
}

/// Tx hashes on EVM chains are hex and case-insensitive; normalize so the
/// natural key is stable.
fn tx_key(chain: Chain, tx_hash: &str) -> (Chain, String) {
    if chain.is_evm() {
        (chain, tx_hash.to_ascii_lowercase())
    } else {
        (chain, tx_hash.to_owned())
    }
}

/// In-memory [`PaymentStore`] backed by sharded concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicU64,
    payments: DashMap<PaymentId, Payment>,
    tx_index: DashMap<(Chain, String), PaymentId>,
    tokens: DashMap<String, AccessToken>,
    token_by_payment: DashMap<PaymentId, String>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, mut payment: Payment) -> Result<Payment, StoreError> {
        let key = tx_key(payment.chain, &payment.tx_hash);
        match self.tx_index.entry(key) {
            Entry::Occupied(existing) => Err(StoreError::DuplicatePayment {
                chain: payment.chain,
                tx_hash: payment.tx_hash,
                payment_id: *existing.get(),
            }),
            Entry::Vacant(slot) => {
                let id = PaymentId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                payment.id = id;
                slot.insert(id);
                self.payments.insert(id, payment.clone());
                Ok(payment)
            }
        }
    }

    async fn update_payment(&self, payment: Payment) -> Result<(), StoreError> {
        match self.payments.get_mut(&payment.id) {
            Some(mut slot) => {
                *slot = payment;
                Ok(())
            }
            None => Err(StoreError::PaymentMissing(payment.id)),
        }
    }

    async fn find_payment_by_tx_hash(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let key = tx_key(chain, tx_hash);
        let Some(id) = self.tx_index.get(&key).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self.payments.get(&id).map(|r| r.clone()))
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.get(&id).map(|r| r.clone()))
    }

    async fn insert_token(&self, token: AccessToken) -> Result<(), StoreError> {
        match self.token_by_payment.entry(token.payment_id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateToken(token.payment_id)),
            Entry::Vacant(slot) => {
                slot.insert(token.token_hash.clone());
                self.tokens.insert(token.token_hash.clone(), token);
                Ok(())
            }
        }
    }

    async fn find_token(&self, token_hash: &str) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.tokens.get(token_hash).map(|r| r.clone()))
    }

    async fn find_token_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<AccessToken>, StoreError> {
        let Some(hash) = self.token_by_payment.get(&payment_id).map(|r| r.clone()) else {
            return Ok(None);
        };
        self.find_token(&hash).await
    }

    async fn decrement_remaining(
        &self,
        token_hash: &str,
    ) -> Result<DecrementOutcome, StoreError> {
        // The shard write lock held by `get_mut` serializes the
        // check-and-decrement; concurrent callers cannot both observe the
        // same positive count.
        let (payment_id, remaining) = {
            let Some(mut token) = self.tokens.get_mut(token_hash) else {
                return Err(StoreError::TokenMissing);
            };
            if token.requests_remaining == 0 {
                return Ok(DecrementOutcome::Exhausted);
            }
            token.requests_remaining -= 1;
            (token.payment_id, token.requests_remaining)
        };

        if let Some(mut payment) = self.payments.get_mut(&payment_id) {
            payment.requests_used = payment
                .requests_used
                .saturating_add(1)
                .min(payment.requests_allocated);
        }
        Ok(DecrementOutcome::Remaining(remaining))
    }

    async fn purge_expired_tokens(&self, now: UnixTimestamp) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        self.tokens.retain(|_, token| {
            let live = token.expires_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        self.token_by_payment
            .retain(|_, hash| self.tokens.contains_key(hash));
        Ok(removed)
    }

    async fn stats(&self, filter: &StatsFilter) -> Result<PaymentStats, StoreError> {
        let mut stats = PaymentStats::default();
        let mut payers = std::collections::HashSet::new();

        for entry in &self.payments {
            let payment = entry.value();
            if filter.chain.is_some_and(|c| c != payment.chain) {
                continue;
            }
            if filter
                .from_address
                .as_deref()
                .is_some_and(|a| !payment.chain.addresses_match(a, &payment.from_address))
            {
                continue;
            }

            stats.total_payments += 1;
            match payment.status {
                PaymentStatus::Verified => {
                    stats.verified_payments += 1;
                    stats.total_amount_usdc += payment.amount;
                    stats.total_requests_allocated += u64::from(payment.requests_allocated);
                    stats.total_requests_used += u64::from(payment.requests_used);
                }
                PaymentStatus::Rejected => stats.rejected_payments += 1,
                PaymentStatus::PendingConfirmation => stats.pending_payments += 1,
            }
            payers.insert(payment.from_address.clone());
        }

        stats.unique_payers = payers.len() as u64;
        Ok(stats)
    }
}
