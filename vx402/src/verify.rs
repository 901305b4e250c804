//! The payment verification state machine.
//!
//! [`PaymentVerifier::verify`] drives a submitted `(tx_hash, chain)` through
//! the full check sequence:
//!
//! 1. replay guard — a hash that already funded a `Verified` payment is
//!    terminally rejected
//! 2. transaction fetch via the chain's [`ChainAdapter`]
//! 3. confirmation threshold (retryable; re-read on every call)
//! 4. recipient must equal the configured payment address
//! 5. amount must clear the minimum and any client-stated expectation
//! 6. risk score must stay under the threshold
//! 7. mark `Verified` and allocate the request quota
//!
//! Steps 4-6 are terminal: the record moves to `Rejected` and stays there.
//! Step 3 persists (or refreshes) a `PendingConfirmation` record so the
//! payment's history is auditable across retries.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::chain::{Chain, ChainAdapter, TxTransfer};
use crate::config::X402Config;
use crate::error::{StoreError, VerifyError};
use crate::payment::{Payment, PaymentStatus, Verification, VerifiedPayment};
use crate::risk;
use crate::store::PaymentStore;
use crate::time::UnixTimestamp;

/// Drives payment verification across all configured chains.
pub struct PaymentVerifier<S> {
    config: Arc<X402Config>,
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
    store: Arc<S>,
}

impl<S> std::fmt::Debug for PaymentVerifier<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentVerifier")
            .field("chains", &self.adapters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<S: PaymentStore> PaymentVerifier<S> {
    /// Creates a verifier with no adapters registered.
    pub fn new(config: Arc<X402Config>, store: Arc<S>) -> Self {
        Self {
            config,
            adapters: HashMap::new(),
            store,
        }
    }

    /// Registers the adapter for one chain, replacing any previous one.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain(), adapter);
    }

    /// Builder-style adapter registration.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.register_adapter(adapter);
        self
    }

    /// Verifies an on-chain payment.
    ///
    /// Retryable failures (`TransactionNotFound`, `InsufficientConfirmations`,
    /// `ChainUnavailable`) leave the door open for a later call with the same
    /// hash; terminal failures reject the record permanently.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] for every non-verified outcome; see the module
    /// docs for the check sequence.
    pub async fn verify(
        &self,
        tx_hash: &str,
        chain: Chain,
        expected_amount: Option<Decimal>,
    ) -> Result<VerifiedPayment, VerifyError> {
        let settings = self
            .config
            .chain(chain)
            .ok_or_else(|| VerifyError::UnsupportedChain(chain.name().to_owned()))?;
        let adapter = self
            .adapters
            .get(&chain)
            .ok_or_else(|| VerifyError::UnsupportedChain(chain.name().to_owned()))?;

        // Replay guard: one on-chain transfer funds at most one token.
        let existing = self.store.find_payment_by_tx_hash(chain, tx_hash).await?;
        if let Some(ref payment) = existing {
            if payment.status == PaymentStatus::Verified {
                return Err(VerifyError::PaymentAlreadyUsed {
                    chain,
                    tx_hash: tx_hash.to_owned(),
                    payment_id: payment.id,
                });
            }
        }

        let transfer = adapter
            .fetch_transaction(tx_hash)
            .await
            .map_err(|err| VerifyError::from_adapter(chain, err))?;

        // Confirmations are re-read on every attempt; an earlier shortfall is
        // never cached as a failure.
        let required = settings.required_confirmations;
        if transfer.confirmations < required {
            self.persist(
                existing,
                tx_hash,
                chain,
                &transfer,
                PaymentStatus::PendingConfirmation,
                0.0,
                0,
                None,
            )
            .await?;
            return Err(VerifyError::InsufficientConfirmations {
                current: transfer.confirmations,
                required,
            });
        }

        if !chain.addresses_match(&transfer.to, &settings.payment_address) {
            let err = VerifyError::InvalidRecipient {
                expected: settings.payment_address.clone(),
                actual: transfer.to.clone(),
            };
            self.reject(existing, tx_hash, chain, &transfer, 1.0, &err)
                .await?;
            return Err(err);
        }

        let amount_ok = transfer.amount >= self.config.pricing.min_payment
            && expected_amount.is_none_or(|expected| transfer.amount >= expected);
        if !amount_ok {
            let err = VerifyError::InvalidPaymentAmount {
                actual: transfer.amount,
                minimum: self.config.pricing.min_payment,
                expected: expected_amount,
            };
            self.reject(existing, tx_hash, chain, &transfer, 0.7, &err)
                .await?;
            return Err(err);
        }

        let score = risk::score_transfer(transfer.amount, transfer.confirmations, required, chain);
        if score > self.config.risk_threshold {
            let err = VerifyError::HighRiskScore {
                score,
                threshold: self.config.risk_threshold,
            };
            self.reject(existing, tx_hash, chain, &transfer, score, &err)
                .await?;
            return Err(err);
        }

        let requests_allocated = self.config.pricing.requests_for(transfer.amount);
        let payment = self
            .persist(
                existing,
                tx_hash,
                chain,
                &transfer,
                PaymentStatus::Verified,
                score,
                requests_allocated,
                Some(UnixTimestamp::now()),
            )
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            %chain,
            tx_hash,
            amount = %transfer.amount,
            confirmations = transfer.confirmations,
            risk_score = score,
            requests_allocated,
            "payment verified"
        );

        Ok(VerifiedPayment {
            payment_id: payment.id,
            requests_allocated,
            verification: Verification {
                tx_hash: tx_hash.to_owned(),
                chain,
                amount_usdc: transfer.amount,
                from_address: transfer.from,
                to_address: transfer.to,
                confirmations: transfer.confirmations,
                block_number: transfer.block_number,
                risk_score: score,
            },
        })
    }

    /// Records a terminal rejection for audit before surfacing the error.
    async fn reject(
        &self,
        existing: Option<Payment>,
        tx_hash: &str,
        chain: Chain,
        transfer: &TxTransfer,
        risk_score: f64,
        err: &VerifyError,
    ) -> Result<(), VerifyError> {
        tracing::warn!(
            %chain,
            tx_hash,
            error_code = err.error_code(),
            "payment rejected"
        );
        let mut payment = self
            .persist(
                existing,
                tx_hash,
                chain,
                transfer,
                PaymentStatus::Rejected,
                risk_score,
                0,
                None,
            )
            .await?;
        payment.reject_reason = Some(err.error_code().to_owned());
        self.store.update_payment(payment).await?;
        Ok(())
    }

    /// Inserts or refreshes the payment record for this transaction,
    /// preserving id, creation time, and usage across attempts.
    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        existing: Option<Payment>,
        tx_hash: &str,
        chain: Chain,
        transfer: &TxTransfer,
        status: PaymentStatus,
        risk_score: f64,
        requests_allocated: u32,
        verified_at: Option<UnixTimestamp>,
    ) -> Result<Payment, VerifyError> {
        if let Some(mut payment) = existing {
            refresh(
                &mut payment,
                transfer,
                status,
                risk_score,
                requests_allocated,
                verified_at,
            );
            self.store.update_payment(payment.clone()).await?;
            return Ok(payment);
        }

        let mut payment = Payment::from_transfer(tx_hash, chain, transfer, risk_score, status);
        payment.requests_allocated = requests_allocated;
        payment.verified_at = verified_at;
        match self.store.insert_payment(payment).await {
            Ok(payment) => Ok(payment),
            // Lost a race with a concurrent verify of the same hash. Only a
            // record the winner actually verified is terminal; a pending one
            // is refreshed so this attempt's outcome stays retryable.
            Err(StoreError::DuplicatePayment { payment_id, .. }) => {
                let mut payment = self
                    .store
                    .get_payment(payment_id)
                    .await?
                    .ok_or(StoreError::PaymentMissing(payment_id))?;
                if payment.status == PaymentStatus::Verified {
                    return Err(VerifyError::PaymentAlreadyUsed {
                        chain,
                        tx_hash: tx_hash.to_owned(),
                        payment_id,
                    });
                }
                refresh(
                    &mut payment,
                    transfer,
                    status,
                    risk_score,
                    requests_allocated,
                    verified_at,
                );
                self.store.update_payment(payment.clone()).await?;
                Ok(payment)
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// Overwrites a record's transfer snapshot and outcome, keeping its id,
/// creation time, and usage counters.
fn refresh(
    payment: &mut Payment,
    transfer: &TxTransfer,
    status: PaymentStatus,
    risk_score: f64,
    requests_allocated: u32,
    verified_at: Option<UnixTimestamp>,
) {
    payment.amount = transfer.amount;
    payment.from_address = transfer.from.clone();
    payment.to_address = transfer.to.clone();
    payment.block_number = transfer.block_number;
    payment.confirmations = transfer.confirmations;
    payment.risk_score = risk_score;
    payment.status = status;
    payment.requests_allocated = requests_allocated;
    payment.verified_at = verified_at;
}
