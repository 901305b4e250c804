//! State-machine tests for payment verification.

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;
use vx402::chain::{AdapterError, Chain, ChainAdapter, TxTransfer};
use vx402::error::VerifyError;
use vx402::payment::{Payment, PaymentStatus};
use vx402::store::{MemoryStore, PaymentStore};
use vx402::verify::PaymentVerifier;

use common::{MockAdapter, MockReply, base_transfer, test_config};

fn verifier_with(
    replies: impl IntoIterator<Item = MockReply>,
) -> (PaymentVerifier<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let verifier = PaymentVerifier::new(Arc::new(test_config()), Arc::clone(&store))
        .with_adapter(MockAdapter::new(Chain::Base, replies));
    (verifier, store)
}

#[tokio::test]
async fn confirmations_are_reread_not_cached() {
    let (verifier, store) = verifier_with([
        MockReply::Transfer(base_transfer("1.00", 2)),
        MockReply::Transfer(base_transfer("1.00", 6)),
    ]);

    let err = verifier.verify("0xabc", Chain::Base, None).await.unwrap_err();
    match err {
        VerifyError::InsufficientConfirmations { current, required } => {
            assert_eq!(current, 2);
            assert_eq!(required, 6);
        }
        other => panic!("unexpected: {other}"),
    }

    // The shortfall was recorded as pending, not rejected.
    let pending = store
        .find_payment_by_tx_hash(Chain::Base, "0xabc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, PaymentStatus::PendingConfirmation);

    // Exactly the threshold is enough on retry.
    let verified = verifier.verify("0xabc", Chain::Base, None).await.unwrap();
    assert_eq!(verified.payment_id, pending.id);
    assert_eq!(verified.requests_allocated, 100);
    assert_eq!(verified.verification.confirmations, 6);

    let row = store.get_payment(pending.id).await.unwrap().unwrap();
    assert_eq!(row.status, PaymentStatus::Verified);
    assert!(row.verified_at.is_some());
}

#[tokio::test]
async fn verified_payment_cannot_be_replayed() {
    let (verifier, _store) = verifier_with([MockReply::Transfer(base_transfer("1.00", 6))]);

    let first = verifier.verify("0xabc", Chain::Base, None).await.unwrap();
    let err = verifier.verify("0xabc", Chain::Base, None).await.unwrap_err();
    match err {
        VerifyError::PaymentAlreadyUsed { payment_id, .. } => {
            assert_eq!(payment_id, first.payment_id);
        }
        other => panic!("unexpected: {other}"),
    }
    assert_eq!(err.error_code(), "PAYMENT_ALREADY_USED");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn wrong_recipient_is_terminal() {
    let mut transfer = base_transfer("1.00", 6);
    transfer.to = "0x2222222222222222222222222222222222222222".into();
    let (verifier, store) = verifier_with([MockReply::Transfer(transfer)]);

    let err = verifier.verify("0xdef", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_RECIPIENT");
    assert!(!err.is_retryable());

    let row = store
        .find_payment_by_tx_hash(Chain::Base, "0xdef")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Rejected);
    assert_eq!(row.reject_reason.as_deref(), Some("INVALID_RECIPIENT"));
}

#[tokio::test]
async fn recipient_comparison_ignores_hex_case() {
    let mut transfer = base_transfer("1.00", 6);
    transfer.to = transfer.to.to_lowercase();
    let (verifier, _store) = verifier_with([MockReply::Transfer(transfer)]);
    assert!(verifier.verify("0xabc", Chain::Base, None).await.is_ok());
}

#[tokio::test]
async fn short_payment_fails_expected_amount() {
    let (verifier, store) = verifier_with([MockReply::Transfer(base_transfer("0.50", 6))]);

    let err = verifier
        .verify("0xaaa", Chain::Base, Some(Decimal::ONE))
        .await
        .unwrap_err();
    match err {
        VerifyError::InvalidPaymentAmount {
            actual, expected, ..
        } => {
            assert_eq!(actual, "0.50".parse::<Decimal>().unwrap());
            assert_eq!(expected, Some(Decimal::ONE));
        }
        other => panic!("unexpected: {other}"),
    }

    let row = store
        .find_payment_by_tx_hash(Chain::Base, "0xaaa")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Rejected);
}

#[tokio::test]
async fn overpayment_is_accepted_and_allocates_more() {
    let (verifier, _store) = verifier_with([MockReply::Transfer(base_transfer("2.50", 6))]);
    let verified = verifier
        .verify("0xbbb", Chain::Base, Some(Decimal::ONE))
        .await
        .unwrap();
    assert_eq!(verified.requests_allocated, 250);
}

#[tokio::test]
async fn dust_payment_fails_minimum() {
    let (verifier, _store) = verifier_with([MockReply::Transfer(base_transfer("0.005", 6))]);
    let err = verifier.verify("0xccc", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PAYMENT_AMOUNT");
}

#[tokio::test]
async fn not_found_is_retryable_and_leaves_no_record() {
    let (verifier, store) = verifier_with([
        MockReply::NotFound,
        MockReply::Transfer(base_transfer("1.00", 6)),
    ]);

    let err = verifier.verify("0xddd", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "TRANSACTION_NOT_FOUND");
    assert!(err.is_retryable());
    assert!(
        store
            .find_payment_by_tx_hash(Chain::Base, "0xddd")
            .await
            .unwrap()
            .is_none()
    );

    assert!(verifier.verify("0xddd", Chain::Base, None).await.is_ok());
}

#[tokio::test]
async fn rpc_failure_is_chain_unavailable_not_zero_confirmations() {
    let (verifier, _store) = verifier_with([MockReply::Unavailable]);
    let err = verifier.verify("0xeee", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "CHAIN_UNAVAILABLE");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn reverted_transaction_is_terminal() {
    let (verifier, _store) = verifier_with([MockReply::Failed]);
    let err = verifier.verify("0xfff", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "TRANSACTION_FAILED");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unconfigured_chain_is_rejected() {
    let (verifier, _store) = verifier_with([MockReply::Transfer(base_transfer("1.00", 6))]);
    let err = verifier
        .verify("sig", Chain::Polygon, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED_CHAIN");
}

/// Adapter that lands a competing payment row while the fetch is in flight,
/// reproducing two verify calls racing on the same hash.
#[derive(Debug)]
struct RacingAdapter {
    store: Arc<MemoryStore>,
    transfer: TxTransfer,
    competing_status: PaymentStatus,
}

#[async_trait::async_trait]
impl ChainAdapter for RacingAdapter {
    fn chain(&self) -> Chain {
        Chain::Base
    }

    async fn fetch_transaction(&self, tx_hash: &str) -> Result<TxTransfer, AdapterError> {
        let competing = Payment::from_transfer(
            tx_hash,
            Chain::Base,
            &self.transfer,
            0.0,
            self.competing_status,
        );
        let _ = self.store.insert_payment(competing).await;
        Ok(self.transfer.clone())
    }
}

#[tokio::test]
async fn losing_the_insert_race_to_a_pending_record_stays_retryable() {
    let store = Arc::new(MemoryStore::new());
    let transfer = base_transfer("1.00", 2);
    let verifier = PaymentVerifier::new(Arc::new(test_config()), Arc::clone(&store)).with_adapter(
        Arc::new(RacingAdapter {
            store: Arc::clone(&store),
            transfer,
            competing_status: PaymentStatus::PendingConfirmation,
        }),
    );

    // The competing record is only pending, so the shortfall must surface
    // as retryable rather than as a consumed payment.
    let err = verifier.verify("0xabc", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "INSUFFICIENT_CONFIRMATIONS");
    assert!(err.is_retryable());

    let row = store
        .find_payment_by_tx_hash(Chain::Base, "0xabc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::PendingConfirmation);
}

#[tokio::test]
async fn losing_the_insert_race_to_a_verified_record_is_terminal() {
    let store = Arc::new(MemoryStore::new());
    let transfer = base_transfer("1.00", 6);
    let verifier = PaymentVerifier::new(Arc::new(test_config()), Arc::clone(&store)).with_adapter(
        Arc::new(RacingAdapter {
            store: Arc::clone(&store),
            transfer,
            competing_status: PaymentStatus::Verified,
        }),
    );

    let err = verifier.verify("0xabc", Chain::Base, None).await.unwrap_err();
    assert_eq!(err.error_code(), "PAYMENT_ALREADY_USED");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn risk_threshold_rejects_payment() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config().with_risk_threshold(0.05);
    let verifier = PaymentVerifier::new(Arc::new(config), Arc::clone(&store)).with_adapter(
        MockAdapter::new(Chain::Base, [MockReply::Transfer(base_transfer("1.00", 6))]),
    );

    let err = verifier.verify("0x123", Chain::Base, None).await.unwrap_err();
    match err {
        VerifyError::HighRiskScore { score, threshold } => {
            assert!(score > threshold);
        }
        other => panic!("unexpected: {other}"),
    }

    let row = store
        .find_payment_by_tx_hash(Chain::Base, "0x123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PaymentStatus::Rejected);
    assert_eq!(row.reject_reason.as_deref(), Some("HIGH_RISK_SCORE"));
}
