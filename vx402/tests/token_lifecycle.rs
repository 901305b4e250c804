//! Token issuance, consumption, quota, and expiry tests.

mod common;

use std::sync::Arc;

use vx402::chain::Chain;
use vx402::error::TokenError;
use vx402::payment::{AccessToken, PaymentId};
use vx402::store::{MemoryStore, PaymentStore};
use vx402::time::UnixTimestamp;
use vx402::token::{TOKEN_PREFIX, TokenIssuer, TokenValidator, hash_token};
use vx402::verify::PaymentVerifier;

use common::{MockAdapter, MockReply, base_transfer, test_config};

struct Harness {
    verifier: PaymentVerifier<MemoryStore>,
    issuer: TokenIssuer<MemoryStore>,
    validator: TokenValidator<MemoryStore>,
    store: Arc<MemoryStore>,
}

fn harness(replies: impl IntoIterator<Item = MockReply>) -> Harness {
    let config = Arc::new(test_config());
    let store = Arc::new(MemoryStore::new());
    Harness {
        verifier: PaymentVerifier::new(Arc::clone(&config), Arc::clone(&store))
            .with_adapter(MockAdapter::new(Chain::Base, replies)),
        issuer: TokenIssuer::new(config, Arc::clone(&store)),
        validator: TokenValidator::new(Arc::clone(&store)),
        store,
    }
}

#[tokio::test]
async fn full_pay_per_call_flow() {
    // 1.00 USDC on Base with exactly the required 6 confirmations.
    let h = harness([MockReply::Transfer(base_transfer("1.00", 6))]);

    let verified = h.verifier.verify("0xabc", Chain::Base, None).await.unwrap();
    assert_eq!(verified.requests_allocated, 100);

    let before = UnixTimestamp::now();
    let issued = h.issuer.issue(verified.payment_id).await.unwrap();
    assert!(issued.token.starts_with(TOKEN_PREFIX));
    assert_eq!(issued.requests_remaining, 100);
    // 24h TTL, measured from issuance.
    let ttl = issued.expires_at.as_secs() - before.as_secs();
    assert!((86_399..=86_401).contains(&ttl), "ttl was {ttl}");

    for used in 1..=100u32 {
        let grant = h.validator.consume(&issued.token).await.unwrap();
        assert_eq!(grant.requests_remaining, 100 - used);
        assert_eq!(grant.payment_id, verified.payment_id);
    }

    let err = h.validator.consume(&issued.token).await.unwrap_err();
    assert!(matches!(err, TokenError::NoRequestsRemaining));

    let payment = h
        .store
        .get_payment(verified.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.requests_used, 100);
}

#[tokio::test]
async fn second_issuance_fails() {
    let h = harness([MockReply::Transfer(base_transfer("1.00", 6))]);
    let verified = h.verifier.verify("0xabc", Chain::Base, None).await.unwrap();

    h.issuer.issue(verified.payment_id).await.unwrap();
    let err = h.issuer.issue(verified.payment_id).await.unwrap_err();
    assert!(matches!(err, TokenError::TokenAlreadyIssued(id) if id == verified.payment_id));
}

#[tokio::test]
async fn pending_payment_cannot_fund_a_token() {
    let h = harness([MockReply::Transfer(base_transfer("1.00", 2))]);
    h.verifier.verify("0xabc", Chain::Base, None).await.unwrap_err();

    let pending = h
        .store
        .find_payment_by_tx_hash(Chain::Base, "0xabc")
        .await
        .unwrap()
        .unwrap();
    let err = h.issuer.issue(pending.id).await.unwrap_err();
    assert!(matches!(err, TokenError::PaymentNotVerified(_)));
}

#[tokio::test]
async fn unknown_payment_id() {
    let h = harness([]);
    let err = h.issuer.issue(PaymentId(9999)).await.unwrap_err();
    assert!(matches!(err, TokenError::PaymentNotFound(_)));
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let h = harness([]);
    let err = h.validator.consume("x402_not_a_real_token").await.unwrap_err();
    assert!(matches!(err, TokenError::TokenNotFound));
}

#[tokio::test]
async fn expired_token_fails_despite_remaining_quota() {
    let h = harness([MockReply::Transfer(base_transfer("1.00", 6))]);
    let verified = h.verifier.verify("0xabc", Chain::Base, None).await.unwrap();

    // Plant a token whose expiry has already passed.
    let plaintext = "x402_expired_fixture";
    h.store
        .insert_token(AccessToken {
            token_hash: hash_token(plaintext),
            payment_id: verified.payment_id,
            requests_remaining: 50,
            expires_at: UnixTimestamp::from_secs(1),
            created_at: UnixTimestamp::from_secs(0),
        })
        .await
        .unwrap();

    let err = h.validator.consume(plaintext).await.unwrap_err();
    assert!(matches!(err, TokenError::TokenExpired));
}

#[tokio::test]
async fn concurrent_consumption_never_overdraws() {
    // 0.20 USDC buys 20 calls; fire 40 concurrent consumers at the token.
    let h = harness([MockReply::Transfer(base_transfer("0.20", 6))]);
    let verified = h.verifier.verify("0xabc", Chain::Base, None).await.unwrap();
    assert_eq!(verified.requests_allocated, 20);

    let issued = h.issuer.issue(verified.payment_id).await.unwrap();
    let validator = Arc::new(h.validator);

    let mut tasks = Vec::new();
    for _ in 0..40 {
        let validator = Arc::clone(&validator);
        let token = issued.token.clone();
        tasks.push(tokio::spawn(async move {
            validator.consume(&token).await
        }));
    }

    let mut successes = 0u32;
    let mut exhausted = 0u32;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(TokenError::NoRequestsRemaining) => exhausted += 1,
            Err(other) => panic!("unexpected: {other}"),
        }
    }

    assert_eq!(successes, 20, "exactly the allocated quota must succeed");
    assert_eq!(exhausted, 20);

    let payment = h
        .store
        .get_payment(verified.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.requests_used, 20);
    assert_eq!(payment.requests_remaining(), 0);
}
