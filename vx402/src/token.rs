//! Access-token issuance and consumption.
//!
//! Tokens are opaque bearer credentials: a fixed prefix plus 256 bits of
//! randomness, base64url-encoded. Only the SHA-256 hash of the plaintext is
//! persisted; the plaintext is returned exactly once at issuance. Lookups at
//! validation time go through the hash, never the plaintext, and the
//! plaintext is never written to logs on any path.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::X402Config;
use crate::error::TokenError;
use crate::payment::{AccessToken, PaymentId, PaymentStatus};
use crate::store::{DecrementOutcome, PaymentStore};
use crate::time::UnixTimestamp;

/// Fixed prefix identifying payment tokens in logs and support tickets
/// (the prefix alone reveals nothing).
pub const TOKEN_PREFIX: &str = "x402_";

const TOKEN_ENTROPY_BYTES: usize = 32;

/// Hex-encoded SHA-256 of a plaintext token.
#[must_use]
pub fn hash_token(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn generate_plaintext() -> String {
    let mut entropy = [0u8; TOKEN_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut entropy);
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(entropy))
}

/// A freshly minted token. The `token` field is the only copy of the
/// plaintext that will ever exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Plaintext bearer token. Shown once; never persisted.
    pub token: String,
    /// Payment the token was minted from.
    pub payment_id: PaymentId,
    /// Hard expiry.
    pub expires_at: UnixTimestamp,
    /// Initial request quota.
    pub requests_remaining: u32,
}

/// Grant returned for each successfully consumed request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Payment funding the consumed request.
    pub payment_id: PaymentId,
    /// Quota left after this consumption.
    pub requests_remaining: u32,
    /// Token expiry, unchanged by consumption.
    pub expires_at: UnixTimestamp,
}

/// Mints access tokens from verified payments.
#[derive(Debug)]
pub struct TokenIssuer<S> {
    config: Arc<X402Config>,
    store: Arc<S>,
}

impl<S: PaymentStore> TokenIssuer<S> {
    /// Creates an issuer over the given config and store.
    pub fn new(config: Arc<X402Config>, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// Issues the single token for a verified payment.
    ///
    /// The token's quota equals the payment's remaining allocation and its
    /// expiry is issuance time plus the configured TTL.
    ///
    /// # Errors
    ///
    /// - [`TokenError::PaymentNotFound`] for an unknown id
    /// - [`TokenError::PaymentNotVerified`] unless the payment is `Verified`
    /// - [`TokenError::TokenAlreadyIssued`] on a second issuance attempt
    pub async fn issue(&self, payment_id: PaymentId) -> Result<IssuedToken, TokenError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or(TokenError::PaymentNotFound(payment_id))?;

        if payment.status != PaymentStatus::Verified {
            return Err(TokenError::PaymentNotVerified(payment_id));
        }

        let plaintext = generate_plaintext();
        let now = UnixTimestamp::now();
        let token = AccessToken {
            token_hash: hash_token(&plaintext),
            payment_id,
            requests_remaining: payment.requests_remaining(),
            expires_at: now + self.config.pricing.token_ttl_secs,
            created_at: now,
        };
        let expires_at = token.expires_at;
        let requests_remaining = token.requests_remaining;

        self.store.insert_token(token).await.map_err(|err| match err {
            crate::error::StoreError::DuplicateToken(id) => TokenError::TokenAlreadyIssued(id),
            other => TokenError::Store(other),
        })?;

        tracing::info!(%payment_id, %expires_at, requests_remaining, "issued payment token");

        Ok(IssuedToken {
            token: plaintext,
            payment_id,
            expires_at,
            requests_remaining,
        })
    }
}

/// Validates and consumes tokens on the protected-request hot path.
#[derive(Debug)]
pub struct TokenValidator<S> {
    store: Arc<S>,
}

impl<S: PaymentStore> TokenValidator<S> {
    /// Creates a validator over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validates a presented token and consumes one request from its quota.
    ///
    /// Expiry is checked before quota: a token past `expires_at` fails with
    /// [`TokenError::TokenExpired`] even when requests remain. The decrement
    /// itself is atomic at the store level.
    ///
    /// # Errors
    ///
    /// - [`TokenError::TokenNotFound`] for an unknown hash
    /// - [`TokenError::TokenExpired`] past the hard expiry
    /// - [`TokenError::NoRequestsRemaining`] once the quota hits zero
    pub async fn consume(&self, plaintext: &str) -> Result<TokenGrant, TokenError> {
        let hash = hash_token(plaintext);

        let token = self
            .store
            .find_token(&hash)
            .await?
            .ok_or(TokenError::TokenNotFound)?;

        if token.expires_at.has_passed() {
            return Err(TokenError::TokenExpired);
        }

        match self.store.decrement_remaining(&hash).await? {
            DecrementOutcome::Remaining(remaining) => Ok(TokenGrant {
                payment_id: token.payment_id,
                requests_remaining: remaining,
                expires_at: token.expires_at,
            }),
            DecrementOutcome::Exhausted => Err(TokenError::NoRequestsRemaining),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_carries_prefix_and_entropy() {
        let token = generate_plaintext();
        assert!(token.starts_with(TOKEN_PREFIX));
        // 32 bytes -> 43 base64url chars without padding.
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 43);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_plaintext(), generate_plaintext());
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let hash = hash_token("x402_example");
        assert_eq!(hash, hash_token("x402_example"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_differs_per_token() {
        assert_ne!(hash_token("x402_a"), hash_token("x402_b"));
    }
}
