//! Axum route handlers for the `/x402` payment API.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use vx402::chain::Chain;
use vx402::error::{TokenError, VerifyError};
use vx402::payment::PaymentId;
use vx402::store::{PaymentStats, PaymentStore, StatsFilter};
use vx402::time::UnixTimestamp;
use vx402::token::TokenGrant;

use crate::error::{ApiError, ErrorBody};
use crate::{AppState, paygate, ratelimit};

/// `POST /x402/verify-payment` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentRequest {
    /// Transaction hash (EVM) or signature (Solana).
    pub tx_hash: String,
    /// Chain the payment was made on.
    #[serde(default = "default_chain")]
    pub chain: Chain,
    /// Amount the caller believes they paid, in USDC.
    #[serde(default)]
    pub expected_amount: Option<Decimal>,
}

const fn default_chain() -> Chain {
    Chain::Base
}

/// `GET /x402/stats` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    /// Restrict to one chain.
    pub chain: Option<Chain>,
    /// Restrict to one paying address.
    pub from_address: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn pricing(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pricing = &state.core.pricing;
    let chains: Vec<&str> = configured_chains(&state)
        .map(|(chain, _)| chain.name())
        .collect();
    Json(serde_json::json!({
        "price_per_call_usdc": pricing.price_per_call.to_string(),
        "min_payment_usdc": pricing.min_payment.to_string(),
        "requests_per_dollar": pricing.requests_for(Decimal::ONE),
        "token_expiry_hours": pricing.token_ttl_secs / 3600,
        "payment_methods": ["onchain_usdc", "payment_token"],
        "supported_chains": chains,
    }))
}

async fn supported_chains(State(state): State<AppState>) -> Json<serde_json::Value> {
    let chains: Vec<serde_json::Value> = configured_chains(&state)
        .map(|(chain, settings)| {
            serde_json::json!({
                "name": chain.name(),
                "payment_address": settings.payment_address,
                "usdc_contract": settings.usdc_contract,
                "confirmations": settings.required_confirmations,
            })
        })
        .collect();
    Json(serde_json::json!({ "chains": chains }))
}

/// Configured chains in canonical display order.
fn configured_chains(
    state: &AppState,
) -> impl Iterator<Item = (Chain, &vx402::config::ChainSettings)> {
    Chain::ALL
        .into_iter()
        .filter_map(|chain| state.core.chain(chain).map(|settings| (chain, settings)))
}

/// `POST /x402/verify-payment`.
///
/// Payment-level failures come back as `200 {is_valid: false, error: {...}}`
/// so a client polling a pending transaction can tell "not yet" from "the
/// service is down". Infrastructure faults surface as 5xx.
async fn verify_payment(
    State(state): State<AppState>,
    Json(body): Json<VerifyPaymentRequest>,
) -> Result<Response, ApiError> {
    match state
        .verifier
        .verify(&body.tx_hash, body.chain, body.expected_amount)
        .await
    {
        Ok(verified) => Ok(Json(serde_json::json!({
            "is_valid": true,
            "payment_id": verified.payment_id,
            "requests_allocated": verified.requests_allocated,
            "verification": verified.verification,
        }))
        .into_response()),
        Err(err @ (VerifyError::ChainUnavailable { .. } | VerifyError::Store(_))) => {
            Err(err.into())
        }
        Err(err) => Ok(Json(serde_json::json!({
            "is_valid": false,
            "error": ErrorBody::new(err.error_code(), err.to_string(), err.is_retryable()),
        }))
        .into_response()),
    }
}

/// `POST /x402/generate-token/{payment_id}`.
async fn generate_token(
    State(state): State<AppState>,
    Path(payment_id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let issued = state.issuer.issue(PaymentId(payment_id)).await?;
    Ok(Json(serde_json::json!({
        "payment_token": issued.token,
        "payment_id": issued.payment_id,
        "expires_at": issued.expires_at,
        "requests_remaining": issued.requests_remaining,
    })))
}

/// `GET /x402/payment/{payment_id}` — usage snapshot for one payment.
async fn payment_snapshot(
    State(state): State<AppState>,
    Path(payment_id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = PaymentId(payment_id);
    let payment = state
        .store
        .get_payment(id)
        .await
        .map_err(TokenError::from)?
        .ok_or(ApiError::Token(TokenError::PaymentNotFound(id)))?;
    let token = state
        .store
        .find_token_for_payment(id)
        .await
        .map_err(TokenError::from)?;

    Ok(Json(serde_json::json!({
        "payment_id": payment.id,
        "status": payment.status,
        "chain": payment.chain,
        "tx_hash": payment.tx_hash,
        "amount_usdc": payment.amount,
        "risk_score": payment.risk_score,
        "reject_reason": payment.reject_reason,
        "requests_allocated": payment.requests_allocated,
        "requests_used": payment.requests_used,
        "requests_remaining": payment.requests_remaining(),
        "created_at": payment.created_at,
        "verified_at": payment.verified_at,
        "token": token.map(|t| serde_json::json!({
            "requests_remaining": t.requests_remaining,
            "expires_at": t.expires_at,
        })),
    })))
}

/// Rejects the request unless it carries the configured admin key. A
/// gateway with no key configured has no admin surface at all.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
    let authorized = matches!(
        (state.admin_key.as_deref(), presented),
        (Some(expected), Some(given)) if expected == given
    );
    if authorized {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// `GET /x402/stats` — aggregate counters, admin-gated.
async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
    headers: HeaderMap,
) -> Result<Json<PaymentStats>, ApiError> {
    require_admin(&state, &headers)?;

    let filter = StatsFilter {
        chain: query.chain,
        from_address: query.from_address,
    };
    let stats = state.store.stats(&filter).await.map_err(TokenError::from)?;
    Ok(Json(stats))
}

/// `POST /x402/cleanup` — drops expired tokens and stale rate-limit
/// windows, admin-gated. Payment records stay for audit.
async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    let cleaned_up = state
        .store
        .purge_expired_tokens(UnixTimestamp::now())
        .await
        .map_err(TokenError::from)?;
    state.limiter.prune();

    tracing::info!(cleaned_up, "purged expired tokens");
    Ok(Json(serde_json::json!({ "cleaned_up": cleaned_up })))
}

/// A sample paid endpoint sitting behind the payment gate.
async fn exploits(Extension(grant): Extension<TokenGrant>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "payment_id": grant.payment_id,
        "requests_remaining": grant.requests_remaining,
        "data": [],
    }))
}

/// Builds the full gateway router: public `/x402` API, health, and the
/// protected routes wrapped in rate limiting and the payment gate.
pub fn gateway_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/exploits", get(exploits))
        .layer(middleware::from_fn_with_state(
            AppState::clone(&state),
            paygate::require_payment,
        ))
        .layer(middleware::from_fn_with_state(
            AppState::clone(&state),
            ratelimit::rate_limit,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/x402/pricing", get(pricing))
        .route("/x402/supported-chains", get(supported_chains))
        .route("/x402/verify-payment", post(verify_payment))
        .route("/x402/generate-token/{payment_id}", post(generate_token))
        .route("/x402/payment/{payment_id}", get(payment_snapshot))
        .route("/x402/stats", get(stats))
        .route("/x402/cleanup", post(cleanup))
        .merge(protected)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([http::Method::GET, http::Method::POST])
                .allow_headers(cors::Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
