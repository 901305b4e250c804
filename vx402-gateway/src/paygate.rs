//! The payment gate in front of protected routes.
//!
//! A protected request must carry a valid `x-payment-token` header; the gate
//! consumes one request from the token's quota and forwards the grant to the
//! handler via request extensions. Anything else yields `402 Payment
//! Required` with a machine-readable description of how to pay.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;

use vx402::error::TokenError;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying the bearer payment token.
pub const PAYMENT_TOKEN_HEADER: &str = "x-payment-token";

/// Quota remaining after the current request, echoed to the client.
pub const REQUESTS_REMAINING_HEADER: &str = "x-requests-remaining";

/// Middleware admitting only requests funded by a valid payment token.
pub async fn require_payment(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();

    let Some(token) = request
        .headers()
        .get(PAYMENT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return payment_required(&state, &path, "no payment token provided");
    };

    match state.validator.consume(&token).await {
        Ok(grant) => {
            let remaining = grant.requests_remaining;
            request.extensions_mut().insert(grant);
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response
                    .headers_mut()
                    .insert(REQUESTS_REMAINING_HEADER, value);
            }
            response
        }
        Err(err @ (TokenError::TokenNotFound
        | TokenError::TokenExpired
        | TokenError::NoRequestsRemaining)) => {
            tracing::info!(%path, reason = err.error_code(), "payment gate refused request");
            payment_required(&state, &path, err.error_code())
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Builds the `402` response describing accepted payment methods.
fn payment_required(state: &AppState, path: &str, reason: &str) -> Response {
    let pricing = &state.core.pricing;
    let price = pricing.price_per_call;

    let mut supported_chains = serde_json::Map::new();
    for (chain, settings) in state.core.chains() {
        supported_chains.insert(
            chain.name().to_owned(),
            serde_json::json!({
                "address": settings.payment_address,
                "usdc_contract": settings.usdc_contract,
                "confirmations": settings.required_confirmations,
            }),
        );
    }

    let body = serde_json::json!({
        "error": "Payment Required",
        "status": 402,
        "endpoint": path,
        "reason": reason,
        "price": {
            "amount": price.to_string(),
            "currency": "USDC",
            "decimals": 6,
        },
        "payment_methods": {
            "onchain": {
                "supported_chains": supported_chains,
                "verify_endpoint": "/x402/verify-payment",
            },
            "token": { "header": PAYMENT_TOKEN_HEADER },
        },
        "pricing": {
            "requests_per_dollar": pricing.requests_for(Decimal::ONE),
            "token_expiry_hours": pricing.token_ttl_secs / 3600,
        },
    });

    let mut response = (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert("x-payment-required", HeaderValue::from_static("true"));
    if let Ok(value) = HeaderValue::from_str(&price.to_string()) {
        headers.insert("x-payment-amount", value);
    }
    headers.insert("x-payment-currency", HeaderValue::from_static("USDC"));
    response
}
