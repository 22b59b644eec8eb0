use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{errors::ServiceError, services::fulfillment::WebhookDisposition, AppState};

type HmacSha256 = Hmac<Sha256>;

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(payment_webhook))
}

/// Processor webhook: the only caller allowed to move an order to paid.
///
/// Responds `{"received": true}` once the event is processed or was already
/// processed, so the processor stops redelivering; malformed or
/// unverifiable payloads get a 400 and will be retried.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event processed or already processed"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let tolerance = state.config.payment_webhook_tolerance_secs;
        if !verify_signature(&headers, &body, secret, tolerance) {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    } else {
        // Tolerable only behind a trusted network path; production refuses
        // to start without a secret (see config loading).
        warn!("payment webhook received without signature verification configured");
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {}", e)))?;
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
    let intent_id = event
        .pointer("/data/object/id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ServiceError::InvalidInput("webhook payload has no payment intent id".to_string())
        })?;

    let disposition = match event_type {
        "payment_intent.succeeded" => {
            state.services.fulfillment.confirm_payment(intent_id).await?
        }
        "payment_intent.payment_failed" => {
            state.services.fulfillment.mark_failed(intent_id).await?
        }
        other => {
            info!(event_type = other, "ignoring unhandled webhook event type");
            return Ok(Json(json!({ "received": true })));
        }
    };

    if disposition == WebhookDisposition::UnknownIntent {
        // Acknowledged anyway: redelivery cannot make the order appear, and
        // the intent metadata at the processor is the reconciliation source.
        error!(intent_id, event_type, "webhook for unknown payment intent");
    }

    Ok(Json(json!({ "received": true })))
}

/// Verify a `Stripe-Signature: t=<ts>,v1=<hex>` header: HMAC-SHA256 over
/// `"{t}.{payload}"` with the shared secret, constant-time comparison, and
/// a bounded timestamp tolerance against replay.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let Some(header) = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };

    let mut timestamp = "";
    let mut signature = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => signature = value,
            _ => {}
        }
    }
    if timestamp.is_empty() || signature.is_empty() {
        return false;
    }

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(body) = std::str::from_utf8(payload) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
