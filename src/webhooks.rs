use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::task::JoinHandle;

use crate::billing::{OrderEvent, ProvisionOutcome, Provisioning};
use crate::error::{AppError, AppResult, ReconcileResult};

pub const SIGNATURE_HEADER: &str = "X-Shopify-Hmac-Sha256";

/// key: webhooks-orders -> shared state for the order event endpoints
#[derive(Clone)]
pub struct WebhookState {
    pub provisioning: Arc<Provisioning>,
    pub hmac_secret: Arc<String>,
}

impl WebhookState {
    pub fn new(provisioning: Arc<Provisioning>, hmac_secret: impl Into<String>) -> Self {
        Self {
            provisioning,
            hmac_secret: Arc::new(hmac_secret.into()),
        }
    }
}

/// Acknowledges the delivery as soon as it is authenticated and decoded; reconciliation runs
/// on a detached task.
pub async fn order_created(
    Extension(state): Extension<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let event = authenticate(&state, &headers, &body)?;
    tracing::info!(order_id = event.id, "accepted order created webhook");
    let _task: JoinHandle<ReconcileResult<ProvisionOutcome>> =
        state.provisioning.spawn_order_created(event);
    Ok(StatusCode::OK)
}

pub async fn order_paid(
    Extension(state): Extension<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let event = authenticate(&state, &headers, &body)?;
    tracing::info!(order_id = event.id, "accepted order paid webhook");
    let _task = state.provisioning.spawn_order_paid(event);
    Ok(StatusCode::OK)
}

fn authenticate(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> AppResult<OrderEvent> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if !verify_signature(state.hmac_secret.as_bytes(), body, signature) {
        return Err(AppError::Unauthorized);
    }
    serde_json::from_slice(body).map_err(|err| AppError::BadRequest(err.to_string()))
}

/// Checks a base64 HMAC-SHA256 of the raw body in constant time.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signature the platform would send for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}
