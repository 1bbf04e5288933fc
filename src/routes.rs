use axum::{
    routing::{get, post},
    Router,
};

use crate::webhooks;

async fn healthz() -> &'static str {
    "ok"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/orders/created", post(webhooks::order_created))
        .route("/webhooks/orders/paid", post(webhooks::order_paid))
}
