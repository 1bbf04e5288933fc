mod shopify;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use shopify::{ShopifyGateway, ShopifySettings};

pub const ORDER_KIND: &str = "Order";
pub const CUSTOMER_KIND: &str = "Customer";
pub const PRODUCT_VARIANT_KIND: &str = "ProductVariant";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("order platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("order platform responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("order platform graphql errors: {0}")]
    GraphQl(String),
    #[error("order platform rejected the request: {0}")]
    UserErrors(String),
    #[error("order metafield {0} never appeared")]
    MissingMetafield(String),
    #[error("failed to decode order platform payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub variant_ref: String,
    pub quantity: i32,
}

/// key: order-gateway -> createOrder input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub customer_ref: String,
    pub email: String,
    pub tags: Vec<String>,
    pub line_items: Vec<OrderLine>,
    pub note: String,
    pub financial_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    /// Bare numeric order id.
    pub order_ref: String,
    /// Display name such as `#1043`.
    pub display_name: String,
    pub total_amount: Decimal,
}

/// One pet declared on an order's custom fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PetMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub pet_type: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub breed: String,
    #[serde(default)]
    pub product_variant_id: String,
}

/// Classifier options selected on a product variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantOptions {
    pub age: String,
    pub size: String,
    pub condition: String,
}

/// Remote order-management capability used by provisioning and the cycle job.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder>;

    async fn fetch_order_pets(&self, order_ref: &str) -> GatewayResult<Vec<PetMetadata>>;

    async fn resolve_variant(&self, variant_ref: &str) -> GatewayResult<VariantOptions>;
}

/// Global id for a platform entity; ids already in global form are returned unchanged.
pub fn gid(kind: &str, id: &str) -> String {
    if id.starts_with("gid://") {
        id.to_string()
    } else {
        format!("gid://shopify/{kind}/{id}")
    }
}

/// Trailing numeric id of a global id.
pub fn strip_gid(id: &str) -> &str {
    if id.starts_with("gid://") {
        id.rsplit('/').next().unwrap_or(id)
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ids_normalise_both_ways() {
        assert_eq!(gid(ORDER_KIND, "42"), "gid://shopify/Order/42");
        assert_eq!(
            gid(ORDER_KIND, "gid://shopify/Order/42"),
            "gid://shopify/Order/42"
        );
        assert_eq!(strip_gid("gid://shopify/ProductVariant/7"), "7");
        assert_eq!(strip_gid("7"), "7");
    }

    #[test]
    fn pet_metadata_reads_platform_field_names() {
        let pet: PetMetadata = serde_json::from_str(
            r#"{"name":"Luna","type":"Perro","gender":"hembra","breed":"mestizo","product_variant_id":"88","birthday":"2020-01-01"}"#,
        )
        .unwrap();
        assert_eq!(pet.pet_type, "Perro");
        assert_eq!(pet.product_variant_id, "88");
    }
}
