use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use super::{
    gid, strip_gid, CreateOrderRequest, CreatedOrder, GatewayError, GatewayResult, OrderGateway,
    PetMetadata, VariantOptions, ORDER_KIND, PRODUCT_VARIANT_KIND,
};
use crate::billing::models::parse_amount;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const METAFIELD_POLL_INTERVAL: Duration = Duration::from_secs(1);
const METAFIELD_NAMESPACE: &str = "custom";
const PETS_METAFIELD_KEY: &str = "dog_data";

const AGE_OPTION: &str = "Edad";
const SIZE_OPTION: &str = "Tamaño";
const CONDITION_OPTION: &str = "Condición";

const ORDER_METAFIELD_QUERY: &str = r#"
query orderMetafield($id: ID!, $namespace: String!, $key: String!) {
  order(id: $id) {
    metafield(namespace: $namespace, key: $key) {
      key
      value
      jsonValue
    }
  }
}"#;

const VARIANT_QUERY: &str = r#"
query variantById($id: ID!) {
  productVariant(id: $id) {
    id
    title
    selectedOptions {
      name
      value
    }
  }
}"#;

const ORDER_CREATE_MUTATION: &str = r#"
mutation orderCreate($order: OrderCreateOrderInput!, $options: OrderCreateOptionsInput) {
  orderCreate(order: $order, options: $options) {
    order {
      id
      name
      totalPriceSet {
        shopMoney {
          amount
          currencyCode
        }
      }
    }
    userErrors {
      field
      message
    }
  }
}"#;

#[derive(Debug, Clone)]
pub struct ShopifySettings {
    pub store_name: String,
    pub api_version: String,
    pub admin_token: String,
    pub metafield_attempts: u32,
}

/// key: order-gateway -> admin graphql client
#[derive(Clone)]
pub struct ShopifyGateway {
    client: Client,
    endpoint: String,
    admin_token: String,
    metafield_attempts: u32,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OrderMetafieldData {
    order: Option<MetafieldOwner>,
}

#[derive(Debug, Deserialize)]
struct MetafieldOwner {
    metafield: Option<Metafield>,
}

#[derive(Debug, Deserialize)]
struct Metafield {
    #[serde(rename = "jsonValue")]
    json_value: Option<Value>,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PetsPayload {
    #[serde(default)]
    pets: Vec<PetMetadata>,
}

#[derive(Debug, Deserialize)]
struct VariantData {
    #[serde(rename = "productVariant")]
    product_variant: Option<Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    #[serde(default, rename = "selectedOptions")]
    selected_options: Vec<SelectedOption>,
}

#[derive(Debug, Deserialize)]
struct SelectedOption {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct OrderCreateData {
    #[serde(rename = "orderCreate")]
    order_create: OrderCreatePayload,
}

#[derive(Debug, Deserialize)]
struct OrderCreatePayload {
    order: Option<CreatedOrderNode>,
    #[serde(default, rename = "userErrors")]
    user_errors: Vec<GraphQlMessage>,
}

#[derive(Debug, Deserialize)]
struct CreatedOrderNode {
    id: String,
    name: String,
    #[serde(rename = "totalPriceSet")]
    total_price_set: PriceSet,
}

#[derive(Debug, Deserialize)]
struct PriceSet {
    #[serde(rename = "shopMoney")]
    shop_money: Money,
}

#[derive(Debug, Deserialize)]
struct Money {
    amount: String,
}

impl ShopifyGateway {
    pub fn new(settings: ShopifySettings) -> GatewayResult<Self> {
        let endpoint = format!(
            "https://{}/admin/api/{}/graphql.json",
            settings.store_name, settings.api_version
        );
        Self::with_endpoint(endpoint, settings.admin_token, settings.metafield_attempts)
    }

    /// Builds a gateway against an explicit graphql endpoint.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        admin_token: impl Into<String>,
        metafield_attempts: u32,
    ) -> GatewayResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            admin_token: admin_token.into(),
            metafield_attempts: metafield_attempts.max(1),
            poll_interval: METAFIELD_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> GatewayResult<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Shopify-Access-Token", &self.admin_token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), %body, "order platform request failed");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GraphQlEnvelope<T> = serde_json::from_str(&body)?;
        if !envelope.errors.is_empty() {
            return Err(GatewayError::GraphQl(join_messages(&envelope.errors)));
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::GraphQl("response carried no data".to_string()))
    }
}

#[async_trait]
impl OrderGateway for ShopifyGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        let line_items: Vec<Value> = request
            .line_items
            .iter()
            .map(|line| {
                json!({
                    "variantId": gid(PRODUCT_VARIANT_KIND, &line.variant_ref),
                    "quantity": line.quantity,
                })
            })
            .collect();
        let variables = json!({
            "order": {
                "customerId": gid(super::CUSTOMER_KIND, &request.customer_ref),
                "email": request.email,
                "tags": request.tags,
                "lineItems": line_items,
                "note": request.note,
                "financialStatus": request.financial_status,
            }
        });

        let data: OrderCreateData = self.execute(ORDER_CREATE_MUTATION, variables).await?;
        if !data.order_create.user_errors.is_empty() {
            return Err(GatewayError::UserErrors(join_messages(
                &data.order_create.user_errors,
            )));
        }
        let order = data
            .order_create
            .order
            .ok_or_else(|| GatewayError::UserErrors("no order returned".to_string()))?;
        let total_amount = parse_amount(&order.total_price_set.shop_money.amount).ok_or_else(|| {
            GatewayError::GraphQl(format!(
                "unparseable order total '{}'",
                order.total_price_set.shop_money.amount
            ))
        })?;

        Ok(CreatedOrder {
            order_ref: strip_gid(&order.id).to_string(),
            display_name: order.name,
            total_amount,
        })
    }

    async fn fetch_order_pets(&self, order_ref: &str) -> GatewayResult<Vec<PetMetadata>> {
        let variables = json!({
            "id": gid(ORDER_KIND, order_ref),
            "namespace": METAFIELD_NAMESPACE,
            "key": PETS_METAFIELD_KEY,
        });

        // The metafield is written by a storefront app shortly after the order exists.
        for attempt in 1..=self.metafield_attempts {
            let data: OrderMetafieldData = self
                .execute(ORDER_METAFIELD_QUERY, variables.clone())
                .await?;
            if let Some(metafield) = data.order.and_then(|order| order.metafield) {
                let payload: PetsPayload = match (metafield.json_value, metafield.value) {
                    (Some(json_value), _) if !json_value.is_null() => {
                        serde_json::from_value(json_value)?
                    }
                    (_, Some(raw)) => serde_json::from_str(&raw)?,
                    _ => PetsPayload::default(),
                };
                return Ok(payload.pets);
            }
            tracing::debug!(%order_ref, attempt, "order pet metafield not present yet");
            if attempt < self.metafield_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(GatewayError::MissingMetafield(format!(
            "{METAFIELD_NAMESPACE}.{PETS_METAFIELD_KEY}"
        )))
    }

    async fn resolve_variant(&self, variant_ref: &str) -> GatewayResult<VariantOptions> {
        let data: VariantData = self
            .execute(
                VARIANT_QUERY,
                json!({ "id": gid(PRODUCT_VARIANT_KIND, variant_ref) }),
            )
            .await?;
        let variant = data.product_variant.ok_or_else(|| {
            GatewayError::GraphQl(format!("product variant {variant_ref} not found"))
        })?;

        let option = |name: &str| {
            variant
                .selected_options
                .iter()
                .find(|option| option.name == name)
                .map(|option| option.value.clone())
                .unwrap_or_default()
        };
        Ok(VariantOptions {
            age: option(AGE_OPTION),
            size: option(SIZE_OPTION),
            condition: option(CONDITION_OPTION),
        })
    }
}

fn join_messages(messages: &[GraphQlMessage]) -> String {
    messages
        .iter()
        .map(|message| message.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
