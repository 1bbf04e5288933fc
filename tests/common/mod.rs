#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use reconciler::billing::models::PolicyStatus;
use reconciler::billing::{BillingSettings, OrderEvent};
use reconciler::db::{
    pets::{self, NewPet},
    policies::{self, NewPolicy},
    users::{self, NewUser},
};
use reconciler::gateway::{
    CreateOrderRequest, CreatedOrder, GatewayError, GatewayResult, OrderGateway, PetMetadata,
    VariantOptions,
};
use reconciler::notifications::NotificationJob;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PLAN_PRODUCT: &str = "7001";

/// In-memory order platform.
#[derive(Default)]
pub struct FakeGateway {
    pub pets: Mutex<Vec<PetMetadata>>,
    pub variants: Mutex<HashMap<String, VariantOptions>>,
    pub created: Mutex<Vec<CreateOrderRequest>>,
    pub failing_customers: Mutex<HashSet<String>>,
    pub variant_lookups: AtomicUsize,
    next_order: AtomicU64,
}

impl FakeGateway {
    pub fn with_pets(pets: Vec<PetMetadata>) -> Self {
        let gateway = Self::default();
        *gateway.pets.lock().unwrap() = pets;
        gateway
    }

    pub fn add_variant(&self, variant_ref: &str, age: &str, size: &str, condition: &str) {
        self.variants.lock().unwrap().insert(
            variant_ref.to_string(),
            VariantOptions {
                age: age.to_string(),
                size: size.to_string(),
                condition: condition.to_string(),
            },
        );
    }

    pub fn fail_orders_for(&self, customer_ref: &str) {
        self.failing_customers
            .lock()
            .unwrap()
            .insert(customer_ref.to_string());
    }

    pub fn created_orders(&self) -> Vec<CreateOrderRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for FakeGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> GatewayResult<CreatedOrder> {
        if self
            .failing_customers
            .lock()
            .unwrap()
            .contains(&request.customer_ref)
        {
            return Err(GatewayError::UserErrors("customer is blocked".to_string()));
        }
        let sequence = 5000 + self.next_order.fetch_add(1, Ordering::SeqCst);
        let total = Decimal::new(1500, 2) * Decimal::from(request.line_items.len() as i64);
        self.created.lock().unwrap().push(request);
        Ok(CreatedOrder {
            order_ref: format!("900{sequence}"),
            display_name: format!("#{sequence}"),
            total_amount: total,
        })
    }

    async fn fetch_order_pets(&self, _order_ref: &str) -> GatewayResult<Vec<PetMetadata>> {
        Ok(self.pets.lock().unwrap().clone())
    }

    async fn resolve_variant(&self, variant_ref: &str) -> GatewayResult<VariantOptions> {
        self.variant_lookups.fetch_add(1, Ordering::SeqCst);
        self.variants
            .lock()
            .unwrap()
            .get(variant_ref)
            .cloned()
            .ok_or_else(|| GatewayError::GraphQl(format!("product variant {variant_ref} not found")))
    }
}

pub fn settings() -> BillingSettings {
    BillingSettings {
        timezone: chrono_tz::America::Caracas,
        pay_link_base: "https://pay.example.com/".to_string(),
    }
}

pub fn pet(name: &str, pet_type: &str, variant: &str) -> PetMetadata {
    PetMetadata {
        name: name.to_string(),
        pet_type: pet_type.to_string(),
        gender: "hembra".to_string(),
        breed: "mestizo".to_string(),
        product_variant_id: variant.to_string(),
    }
}

/// Order event as the platform delivers it; each `(product, variant)` pair is one line item.
pub fn order_event(id: i64, tags: &str, financial_status: &str, items: &[(i64, i64)]) -> OrderEvent {
    let line_items: Vec<_> = items
        .iter()
        .map(|(product, variant)| {
            json!({"product_id": product, "variant_id": variant, "quantity": 1, "price": "15.00"})
        })
        .collect();
    serde_json::from_value(json!({
        "id": id,
        "name": format!("#{}", id % 10_000),
        "financial_status": financial_status,
        "tags": tags,
        "line_items": line_items,
        "customer": {
            "id": 55,
            "first_name": "Ana",
            "last_name": "Pérez",
            "email": "ana@example.com",
            "default_address": {"city": "Caracas", "phone": "+58 412 0000000"}
        },
        "current_total_price_set": {"shop_money": {"amount": "45.00", "currency_code": "USD"}}
    }))
    .unwrap()
}

#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    pub type_id: Uuid,
    pub age_range_id: Uuid,
    pub size_id: Uuid,
    pub condition_id: Uuid,
    pub plan_id: Uuid,
}

pub async fn seed_catalog(pool: &PgPool) -> Catalog {
    let type_id = Uuid::new_v4();
    sqlx::query("INSERT INTO pets_types (id, name) VALUES ($1, 'perro')")
        .bind(type_id)
        .execute(pool)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for (table, name) in [
        ("pets_age_ranges", "adulto"),
        ("pets_sizes", "mediano"),
        ("pets_conditions", "sano"),
    ] {
        let id = Uuid::new_v4();
        sqlx::query(&format!(
            "INSERT INTO {table} (id, name, pet_type_id) VALUES ($1, $2, $3)"
        ))
        .bind(id)
        .bind(name)
        .bind(type_id)
        .execute(pool)
        .await
        .unwrap();
        ids.push(id);
    }

    let plan_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO plans (id, name, monthly_price, annual_limit, shopify_id, pet_type_id) VALUES ($1, 'Plan Esencial', 15.00, 1500.00, $2, $3)",
    )
    .bind(plan_id)
    .bind(PLAN_PRODUCT)
    .bind(type_id)
    .execute(pool)
    .await
    .unwrap();

    Catalog {
        type_id,
        age_range_id: ids[0],
        size_id: ids[1],
        condition_id: ids[2],
        plan_id,
    }
}

/// Stores a customer, a pet and a manual policy in the given state.
pub async fn seed_policy(
    pool: &PgPool,
    catalog: &Catalog,
    customer_ref: &str,
    pet_name: &str,
    status: PolicyStatus,
    next_payment: NaiveDate,
) -> (Uuid, Uuid) {
    let email = format!("{customer_ref}@example.com");
    let user = users::upsert_by_shopify_id(
        pool,
        NewUser {
            name: "Ana Pérez",
            email: &email,
            phone: None,
            city: None,
            shopify_id: customer_ref,
        },
    )
    .await
    .unwrap();
    let stored_pet = pets::upsert_for_owner(
        pool,
        NewPet {
            user_id: user.id,
            name: pet_name,
            breed: None,
            gender: None,
            age_range_id: catalog.age_range_id,
            size_id: catalog.size_id,
            condition_id: catalog.condition_id,
            type_id: catalog.type_id,
        },
    )
    .await
    .unwrap();
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let policy = policies::insert_policy(
        pool,
        NewPolicy {
            user_id: user.id,
            pet_id: stored_pet.id,
            plan_id: catalog.plan_id,
            status,
            start_date: start,
            next_payment,
            is_manual: true,
            limit_period_start: start,
            limit_period_end: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            shopify_id: "88",
        },
    )
    .await
    .unwrap();
    (user.id, policy.id)
}

pub async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn drain(receiver: &mut mpsc::Receiver<NotificationJob>) -> Vec<NotificationJob> {
    let mut jobs = Vec::new();
    while let Ok(job) = receiver.try_recv() {
        jobs.push(job);
    }
    jobs
}
