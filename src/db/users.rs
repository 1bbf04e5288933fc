use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::billing::models::User;

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub city: Option<&'a str>,
    pub shopify_id: &'a str,
}

/// Returns the user registered under `shopify_id`, creating it on first sight. Existing rows
/// are returned untouched.
pub async fn upsert_by_shopify_id<'c, E>(executor: E, input: NewUser<'_>) -> Result<User, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, name, email, phone, city, shopify_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (shopify_id) DO UPDATE SET shopify_id = EXCLUDED.shopify_id
        RETURNING id, name, email, phone, city, shopify_id, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.name)
    .bind(input.email)
    .bind(input.phone)
    .bind(input.city)
    .bind(input.shopify_id)
    .fetch_one(executor)
    .await
}
