use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::billing::models::Plan;

/// Classifier reference tables resolved during provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    PetType,
    AgeRange,
    Size,
    Condition,
}

impl Classifier {
    pub fn table(&self) -> &'static str {
        match self {
            Classifier::PetType => "pets_types",
            Classifier::AgeRange => "pets_age_ranges",
            Classifier::Size => "pets_sizes",
            Classifier::Condition => "pets_conditions",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classifier::PetType => "pet type",
            Classifier::AgeRange => "age range",
            Classifier::Size => "size",
            Classifier::Condition => "condition",
        }
    }
}

/// Case-insensitive lookup of a classifier row by name.
pub async fn classifier_id<'c, E>(
    executor: E,
    classifier: Classifier,
    name: &str,
) -> Result<Option<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let statement = format!(
        "SELECT id FROM {} WHERE LOWER(name) = LOWER($1) ORDER BY id LIMIT 1",
        classifier.table()
    );
    sqlx::query_scalar::<_, Uuid>(&statement)
        .bind(name.trim())
        .fetch_optional(executor)
        .await
}

pub async fn plan_by_shopify_id<'c, E>(executor: E, shopify_id: &str) -> Result<Option<Plan>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Plan>(
        r#"
        SELECT
            id, name, monthly_price, annual_limit, description, shopify_id, pet_type_id,
            created_at
        FROM plans
        WHERE shopify_id = $1
        "#,
    )
    .bind(shopify_id)
    .fetch_optional(executor)
    .await
}
