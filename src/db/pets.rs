use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::billing::models::Pet;

#[derive(Debug, Clone)]
pub struct NewPet<'a> {
    pub user_id: Uuid,
    pub name: &'a str,
    pub breed: Option<&'a str>,
    pub gender: Option<&'a str>,
    pub age_range_id: Uuid,
    pub size_id: Uuid,
    pub condition_id: Uuid,
    pub type_id: Uuid,
}

/// Pets are unique per (owner, name); a repeated order for the same pet reuses the stored row.
pub async fn upsert_for_owner<'c, E>(executor: E, input: NewPet<'_>) -> Result<Pet, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Pet>(
        r#"
        INSERT INTO pets (
            id, user_id, name, breed, gender, age_range_id, size_id, condition_id, type_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
        RETURNING
            id, user_id, name, breed, gender, age_range_id, size_id, condition_id, type_id,
            created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.user_id)
    .bind(input.name)
    .bind(input.breed)
    .bind(input.gender)
    .bind(input.age_range_id)
    .bind(input.size_id)
    .bind(input.condition_id)
    .bind(input.type_id)
    .fetch_one(executor)
    .await
}
