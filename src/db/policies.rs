use chrono::NaiveDate;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::billing::models::{Policy, PolicyStatus};

const POLICY_COLUMNS: &str = "id, user_id, pet_id, plan_id, status, start_date, next_payment, \
     is_manual, limit_period_start, limit_period_end, shopify_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewPolicy<'a> {
    pub user_id: Uuid,
    pub pet_id: Uuid,
    pub plan_id: Uuid,
    pub status: PolicyStatus,
    pub start_date: NaiveDate,
    pub next_payment: NaiveDate,
    pub is_manual: bool,
    pub limit_period_start: NaiveDate,
    pub limit_period_end: NaiveDate,
    pub shopify_id: &'a str,
}

/// A manually billed policy whose next payment has arrived, with what the cycle job needs to
/// bill its owner.
#[derive(Debug, Clone, FromRow)]
pub struct DuePolicy {
    pub policy_id: Uuid,
    pub user_id: Uuid,
    pub next_payment: NaiveDate,
    /// Remote variant billed for this policy.
    pub variant_ref: String,
    pub user_name: String,
    pub user_email: String,
    pub user_shopify_id: String,
    pub pet_name: String,
}

pub async fn insert_policy<'c, E>(executor: E, input: NewPolicy<'_>) -> Result<Policy, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let statement = format!(
        r#"
        INSERT INTO policies (
            id, user_id, pet_id, plan_id, status, start_date, next_payment, is_manual,
            limit_period_start, limit_period_end, shopify_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {POLICY_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Policy>(&statement)
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.pet_id)
        .bind(input.plan_id)
        .bind(input.status.as_str())
        .bind(input.start_date)
        .bind(input.next_payment)
        .bind(input.is_manual)
        .bind(input.limit_period_start)
        .bind(input.limit_period_end)
        .bind(input.shopify_id)
        .fetch_one(executor)
        .await
}

pub async fn get_policy<'c, E>(executor: E, policy_id: Uuid) -> Result<Option<Policy>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let statement = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1");
    sqlx::query_as::<_, Policy>(&statement)
        .bind(policy_id)
        .fetch_optional(executor)
        .await
}

/// key: cycle-selection -> active manual policies with next_payment <= today, grouped by owner
pub async fn due_manual_policies<'c, E>(executor: E, today: NaiveDate) -> Result<Vec<DuePolicy>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, DuePolicy>(
        r#"
        SELECT
            p.id AS policy_id,
            p.user_id,
            p.next_payment,
            p.shopify_id AS variant_ref,
            u.name AS user_name,
            u.email AS user_email,
            u.shopify_id AS user_shopify_id,
            pet.name AS pet_name
        FROM policies p
        JOIN users u ON u.id = p.user_id
        JOIN pets pet ON pet.id = p.pet_id
        WHERE p.status = 'active'
          AND p.is_manual
          AND p.next_payment <= $1
        ORDER BY p.user_id, p.created_at, p.id
        "#,
    )
    .bind(today)
    .fetch_all(executor)
    .await
}

/// Moves each active policy one billing period forward from its own next payment date and
/// marks it payment pending. Returns how many policies moved.
pub async fn advance_cycle<'c, E>(executor: E, policy_ids: &[Uuid]) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE policies
        SET next_payment = (next_payment + INTERVAL '1 month')::date,
            status = 'payment_pending',
            updated_at = NOW()
        WHERE id = ANY($1)
          AND status = 'active'
        "#,
    )
    .bind(policy_ids)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_status<'c, E>(
    executor: E,
    policy_ids: &[Uuid],
    status: PolicyStatus,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE policies
        SET status = $2,
            updated_at = NOW()
        WHERE id = ANY($1)
        "#,
    )
    .bind(policy_ids)
    .bind(status.as_str())
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Cancels the policies of an unpaid cycle. Policies that already left `payment_pending`, or a
/// cycle whose installment was settled in the meantime, are left untouched.
pub async fn cancel_unpaid<'c, E>(
    executor: E,
    installment_id: Uuid,
    policy_ids: &[Uuid],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE policies
        SET status = 'canceled',
            updated_at = NOW()
        WHERE id = ANY($2)
          AND status = 'payment_pending'
          AND EXISTS (
              SELECT 1 FROM payment_installments
              WHERE id = $1 AND status = 'pending'
          )
        "#,
    )
    .bind(installment_id)
    .bind(policy_ids)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Reactivates the policies of a paid cycle. Canceled policies stay canceled.
pub async fn activate_pending<'c, E>(executor: E, policy_ids: &[Uuid]) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE policies
        SET status = 'active',
            updated_at = NOW()
        WHERE id = ANY($1)
          AND status = 'payment_pending'
        "#,
    )
    .bind(policy_ids)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
