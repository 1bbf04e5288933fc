use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::billing::models::{InstallmentStatus, PaymentInstallment};

const INSTALLMENT_COLUMNS: &str = "id, installment_number, due_date, amount, status, \
     shopify_order_id, paid_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewPaymentInstallment<'a> {
    pub installment_number: i32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub status: InstallmentStatus,
    pub shopify_order_id: &'a str,
    pub paid_at: Option<DateTime<Utc>>,
}

pub async fn exists_for_order<'c, E>(executor: E, shopify_order_id: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM payment_installments WHERE shopify_order_id = $1)",
    )
    .bind(shopify_order_id)
    .fetch_one(executor)
    .await
}

pub async fn insert_installment<'c, E>(
    executor: E,
    input: NewPaymentInstallment<'_>,
) -> Result<PaymentInstallment, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let statement = format!(
        r#"
        INSERT INTO payment_installments (
            id, installment_number, due_date, amount, status, shopify_order_id, paid_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {INSTALLMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, PaymentInstallment>(&statement)
        .bind(Uuid::new_v4())
        .bind(input.installment_number)
        .bind(input.due_date)
        .bind(input.amount)
        .bind(input.status.as_str())
        .bind(input.shopify_order_id)
        .bind(input.paid_at)
        .fetch_one(executor)
        .await
}

pub async fn find_by_order_ref<'c, E>(
    executor: E,
    shopify_order_id: &str,
) -> Result<Option<PaymentInstallment>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let statement = format!(
        "SELECT {INSTALLMENT_COLUMNS} FROM payment_installments WHERE shopify_order_id = $1"
    );
    sqlx::query_as::<_, PaymentInstallment>(&statement)
        .bind(shopify_order_id)
        .fetch_optional(executor)
        .await
}

/// Installment billed by a remote order, reached through its policy links. Installments with no
/// linked policy are not considered reconciled and are not returned.
pub async fn find_linked_by_order_ref<'c, E>(
    executor: E,
    shopify_order_id: &str,
) -> Result<Option<PaymentInstallment>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, PaymentInstallment>(
        r#"
        SELECT
            pi.id, pi.installment_number, pi.due_date, pi.amount, pi.status,
            pi.shopify_order_id, pi.paid_at, pi.created_at, pi.updated_at
        FROM payment_installments pi
        WHERE pi.shopify_order_id = $1
          AND EXISTS (
              SELECT 1 FROM policies_payments pp WHERE pp.payment_installment_id = pi.id
          )
        "#,
    )
    .bind(shopify_order_id)
    .fetch_optional(executor)
    .await
}

/// Settles a pending installment. `None` when it was already paid.
pub async fn mark_paid<'c, E>(
    executor: E,
    installment_id: Uuid,
    paid_at: DateTime<Utc>,
) -> Result<Option<PaymentInstallment>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let statement = format!(
        r#"
        UPDATE payment_installments
        SET status = 'paid',
            paid_at = $2,
            updated_at = NOW()
        WHERE id = $1
          AND status = 'pending'
        RETURNING {INSTALLMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, PaymentInstallment>(&statement)
        .bind(installment_id)
        .bind(paid_at)
        .fetch_optional(executor)
        .await
}
