use chrono::NaiveDate;
use sqlx::{Executor, FromRow, PgConnection, Postgres};
use uuid::Uuid;

use crate::billing::models::PolicyPayment;

/// One policy of an unpaid manual cycle, joined to everything the reminder job renders.
#[derive(Debug, Clone, FromRow)]
pub struct PendingCycleRow {
    pub payment_installment_id: Uuid,
    pub shopify_order_id: String,
    pub policy_id: Uuid,
    pub next_payment: NaiveDate,
    pub user_name: String,
    pub user_email: String,
    pub pet_name: String,
}

/// Links every policy to the installment. Links that already exist are kept as they are.
pub async fn link_policies(
    conn: &mut PgConnection,
    payment_installment_id: Uuid,
    policy_ids: &[Uuid],
) -> Result<Vec<PolicyPayment>, sqlx::Error> {
    let mut links = Vec::with_capacity(policy_ids.len());
    for policy_id in policy_ids {
        let link = sqlx::query_as::<_, PolicyPayment>(
            r#"
            INSERT INTO policies_payments (id, policy_id, payment_installment_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (policy_id, payment_installment_id)
                DO UPDATE SET policy_id = EXCLUDED.policy_id
            RETURNING id, policy_id, payment_installment_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(policy_id)
        .bind(payment_installment_id)
        .fetch_one(&mut *conn)
        .await?;
        links.push(link);
    }
    Ok(links)
}

/// Distinct policies billed by a remote order, in the order they were first linked.
pub async fn policy_ids_for_order<'c, E>(executor: E, shopify_order_id: &str) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT pp.policy_id
        FROM policies_payments pp
        JOIN payment_installments pi ON pi.id = pp.payment_installment_id
        WHERE pi.shopify_order_id = $1
        GROUP BY pp.policy_id
        ORDER BY MIN(pp.created_at), pp.policy_id
        "#,
    )
    .bind(shopify_order_id)
    .fetch_all(executor)
    .await
}

/// key: reminder-selection -> payment_pending manual policies x their unpaid installments
pub async fn pending_cycles<'c, E>(executor: E) -> Result<Vec<PendingCycleRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, PendingCycleRow>(
        r#"
        SELECT
            pi.id AS payment_installment_id,
            pi.shopify_order_id,
            p.id AS policy_id,
            p.next_payment,
            u.name AS user_name,
            u.email AS user_email,
            pet.name AS pet_name
        FROM policies_payments pp
        JOIN payment_installments pi ON pi.id = pp.payment_installment_id
        JOIN policies p ON p.id = pp.policy_id
        JOIN users u ON u.id = p.user_id
        JOIN pets pet ON pet.id = p.pet_id
        WHERE p.status = 'payment_pending'
          AND p.is_manual
          AND pi.status = 'pending'
        ORDER BY pi.created_at, pi.id, p.created_at, p.id
        "#,
    )
    .fetch_all(executor)
    .await
}
