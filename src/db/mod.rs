pub mod catalog;
pub mod payment_installments;
pub mod pets;
pub mod policies;
pub mod policy_payments;
pub mod users;

use sqlx::{PgConnection, Postgres, Transaction};

use crate::error::ReconcileResult;

/// First key of the two-key advisory lock taken around order provisioning, so the lock space
/// does not collide with other users of `pg_advisory_xact_lock`.
const ORDER_LOCK_NAMESPACE: i32 = 0x4f52_4452;

/// Resolves a scoped transaction from the outcome of the step that ran inside it: commit on
/// `Ok`, roll back on `Err`. A transaction dropped without reaching this point (panic or
/// cancelled future) is rolled back by sqlx.
pub async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    outcome: ReconcileResult<T>,
) -> ReconcileResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(?rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}

/// Serializes provisioning of one remote order until the surrounding transaction ends.
pub async fn lock_order_ref(conn: &mut PgConnection, order_ref: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
        .bind(ORDER_LOCK_NAMESPACE)
        .bind(order_ref)
        .execute(conn)
        .await?;
    Ok(())
}
