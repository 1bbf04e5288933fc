use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::MANUAL_RECURRING_TAG;
use super::models::{installment_number, next_billing_date, InstallmentStatus, PaymentInstallment};
use super::BillingSettings;
use crate::db::{
    self,
    payment_installments::{self, NewPaymentInstallment},
    policies::{self, DuePolicy},
    policy_payments,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::gateway::{CreateOrderRequest, CreatedOrder, OrderGateway, OrderLine};
use crate::notifications::{templates, EmailVars, NotificationHandle, NotificationJob};

pub const RECURRING_ORDER_NOTE: &str = "Order created for manual subscription recurring payment";
pub const RECURRING_FINANCIAL_STATUS: &str = "PENDING";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleRunSummary {
    pub due_policies: usize,
    pub groups: usize,
    pub opened: usize,
    pub failed: usize,
}

/// key: cycle-scheduler -> one remote order + installment per owner of due manual policies
pub struct CycleScheduler {
    pool: PgPool,
    gateway: Arc<dyn OrderGateway>,
    notifications: NotificationHandle,
    settings: BillingSettings,
}

impl CycleScheduler {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn OrderGateway>,
        notifications: NotificationHandle,
        settings: BillingSettings,
    ) -> Self {
        Self {
            pool,
            gateway,
            notifications,
            settings,
        }
    }

    /// Opens the next billing cycle for every active manual policy due on or before today.
    /// A failing owner group is logged and left due; the run carries on with the next group.
    pub async fn open_next_cycle(&self, now: DateTime<Utc>) -> ReconcileResult<CycleRunSummary> {
        let today = self.settings.today(now);
        let due = policies::due_manual_policies(&self.pool, today).await?;

        let mut summary = CycleRunSummary {
            due_policies: due.len(),
            ..Default::default()
        };
        let groups = group_by_owner(due);
        summary.groups = groups.len();

        for (user_id, group) in groups {
            match self.open_group(&group, today).await {
                Ok(installment) => {
                    summary.opened += 1;
                    info!(
                        %user_id,
                        installment_id = %installment.id,
                        order_ref = %installment.shopify_order_id,
                        policies = group.len(),
                        "opened billing cycle"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(?err, %user_id, policies = group.len(), "failed to open billing cycle");
                }
            }
        }

        Ok(summary)
    }

    async fn open_group(
        &self,
        group: &[DuePolicy],
        today: NaiveDate,
    ) -> ReconcileResult<PaymentInstallment> {
        let Some(owner) = group.first() else {
            return Err(ReconcileError::malformed("empty billing group"));
        };

        let order = self
            .gateway
            .create_order(CreateOrderRequest {
                customer_ref: owner.user_shopify_id.clone(),
                email: owner.user_email.clone(),
                tags: vec![MANUAL_RECURRING_TAG.to_string()],
                line_items: group
                    .iter()
                    .map(|policy| OrderLine {
                        variant_ref: policy.variant_ref.clone(),
                        quantity: 1,
                    })
                    .collect(),
                note: RECURRING_ORDER_NOTE.to_string(),
                financial_status: RECURRING_FINANCIAL_STATUS.to_string(),
            })
            .await?;

        let policy_ids: Vec<Uuid> = group.iter().map(|policy| policy.policy_id).collect();
        let mut tx = self.pool.begin().await?;
        let recorded = record_cycle(&mut tx, &order, &policy_ids, today).await;
        let installment = match db::finish(tx, recorded).await {
            Ok(installment) => installment,
            Err(err) => {
                warn!(
                    order_ref = %order.order_ref,
                    user_id = %owner.user_id,
                    "remote order created but not recorded locally"
                );
                return Err(err);
            }
        };

        self.notifications
            .enqueue(NotificationJob::new(
                templates::CREATE_ORDER,
                owner.user_email.clone(),
                EmailVars {
                    display_name: owner.user_name.clone(),
                    pets: group.iter().map(|policy| policy.pet_name.clone()).collect(),
                    pay_url: self.settings.pay_link(&order.order_ref),
                    days_left: 0,
                },
            ))
            .await;

        Ok(installment)
    }
}

async fn record_cycle(
    conn: &mut PgConnection,
    order: &CreatedOrder,
    policy_ids: &[Uuid],
    today: NaiveDate,
) -> ReconcileResult<PaymentInstallment> {
    let number = installment_number(&order.display_name).ok_or_else(|| {
        ReconcileError::malformed(format!(
            "order name '{}' is not a sequence number",
            order.display_name
        ))
    })?;

    let installment = payment_installments::insert_installment(
        &mut *conn,
        NewPaymentInstallment {
            installment_number: number,
            due_date: next_billing_date(today),
            amount: order.total_amount,
            status: InstallmentStatus::Pending,
            shopify_order_id: &order.order_ref,
            paid_at: None,
        },
    )
    .await?;
    policy_payments::link_policies(&mut *conn, installment.id, policy_ids).await?;

    let advanced = policies::advance_cycle(&mut *conn, policy_ids).await?;
    if advanced != policy_ids.len() as u64 {
        return Err(ReconcileError::malformed(format!(
            "{} of {} policies were no longer active",
            policy_ids.len() as u64 - advanced,
            policy_ids.len()
        )));
    }

    Ok(installment)
}

/// Groups due policies by owner, keeping each owner's policies in selection order.
fn group_by_owner(due: Vec<DuePolicy>) -> BTreeMap<Uuid, Vec<DuePolicy>> {
    let mut groups: BTreeMap<Uuid, Vec<DuePolicy>> = BTreeMap::new();
    for policy in due {
        groups.entry(policy.user_id).or_default().push(policy);
    }
    groups
}
