use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use super::BillingSettings;
use crate::db::{self, policies, policy_payments::{self, PendingCycleRow}};
use crate::error::ReconcileResult;
use crate::notifications::{templates, EmailVars, NotificationHandle, NotificationJob};

/// Days in the grace window a reminder counts down from.
pub const GRACE_DAYS: i64 = 30;

/// Last day pending that still gets a plain reminder.
pub const LAST_REMINDER_DAY: i64 = 27;

/// Day pending on which an unpaid cycle is canceled.
pub const CANCELLATION_DAY: i64 = 31;

/// Action taken for one unpaid cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub template: &'static str,
    /// Value rendered as "days left"; zero is omitted from the email.
    pub days_left: i64,
    pub cancel: bool,
}

/// Day-bucket table for an unpaid cycle:
/// 1..=27 remind, 31 cancel, past 31 offer reactivation, anything else waits.
pub fn escalation(days_pending: i64) -> Option<Escalation> {
    match days_pending {
        1..=LAST_REMINDER_DAY => Some(Escalation {
            template: templates::REMINDER,
            days_left: GRACE_DAYS - days_pending,
            cancel: false,
        }),
        CANCELLATION_DAY => Some(Escalation {
            template: templates::CANCELLATION,
            days_left: 0,
            cancel: true,
        }),
        days if days > CANCELLATION_DAY => Some(Escalation {
            template: templates::REACTIVATION,
            days_left: GRACE_DAYS,
            cancel: false,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderRunSummary {
    pub groups: usize,
    pub reminders: usize,
    pub cancellations: usize,
    pub reactivations: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Policies billed under one unpaid installment, in selection order.
#[derive(Debug, Clone)]
struct InstallmentGroup {
    payment_installment_id: Uuid,
    rows: Vec<PendingCycleRow>,
}

/// key: reminder-engine -> reminder / cancellation / reactivation per unpaid installment
pub struct ReminderEngine {
    pool: PgPool,
    notifications: NotificationHandle,
    settings: BillingSettings,
}

impl ReminderEngine {
    pub fn new(pool: PgPool, notifications: NotificationHandle, settings: BillingSettings) -> Self {
        Self {
            pool,
            notifications,
            settings,
        }
    }

    pub async fn escalate_pending(&self, now: DateTime<Utc>) -> ReconcileResult<ReminderRunSummary> {
        let today = self.settings.today(now);
        let rows = policy_payments::pending_cycles(&self.pool).await?;
        let groups = group_by_installment(rows);

        let mut summary = ReminderRunSummary {
            groups: groups.len(),
            ..Default::default()
        };

        for group in groups {
            // The first policy selected speaks for the whole cycle.
            let Some(lead) = group.rows.first() else {
                continue;
            };
            let days_pending = (today - lead.next_payment).num_days();
            let Some(step) = escalation(days_pending) else {
                summary.skipped += 1;
                continue;
            };

            if step.cancel {
                let policy_ids: Vec<Uuid> = group.rows.iter().map(|row| row.policy_id).collect();
                match self
                    .cancel_unpaid_cycle(group.payment_installment_id, &policy_ids)
                    .await
                {
                    Ok(0) => {
                        summary.skipped += 1;
                        info!(
                            installment_id = %group.payment_installment_id,
                            "cycle settled before cancellation; nothing to cancel"
                        );
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        summary.failed += 1;
                        error!(
                            ?err,
                            installment_id = %group.payment_installment_id,
                            "failed to cancel unpaid cycle"
                        );
                        continue;
                    }
                }
            }

            match step.template {
                templates::REMINDER => summary.reminders += 1,
                templates::CANCELLATION => summary.cancellations += 1,
                _ => summary.reactivations += 1,
            }
            info!(
                installment_id = %group.payment_installment_id,
                days_pending,
                template = step.template,
                "escalating unpaid cycle"
            );

            self.notifications
                .enqueue(NotificationJob::new(
                    step.template,
                    lead.user_email.clone(),
                    EmailVars {
                        display_name: lead.user_name.clone(),
                        pets: group.rows.iter().map(|row| row.pet_name.clone()).collect(),
                        pay_url: self.settings.pay_link(&lead.shopify_order_id),
                        days_left: step.days_left,
                    },
                ))
                .await;
        }

        Ok(summary)
    }

    /// Cancels the policies billed by an unpaid installment and returns how many changed.
    /// Zero means the cycle was paid after it was selected.
    pub async fn cancel_unpaid_cycle(
        &self,
        installment_id: Uuid,
        policy_ids: &[Uuid],
    ) -> ReconcileResult<u64> {
        let mut tx = self.pool.begin().await?;
        let canceled = policies::cancel_unpaid(&mut *tx, installment_id, policy_ids)
            .await
            .map_err(Into::into);
        db::finish(tx, canceled).await
    }
}

fn group_by_installment(rows: Vec<PendingCycleRow>) -> Vec<InstallmentGroup> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<InstallmentGroup> = Vec::new();
    for row in rows {
        match index.get(&row.payment_installment_id) {
            Some(position) => groups[*position].rows.push(row),
            None => {
                index.insert(row.payment_installment_id, groups.len());
                groups.push(InstallmentGroup {
                    payment_installment_id: row.payment_installment_id,
                    rows: vec![row],
                });
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn reminder_window_counts_down() {
        let first = escalation(1).unwrap();
        assert_eq!(first.template, templates::REMINDER);
        assert_eq!(first.days_left, 29);
        assert!(!first.cancel);

        let last = escalation(27).unwrap();
        assert_eq!(last.template, templates::REMINDER);
        assert_eq!(last.days_left, 3);
    }

    #[test]
    fn quiet_days_emit_nothing() {
        for days in [-3, 0, 28, 29, 30] {
            assert_eq!(escalation(days), None, "day {days}");
        }
    }

    #[test]
    fn day_thirty_one_cancels() {
        let step = escalation(31).unwrap();
        assert_eq!(step.template, templates::CANCELLATION);
        assert_eq!(step.days_left, 0);
        assert!(step.cancel);
    }

    #[test]
    fn after_cancellation_offers_reactivation() {
        for days in [32, 45, 400] {
            let step = escalation(days).unwrap();
            assert_eq!(step.template, templates::REACTIVATION);
            assert_eq!(step.days_left, 30);
            assert!(!step.cancel);
        }
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let row = |installment: Uuid, pet: &str| PendingCycleRow {
            payment_installment_id: installment,
            shopify_order_id: "1".to_string(),
            policy_id: Uuid::new_v4(),
            next_payment: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            user_name: "Ana".to_string(),
            user_email: "ana@example.com".to_string(),
            pet_name: pet.to_string(),
        };

        let groups = group_by_installment(vec![
            row(first, "Luna"),
            row(second, "Rocky"),
            row(first, "Toby"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].payment_installment_id, first);
        assert_eq!(groups[0].rows.len(), 2);
        assert_eq!(groups[1].rows[0].pet_name, "Rocky");
    }
}
