pub mod cycles;
pub mod events;
pub mod models;
pub mod provisioning;
pub mod reminders;
pub mod scheduler;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::gateway::strip_gid;

pub use cycles::{CycleRunSummary, CycleScheduler};
pub use events::{OrderEvent, OrderKind};
pub use provisioning::{ProvisionOutcome, Provisioning};
pub use reminders::{escalation, Escalation, ReminderEngine, ReminderRunSummary};

/// key: billing-settings -> calendar zone + pay link shared by every billing job
#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub timezone: Tz,
    pub pay_link_base: String,
}

impl BillingSettings {
    /// Calendar date of `now` in the billing zone. Due dates and reminder buckets use this.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Customer-facing pay link for a remote order.
    pub fn pay_link(&self, order_ref: &str) -> String {
        format!("{}?orderId={}", self.pay_link_base, strip_gid(order_ref))
    }
}
