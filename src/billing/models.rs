use std::str::FromStr;

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Calendar months covered by one billing cycle.
pub const BILLING_PERIOD_MONTHS: u32 = 1;

/// Length of a policy's coverage window.
pub const COVERAGE_MONTHS: u32 = 12;

/// key: billing-models -> users,pets,catalog,policies,installments
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub shopify_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Pet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub age_range_id: Uuid,
    pub size_id: Uuid,
    pub condition_id: Uuid,
    pub type_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry; read-only to the engine.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub monthly_price: Decimal,
    pub annual_limit: Decimal,
    pub description: Option<String>,
    pub shopify_id: String,
    pub pet_type_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Policy {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pet_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub start_date: NaiveDate,
    pub next_payment: NaiveDate,
    pub is_manual: bool,
    pub limit_period_start: NaiveDate,
    pub limit_period_end: NaiveDate,
    /// Remote variant the policy is billed against.
    pub shopify_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn status(&self) -> Option<PolicyStatus> {
        PolicyStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentInstallment {
    pub id: Uuid,
    pub installment_number: i32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub status: String,
    /// Bare numeric remote order id; unique per installment.
    pub shopify_order_id: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PolicyPayment {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub payment_installment_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    PaymentPending,
    Canceled,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Active => "active",
            PolicyStatus::PaymentPending => "payment_pending",
            PolicyStatus::Canceled => "canceled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(PolicyStatus::Active),
            "payment_pending" => Some(PolicyStatus::PaymentPending),
            "canceled" => Some(PolicyStatus::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
        }
    }
}

/// Statuses an inbound order imposes on the installment it opens and on the policies it bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStatus {
    pub installment: InstallmentStatus,
    pub policy: PolicyStatus,
}

impl CycleStatus {
    pub fn from_financial_status(financial_status: &str) -> Self {
        if financial_status.trim().eq_ignore_ascii_case("paid") {
            CycleStatus {
                installment: InstallmentStatus::Paid,
                policy: PolicyStatus::Active,
            }
        } else {
            CycleStatus {
                installment: InstallmentStatus::Pending,
                policy: PolicyStatus::PaymentPending,
            }
        }
    }
}

pub fn next_billing_date(from: NaiveDate) -> NaiveDate {
    from.checked_add_months(Months::new(BILLING_PERIOD_MONTHS))
        .unwrap_or(from)
}

pub fn coverage_end(from: NaiveDate) -> NaiveDate {
    from.checked_add_months(Months::new(COVERAGE_MONTHS))
        .unwrap_or(from)
}

/// Sequence number of an installment, taken from the remote order's display name (`#1043`).
pub fn installment_number(display_name: &str) -> Option<i32> {
    display_name
        .trim()
        .trim_start_matches('#')
        .parse::<i32>()
        .ok()
}

pub fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn financial_status_paid_activates_cycle() {
        let status = CycleStatus::from_financial_status("PAID");
        assert_eq!(status.installment, InstallmentStatus::Paid);
        assert_eq!(status.policy, PolicyStatus::Active);

        let status = CycleStatus::from_financial_status("pending");
        assert_eq!(status.installment, InstallmentStatus::Pending);
        assert_eq!(status.policy, PolicyStatus::PaymentPending);

        let status = CycleStatus::from_financial_status("partially_paid");
        assert_eq!(status.policy, PolicyStatus::PaymentPending);
    }

    #[test]
    fn billing_date_moves_one_calendar_month() {
        let may = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            next_billing_date(may),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );

        let end_of_january = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            next_billing_date(end_of_january),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            coverage_end(may),
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()
        );
    }

    #[test]
    fn remote_order_fields_parse() {
        assert_eq!(installment_number("#1043"), Some(1043));
        assert_eq!(installment_number("1043"), Some(1043));
        assert_eq!(installment_number("#A-1"), None);
        assert_eq!(parse_amount(" 25.50 "), Some(Decimal::new(2550, 2)));
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn policy_status_round_trips_through_storage_names() {
        for status in [
            PolicyStatus::Active,
            PolicyStatus::PaymentPending,
            PolicyStatus::Canceled,
        ] {
            assert_eq!(PolicyStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PolicyStatus::parse("suspended"), None);
    }
}
