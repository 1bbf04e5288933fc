pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod notifications;
pub mod routes;
pub mod webhooks;

pub use billing::{
    BillingSettings, CycleScheduler, OrderEvent, ProvisionOutcome, Provisioning, ReminderEngine,
};
pub use error::{ReconcileError, ReconcileResult};
pub use gateway::{OrderGateway, ShopifyGateway};
pub use notifications::{Mailer, NotificationDispatcher, NotificationHandle, NotificationJob};
