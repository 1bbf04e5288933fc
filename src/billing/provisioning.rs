use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::events::{LineItem, OrderEvent, OrderKind};
use super::models::{
    coverage_end, installment_number, next_billing_date, parse_amount, CycleStatus,
    InstallmentStatus, PaymentInstallment,
};
use super::BillingSettings;
use crate::db::{
    self,
    catalog::{self, Classifier},
    payment_installments::{self, NewPaymentInstallment},
    pets::{self, NewPet},
    policies::{self, NewPolicy},
    policy_payments,
    users::{self, NewUser},
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::gateway::{strip_gid, OrderGateway, PetMetadata, VariantOptions};
use crate::notifications::{templates, EmailVars, NotificationHandle, NotificationJob};

/// What one inbound order event did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// First order recorded: one installment billing `policies` new policies.
    Provisioned { installment_id: Uuid, policies: usize },
    /// Platform renewal linked to the policies of the original order.
    Renewed { installment_id: Uuid, policies: usize },
    /// Installment flipped to paid; `activated` pending policies moved back to active.
    Paid { installment_id: Uuid, activated: u64 },
    /// The order was already reconciled by an earlier delivery.
    Duplicate,
    /// Order created by the cycle job itself.
    Ignored,
    /// Paid event for an order the store does not know.
    Unmatched,
}

/// Line-item variant as resolved on the platform.
#[derive(Debug, Clone)]
struct ResolvedVariant {
    product_ref: Option<String>,
    options: VariantOptions,
}

#[derive(Debug, Clone, Copy)]
struct Classifiers {
    type_id: Uuid,
    age_range_id: Uuid,
    size_id: Uuid,
    condition_id: Uuid,
    plan_id: Uuid,
}

struct FirstOrderWrite {
    installment: PaymentInstallment,
    pet_names: Vec<String>,
}

/// key: provisioning -> inbound order events into users, pets, policies, installments
pub struct Provisioning {
    pool: PgPool,
    gateway: Arc<dyn OrderGateway>,
    notifications: NotificationHandle,
    settings: BillingSettings,
}

impl Provisioning {
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

    /// Runs `order_created` on its own task. Callers that only acknowledge the delivery can drop
    /// the handle; tests await it.
    pub fn spawn_order_created(
        self: &Arc<Self>,
        event: OrderEvent,
    ) -> JoinHandle<ReconcileResult<ProvisionOutcome>> {
        let provisioning = Arc::clone(self);
        tokio::spawn(async move {
            let order_ref = event.order_ref();
            let result = provisioning.order_created(&event, Utc::now()).await;
            log_outcome("order created", &order_ref, &result);
            result
        })
    }

    pub fn spawn_order_paid(
        self: &Arc<Self>,
        event: OrderEvent,
    ) -> JoinHandle<ReconcileResult<ProvisionOutcome>> {
        let provisioning = Arc::clone(self);
        tokio::spawn(async move {
            let order_ref = event.order_ref();
            let result = provisioning.order_paid(&event, Utc::now()).await;
            log_outcome("order paid", &order_ref, &result);
            result
        })
    }

    pub async fn order_created(
        &self,
        event: &OrderEvent,
        now: DateTime<Utc>,
    ) -> ReconcileResult<ProvisionOutcome> {
        info!(order_id = event.id, tags = %event.tags, "received order created event");
        let status = CycleStatus::from_financial_status(&event.financial_status);

        let outcome = match event.kind() {
            OrderKind::ManualRenewal => Ok(ProvisionOutcome::Ignored),
            OrderKind::PlatformRenewal { original_order_ref } => {
                let original_order_ref = original_order_ref.ok_or_else(|| {
                    ReconcileError::malformed(format!(
                        "renewal tags carry no original order reference: '{}'",
                        event.tags
                    ))
                })?;
                self.renew(event, &original_order_ref, status, now).await
            }
            OrderKind::FirstOrder { manual_billing } => {
                self.provision_first_order(event, manual_billing, status, now)
                    .await
            }
        };

        // A concurrent delivery that committed first surfaces as a unique violation.
        match outcome {
            Err(err) if err.is_unique_violation() => Ok(ProvisionOutcome::Duplicate),
            other => other,
        }
    }

    /// Marks the installment billed by the order as paid and reactivates its pending policies.
    /// A repeated delivery for an installment that is already paid changes nothing.
    pub async fn order_paid(
        &self,
        event: &OrderEvent,
        now: DateTime<Utc>,
    ) -> ReconcileResult<ProvisionOutcome> {
        let order_ref = event.order_ref();
        let mut tx = self.pool.begin().await?;
        let outcome = mark_installment_paid(&mut tx, &order_ref, now).await;
        db::finish(tx, outcome).await
    }

    async fn provision_first_order(
        &self,
        event: &OrderEvent,
        manual_billing: bool,
        status: CycleStatus,
        now: DateTime<Utc>,
    ) -> ReconcileResult<ProvisionOutcome> {
        let order_ref = event.order_ref();
        if payment_installments::exists_for_order(&self.pool, &order_ref).await? {
            info!(%order_ref, "order already reconciled; skipping duplicate delivery");
            return Ok(ProvisionOutcome::Duplicate);
        }

        // Remote lookups happen before the transaction opens so no store connection is held
        // while the metafield is polled.
        let declared_pets = self.gateway.fetch_order_pets(&order_ref).await?;
        let variants = self.resolve_variants(&event.line_items).await?;

        let mut tx = self.pool.begin().await?;
        let written = self
            .write_first_order(&mut tx, event, &declared_pets, &variants, manual_billing, status, now)
            .await;
        let Some(written) = db::finish(tx, written).await? else {
            info!(%order_ref, "order reconciled by a concurrent delivery");
            return Ok(ProvisionOutcome::Duplicate);
        };

        info!(
            %order_ref,
            installment_id = %written.installment.id,
            policies = written.pet_names.len(),
            manual_billing,
            "provisioned first order"
        );
        self.notifications
            .enqueue(NotificationJob::new(
                templates::CREATE_ORDER,
                event.customer.email(),
                EmailVars {
                    display_name: event.customer.display_name(),
                    pets: written.pet_names.clone(),
                    pay_url: self.settings.pay_link(&order_ref),
                    days_left: 0,
                },
            ))
            .await;

        Ok(ProvisionOutcome::Provisioned {
            installment_id: written.installment.id,
            policies: written.pet_names.len(),
        })
    }

    /// Returns `None` when another delivery of the same order got there first.
    #[allow(clippy::too_many_arguments)]
    async fn write_first_order(
        &self,
        conn: &mut PgConnection,
        event: &OrderEvent,
        declared_pets: &[PetMetadata],
        variants: &HashMap<String, ResolvedVariant>,
        manual_billing: bool,
        status: CycleStatus,
        now: DateTime<Utc>,
    ) -> ReconcileResult<Option<FirstOrderWrite>> {
        let order_ref = event.order_ref();
        db::lock_order_ref(&mut *conn, &order_ref).await?;
        if payment_installments::exists_for_order(&mut *conn, &order_ref).await? {
            return Ok(None);
        }

        let today = self.settings.today(now);
        let customer = &event.customer;
        let display_name = customer.display_name();
        let phone = customer.phone();
        let city = customer.city();
        let customer_ref = customer.remote_ref();
        let user = users::upsert_by_shopify_id(
            &mut *conn,
            NewUser {
                name: &display_name,
                email: customer.email(),
                phone: phone.as_deref(),
                city: city.as_deref(),
                shopify_id: &customer_ref,
            },
        )
        .await?;

        let installment = payment_installments::insert_installment(
            &mut *conn,
            new_installment(
                &order_ref,
                &event.name,
                event.total_amount(),
                status.installment,
                today,
                now,
            )?,
        )
        .await?;

        let mut policy_ids = Vec::with_capacity(declared_pets.len());
        let mut pet_names = Vec::with_capacity(declared_pets.len());
        for pet in declared_pets {
            let variant_ref = strip_gid(pet.product_variant_id.trim()).to_string();
            let classifiers = match resolve_classifiers(&mut *conn, pet, &variant_ref, variants).await {
                Ok(classifiers) => classifiers,
                Err(ReconcileError::Malformed(reason)) => {
                    warn!(%order_ref, pet = %pet.name, %reason, "skipping pet");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let stored_pet = pets::upsert_for_owner(
                &mut *conn,
                NewPet {
                    user_id: user.id,
                    name: pet.name.trim(),
                    breed: non_empty(&pet.breed),
                    gender: non_empty(&pet.gender),
                    age_range_id: classifiers.age_range_id,
                    size_id: classifiers.size_id,
                    condition_id: classifiers.condition_id,
                    type_id: classifiers.type_id,
                },
            )
            .await?;

            let policy = policies::insert_policy(
                &mut *conn,
                NewPolicy {
                    user_id: user.id,
                    pet_id: stored_pet.id,
                    plan_id: classifiers.plan_id,
                    status: status.policy,
                    start_date: today,
                    next_payment: next_billing_date(today),
                    is_manual: manual_billing,
                    limit_period_start: today,
                    limit_period_end: coverage_end(today),
                    shopify_id: &variant_ref,
                },
            )
            .await?;
            policy_ids.push(policy.id);
            pet_names.push(stored_pet.name);
        }

        if policy_ids.is_empty() {
            return Err(ReconcileError::malformed(format!(
                "order {order_ref} has no provisionable pets"
            )));
        }

        policy_payments::link_policies(&mut *conn, installment.id, &policy_ids).await?;
        Ok(Some(FirstOrderWrite {
            installment,
            pet_names,
        }))
    }

    async fn renew(
        &self,
        event: &OrderEvent,
        original_order_ref: &str,
        status: CycleStatus,
        now: DateTime<Utc>,
    ) -> ReconcileResult<ProvisionOutcome> {
        let order_ref = event.order_ref();
        let policy_ids =
            policy_payments::policy_ids_for_order(&self.pool, original_order_ref).await?;
        if policy_ids.is_empty() {
            return Err(ReconcileError::malformed(format!(
                "renewal {order_ref} references unknown order {original_order_ref}"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let outcome = self
            .write_renewal(&mut tx, event, &policy_ids, status, now)
            .await;
        let outcome = db::finish(tx, outcome).await?;
        if let ProvisionOutcome::Renewed { installment_id, .. } = &outcome {
            info!(
                %order_ref,
                %original_order_ref,
                %installment_id,
                policies = policy_ids.len(),
                "recorded platform renewal"
            );
        }
        Ok(outcome)
    }

    async fn write_renewal(
        &self,
        conn: &mut PgConnection,
        event: &OrderEvent,
        policy_ids: &[Uuid],
        status: CycleStatus,
        now: DateTime<Utc>,
    ) -> ReconcileResult<ProvisionOutcome> {
        let order_ref = event.order_ref();
        db::lock_order_ref(&mut *conn, &order_ref).await?;
        if payment_installments::exists_for_order(&mut *conn, &order_ref).await? {
            return Ok(ProvisionOutcome::Duplicate);
        }

        let installment = payment_installments::insert_installment(
            &mut *conn,
            new_installment(
                &order_ref,
                &event.name,
                event.total_amount(),
                status.installment,
                self.settings.today(now),
                now,
            )?,
        )
        .await?;
        policy_payments::link_policies(&mut *conn, installment.id, policy_ids).await?;
        policies::set_status(&mut *conn, policy_ids, status.policy).await?;

        Ok(ProvisionOutcome::Renewed {
            installment_id: installment.id,
            policies: policy_ids.len(),
        })
    }

    /// Fetches each distinct line-item variant once.
    async fn resolve_variants(
        &self,
        line_items: &[LineItem],
    ) -> ReconcileResult<HashMap<String, ResolvedVariant>> {
        let mut variants = HashMap::new();
        for item in line_items {
            let Some(variant_id) = item.variant_id else {
                continue;
            };
            let variant_ref = variant_id.to_string();
            if variants.contains_key(&variant_ref) {
                continue;
            }
            let options = self.gateway.resolve_variant(&variant_ref).await?;
            variants.insert(
                variant_ref,
                ResolvedVariant {
                    product_ref: item.product_id.map(|id| id.to_string()),
                    options,
                },
            );
        }
        Ok(variants)
    }
}

async fn mark_installment_paid(
    conn: &mut PgConnection,
    order_ref: &str,
    now: DateTime<Utc>,
) -> ReconcileResult<ProvisionOutcome> {
    let Some(installment) =
        payment_installments::find_linked_by_order_ref(&mut *conn, order_ref).await?
    else {
        warn!(%order_ref, "paid event for unknown order; nothing to update");
        return Ok(ProvisionOutcome::Unmatched);
    };

    let Some(paid) = payment_installments::mark_paid(&mut *conn, installment.id, now).await?
    else {
        info!(%order_ref, installment_id = %installment.id, "installment already paid");
        return Ok(ProvisionOutcome::Duplicate);
    };
    let policy_ids = policy_payments::policy_ids_for_order(&mut *conn, order_ref).await?;
    let activated = policies::activate_pending(&mut *conn, &policy_ids).await?;
    info!(%order_ref, installment_id = %paid.id, activated, "installment marked paid");
    Ok(ProvisionOutcome::Paid {
        installment_id: paid.id,
        activated,
    })
}

async fn resolve_classifiers(
    conn: &mut PgConnection,
    pet: &PetMetadata,
    variant_ref: &str,
    variants: &HashMap<String, ResolvedVariant>,
) -> ReconcileResult<Classifiers> {
    if pet.name.trim().is_empty() {
        return Err(ReconcileError::malformed("pet has no name"));
    }
    let variant = variants.get(variant_ref).ok_or_else(|| {
        ReconcileError::malformed(format!("variant {variant_ref} is not on the order"))
    })?;

    let type_id = classifier(&mut *conn, Classifier::PetType, &pet.pet_type).await?;
    let age_range_id = classifier(&mut *conn, Classifier::AgeRange, &variant.options.age).await?;
    let size_id = classifier(&mut *conn, Classifier::Size, &variant.options.size).await?;
    let condition_id =
        classifier(&mut *conn, Classifier::Condition, &variant.options.condition).await?;

    let product_ref = variant.product_ref.as_deref().ok_or_else(|| {
        ReconcileError::malformed(format!("variant {variant_ref} has no product"))
    })?;
    let plan = catalog::plan_by_shopify_id(&mut *conn, product_ref)
        .await?
        .ok_or_else(|| ReconcileError::malformed(format!("no plan for product {product_ref}")))?;

    Ok(Classifiers {
        type_id,
        age_range_id,
        size_id,
        condition_id,
        plan_id: plan.id,
    })
}

async fn classifier(
    conn: &mut PgConnection,
    classifier: Classifier,
    name: &str,
) -> ReconcileResult<Uuid> {
    if name.trim().is_empty() {
        return Err(ReconcileError::malformed(format!(
            "missing {}",
            classifier.label()
        )));
    }
    catalog::classifier_id(conn, classifier, name)
        .await?
        .ok_or_else(|| {
            ReconcileError::malformed(format!("unknown {} '{}'", classifier.label(), name))
        })
}

/// Installment row for a remote order; sequence number and amount come from the order itself.
pub(crate) fn new_installment<'a>(
    order_ref: &'a str,
    display_name: &str,
    amount: &str,
    status: InstallmentStatus,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> ReconcileResult<NewPaymentInstallment<'a>> {
    let installment_number = installment_number(display_name).ok_or_else(|| {
        ReconcileError::malformed(format!("order name '{display_name}' is not a sequence number"))
    })?;
    let amount = parse_amount(amount)
        .ok_or_else(|| ReconcileError::malformed(format!("order total '{amount}' is not a number")))?;
    Ok(NewPaymentInstallment {
        installment_number,
        due_date: next_billing_date(today),
        amount,
        status,
        shopify_order_id: order_ref,
        paid_at: (status == InstallmentStatus::Paid).then_some(now),
    })
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn log_outcome(kind: &str, order_ref: &str, result: &ReconcileResult<ProvisionOutcome>) {
    match result {
        Ok(outcome) => info!(%order_ref, ?outcome, "{kind} event processed"),
        Err(ReconcileError::Malformed(reason)) => {
            warn!(%order_ref, %reason, "{kind} event skipped")
        }
        Err(err) => error!(?err, %order_ref, "{kind} event failed"),
    }
}
