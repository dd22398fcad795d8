//! Entitlement reconciliation after an approved payment
//!
//! Runs inside the payment's unit of work:
//!
//! 1. supersede the owner's active subscription
//! 2. compute the new window
//! 3. take the resource census (owner account excluded)
//! 4. compare against the plan limits
//! 5. insert the new active subscription, `pending_unlock = !fits`
//! 6. block everything, then re-activate everything only if it fits
//! 7. force the owner account active
//!
//! Blocking before the conditional activation means an interruption between
//! the two steps leaves the tenant blocked, never over-entitled.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::payments::PurchaseIntent;
use crate::plans::{PlanCatalog, PlanLimits};
use crate::resources::{ResourceCensus, ResourceGate};
use crate::store::BillingTx;
use crate::subscriptions::{entitlement_window, NewSubscription, Subscription};

/// How the new plan is applied to existing resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Footprint fits: every resource is active
    Full,
    /// Footprint exceeds the plan: resources stay blocked until the tenant
    /// confirms which ones to keep
    PendingManualUnlock,
}

impl ActivationMode {
    pub fn decide(census: &ResourceCensus, limits: &PlanLimits) -> Self {
        if census.fits(limits) {
            ActivationMode::Full
        } else {
            ActivationMode::PendingManualUnlock
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ActivationMode::PendingManualUnlock)
    }
}

/// Result of reconciling one approved purchase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub subscription: Subscription,
    pub census: ResourceCensus,
    pub limits: PlanLimits,
    pub mode: ActivationMode,
    /// Previously active subscriptions flipped to inactive
    pub superseded: u64,
}

#[derive(Clone)]
pub struct EntitlementReconciler {
    catalog: Arc<PlanCatalog>,
    gate: ResourceGate,
}

impl EntitlementReconciler {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self {
            catalog,
            gate: ResourceGate::new(),
        }
    }

    /// Apply an approved purchase to the owner's subscription and resources
    pub async fn reconcile(
        &self,
        tx: &mut dyn BillingTx,
        intent: &PurchaseIntent,
    ) -> BillingResult<ReconcileOutcome> {
        let owner_id: Uuid = intent.owner_id;
        let plan = self.catalog.require(&intent.plan)?;
        let limits = plan.limits;

        let superseded = tx.deactivate_active_subscriptions(owner_id).await?;

        let today = OffsetDateTime::now_utc().date();
        let (start_date, end_date) = entitlement_window(today, intent.period.months());

        let census = tx.resource_census(owner_id).await?;
        let mode = ActivationMode::decide(&census, &limits);

        let subscription = tx
            .insert_subscription(&NewSubscription {
                owner_id,
                plan: plan.name.clone(),
                start_date,
                end_date,
                pending_unlock: mode.is_pending(),
            })
            .await?;

        self.gate.block_all(tx, owner_id).await?;
        if mode == ActivationMode::Full {
            self.gate.activate_all(tx, owner_id).await?;
        }
        self.gate.ensure_owner_active(tx, owner_id).await?;

        tracing::info!(
            owner_id = %owner_id,
            plan = %plan.name,
            organizations = census.organizations,
            auditors = census.auditors,
            max_organizations = limits.max_organizations,
            max_auditors = limits.max_auditors,
            mode = ?mode,
            superseded = superseded,
            end_date = %end_date,
            "Entitlement reconciled"
        );

        Ok(ReconcileOutcome {
            subscription,
            census,
            limits,
            mode,
            superseded,
        })
    }
}
