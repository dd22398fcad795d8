//! Manual unlock confirmation
//!
//! After a downgrade leaves a tenant over its plan limits, every resource
//! stays blocked until the tenant picks which organizations and auditor
//! accounts remain active.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::PlanCatalog;
use crate::resources::{ResourceGate, UnlockSelection};
use crate::store::BillingStore;

/// Result of a confirmed selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockReport {
    pub subscription_id: Uuid,
    pub plan: String,
    pub activated_organizations: u64,
    pub activated_auditors: u64,
    /// Selected ids that were not activated (not owned by the tenant or deleted)
    pub ignored: u64,
}

#[derive(Clone)]
pub struct UnlockService {
    store: Arc<dyn BillingStore>,
    catalog: Arc<PlanCatalog>,
    gate: ResourceGate,
}

impl UnlockService {
    pub fn new(store: Arc<dyn BillingStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            store,
            catalog,
            gate: ResourceGate::new(),
        }
    }

    /// Keep exactly the selected resources active and clear the pending flag
    ///
    /// The active subscription stays locked for the whole unit of work, so a
    /// concurrent approval for the same owner is applied either entirely
    /// before or entirely after this call.
    pub async fn confirm_unlock(
        &self,
        owner_id: Uuid,
        selection: &UnlockSelection,
    ) -> BillingResult<UnlockReport> {
        let mut tx = self.store.begin().await?;

        let subscription = tx
            .lock_active_subscription(owner_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;

        if !subscription.pending_unlock {
            return Err(BillingError::NothingPending);
        }

        let plan = self.catalog.require(&subscription.plan)?;
        if let Err(e) = selection.check_limits(&plan.limits) {
            tracing::info!(
                owner_id = %owner_id,
                plan = %plan.name,
                error = %e,
                "Unlock selection rejected"
            );
            return Err(e);
        }

        self.gate.block_all(&mut *tx, owner_id).await?;
        let activated = self
            .gate
            .activate_selection(&mut *tx, owner_id, selection)
            .await?;
        self.gate.ensure_owner_active(&mut *tx, owner_id).await?;
        tx.clear_pending_unlock(subscription.id).await?;
        tx.commit().await?;

        let selected = (selection.organizations.len() + selection.auditors.len()) as u64;
        let ignored = selected.saturating_sub(activated.organizations + activated.auditors);

        tracing::info!(
            owner_id = %owner_id,
            subscription_id = %subscription.id,
            plan = %plan.name,
            organizations = activated.organizations,
            auditors = activated.auditors,
            ignored = ignored,
            "Manual unlock confirmed"
        );

        Ok(UnlockReport {
            subscription_id: subscription.id,
            plan: plan.name.clone(),
            activated_organizations: activated.organizations,
            activated_auditors: activated.auditors,
            ignored,
        })
    }
}
