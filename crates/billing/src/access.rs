//! Tenant access: subscription status, capacity checks and the lapsed sweep

use std::sync::Arc;

use serde::Serialize;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::{PlanCatalog, PlanLimits, ResourceKind};
use crate::resources::{ResourceCensus, ResourceGate};
use crate::store::BillingStore;
use crate::subscriptions::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOnlyReason {
    NoSubscription,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "reason", rename_all = "snake_case")]
pub enum AccessMode {
    Full,
    ReadOnly(ReadOnlyReason),
}

impl AccessMode {
    pub fn for_subscription(subscription: Option<&Subscription>, today: Date) -> Self {
        match subscription {
            None => AccessMode::ReadOnly(ReadOnlyReason::NoSubscription),
            Some(s) if s.is_current(today) => AccessMode::Full,
            Some(_) => AccessMode::ReadOnly(ReadOnlyReason::Expired),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionOverview {
    pub subscription: Option<Subscription>,
    pub limits: Option<PlanLimits>,
    pub census: ResourceCensus,
    pub access: AccessMode,
}

/// Remaining room for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub resource: ResourceKind,
    pub limit: u32,
    pub used: u64,
    pub remaining: u64,
}

/// Totals of a lapsed-subscription sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub owners: u64,
    pub organizations_blocked: u64,
    pub auditors_blocked: u64,
    /// Owners that renewed between the listing and the block
    pub skipped: u64,
    pub failures: u64,
}

#[derive(Clone)]
pub struct AccessService {
    store: Arc<dyn BillingStore>,
    catalog: Arc<PlanCatalog>,
    gate: ResourceGate,
}

impl AccessService {
    pub fn new(store: Arc<dyn BillingStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            store,
            catalog,
            gate: ResourceGate::new(),
        }
    }

    pub async fn subscription_status(&self, owner_id: Uuid) -> BillingResult<SubscriptionOverview> {
        self.subscription_status_on(owner_id, OffsetDateTime::now_utc().date())
            .await
    }

    pub async fn subscription_status_on(
        &self,
        owner_id: Uuid,
        today: Date,
    ) -> BillingResult<SubscriptionOverview> {
        let subscription = self.store.active_subscription(owner_id).await?;
        let census = self.store.resource_census(owner_id).await?;
        let limits = match &subscription {
            Some(s) => Some(self.catalog.require(&s.plan)?.limits),
            None => None,
        };
        let access = AccessMode::for_subscription(subscription.as_ref(), today);

        Ok(SubscriptionOverview {
            subscription,
            limits,
            census,
            access,
        })
    }

    /// Fail if the tenant cannot add one more resource of `kind`
    pub async fn check_capacity(
        &self,
        owner_id: Uuid,
        kind: ResourceKind,
    ) -> BillingResult<Capacity> {
        let subscription = self
            .store
            .active_subscription(owner_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;
        let limits = self.catalog.require(&subscription.plan)?.limits;
        let census = self.store.resource_census(owner_id).await?;

        let limit = limits.limit_for(kind);
        let used = census.count_for(kind);
        if used >= u64::from(limit) {
            return Err(BillingError::LimitExceeded {
                resource: kind,
                limit,
                requested: used + 1,
            });
        }

        Ok(Capacity {
            resource: kind,
            limit,
            used,
            remaining: u64::from(limit) - used,
        })
    }

    /// Block the resources of every owner whose active subscription ended
    /// before `today`. Each owner is handled in its own unit of work; a
    /// failure for one owner does not stop the others.
    pub async fn sweep_lapsed(&self, today: Date) -> BillingResult<SweepReport> {
        let lapsed = self.store.lapsed_subscriptions(today).await?;
        let mut report = SweepReport::default();

        for subscription in lapsed {
            match self.block_owner(&subscription, today).await {
                Ok(Some((organizations, auditors))) => {
                    report.owners += 1;
                    report.organizations_blocked += organizations;
                    report.auditors_blocked += auditors;
                    tracing::info!(
                        owner_id = %subscription.owner_id,
                        subscription_id = %subscription.id,
                        end_date = %subscription.end_date,
                        organizations = organizations,
                        auditors = auditors,
                        "Blocked resources of lapsed subscription"
                    );
                }
                Ok(None) => {
                    report.skipped += 1;
                    tracing::info!(
                        owner_id = %subscription.owner_id,
                        subscription_id = %subscription.id,
                        "Subscription no longer lapsed - sweep skipped owner"
                    );
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::error!(
                        owner_id = %subscription.owner_id,
                        error = %e,
                        "Failed to block resources of lapsed subscription"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Block the owner's resources if `lapsed` is still its active, ended
    /// subscription once locked. `None` when the owner has renewed since the
    /// lapsed list was read.
    async fn block_owner(
        &self,
        lapsed: &Subscription,
        today: Date,
    ) -> BillingResult<Option<(u64, u64)>> {
        let mut tx = self.store.begin().await?;
        let current = tx.lock_active_subscription(lapsed.owner_id).await?;
        match current {
            Some(current) if current.id == lapsed.id && current.end_date < today => {}
            _ => return Ok(None),
        }
        let report = self.gate.block_all(&mut *tx, lapsed.owner_id).await?;
        self.gate.ensure_owner_active(&mut *tx, lapsed.owner_id).await?;
        tx.commit().await?;
        Ok(Some((report.organizations, report.auditors)))
    }
}
