//! In-memory billing store
//!
//! Used by tests and local development. Transactions are fully serialized by
//! an owned mutex guard held for the lifetime of the transaction, and each
//! transaction mutates a private working copy that replaces the shared state
//! only on commit. Dropping a transaction discards its working copy.
//!
//! A single [`FaultPoint`] can be armed to make the next matching operation
//! fail; the working copy as it was at that moment is kept for inspection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{BillingStore, BillingTx, EntitlementFootprint};
use crate::error::{BillingError, BillingResult};
use crate::payments::{NewPurchaseIntent, PaymentStatus, PurchaseIntent};
use crate::plans::ResourceKind;
use crate::resources::{ResourceCensus, ResourceStatus};
use crate::subscriptions::{NewSubscription, Subscription, SubscriptionStatus};

/// Operation at which an armed fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    InsertSubscription,
    BlockResources,
    ActivateResources,
    Commit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub is_owner: bool,
    pub status: ResourceStatus,
}

impl UserRecord {
    fn is_auditor_of(&self, owner_id: Uuid) -> bool {
        self.owner_id == Some(owner_id) && !self.is_owner && self.id != owner_id
    }
}

/// Whole store content
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    intents: Vec<PurchaseIntent>,
    subscriptions: Vec<Subscription>,
    organizations: Vec<OrganizationRecord>,
    users: Vec<UserRecord>,
}

impl MemoryState {
    pub fn intent(&self, reference: &str) -> Option<&PurchaseIntent> {
        self.intents.iter().find(|i| i.reference == reference)
    }

    pub fn intents_for(&self, owner_id: Uuid) -> Vec<&PurchaseIntent> {
        self.intents
            .iter()
            .filter(|i| i.owner_id == owner_id)
            .collect()
    }

    pub fn subscriptions_for(&self, owner_id: Uuid) -> Vec<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .collect()
    }

    pub fn active_subscription(&self, owner_id: Uuid) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.owner_id == owner_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| s.created_at)
    }

    pub fn organization_status(&self, id: Uuid) -> Option<ResourceStatus> {
        self.organizations
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.status)
    }

    pub fn user_status(&self, id: Uuid) -> Option<ResourceStatus> {
        self.users.iter().find(|u| u.id == id).map(|u| u.status)
    }

    pub fn organization_statuses(&self, owner_id: Uuid) -> Vec<ResourceStatus> {
        self.organizations
            .iter()
            .filter(|o| o.owner_id == owner_id)
            .map(|o| o.status)
            .collect()
    }

    pub fn auditor_statuses(&self, owner_id: Uuid) -> Vec<ResourceStatus> {
        self.users
            .iter()
            .filter(|u| u.is_auditor_of(owner_id))
            .map(|u| u.status)
            .collect()
    }

    fn census(&self, owner_id: Uuid) -> ResourceCensus {
        ResourceCensus {
            organizations: self
                .organizations
                .iter()
                .filter(|o| o.owner_id == owner_id && o.status != ResourceStatus::Deleted)
                .count() as u64,
            auditors: self
                .users
                .iter()
                .filter(|u| u.is_auditor_of(owner_id) && u.status != ResourceStatus::Deleted)
                .count() as u64,
        }
    }

    fn active_counts(&self, owner_id: Uuid) -> (u64, u64) {
        let orgs = self
            .organizations
            .iter()
            .filter(|o| o.owner_id == owner_id && o.status == ResourceStatus::Active)
            .count() as u64;
        let auditors = self
            .users
            .iter()
            .filter(|u| u.is_auditor_of(owner_id) && u.status == ResourceStatus::Active)
            .count() as u64;
        (orgs, auditors)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fault: Arc<StdMutex<Option<FaultPoint>>>,
    crash_snapshot: Arc<StdMutex<Option<MemoryState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tenant root account
    pub async fn add_owner(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.users.push(UserRecord {
            id,
            owner_id: Some(id),
            is_owner: true,
            status: ResourceStatus::Active,
        });
        id
    }

    pub async fn add_organization(&self, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.organizations.push(OrganizationRecord {
            id,
            owner_id,
            status: ResourceStatus::Active,
        });
        id
    }

    pub async fn add_auditor(&self, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.users.push(UserRecord {
            id,
            owner_id: Some(owner_id),
            is_owner: false,
            status: ResourceStatus::Active,
        });
        id
    }

    pub async fn set_organization_status(&self, id: Uuid, status: ResourceStatus) {
        let mut state = self.state.lock().await;
        if let Some(org) = state.organizations.iter_mut().find(|o| o.id == id) {
            org.status = status;
        }
    }

    pub async fn set_user_status(&self, id: Uuid, status: ResourceStatus) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.iter_mut().find(|u| u.id == id) {
            user.status = status;
        }
    }

    /// Seed a subscription row as-is
    pub async fn put_subscription(&self, subscription: Subscription) {
        self.state.lock().await.subscriptions.push(subscription);
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Arm a fault for the next operation of that kind
    pub fn inject_fault(&self, point: FaultPoint) {
        *lock(&self.fault) = Some(point);
    }

    /// Working copy of the transaction that hit the last armed fault
    pub fn crash_snapshot(&self) -> Option<MemoryState> {
        lock(&self.crash_snapshot).clone()
    }
}

struct MemoryTx {
    committed: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fault: Arc<StdMutex<Option<FaultPoint>>>,
    crash_snapshot: Arc<StdMutex<Option<MemoryState>>>,
}

impl MemoryTx {
    fn check_fault(&self, point: FaultPoint) -> BillingResult<()> {
        let mut armed = lock(&self.fault);
        if *armed == Some(point) {
            *armed = None;
            *lock(&self.crash_snapshot) = Some(self.working.clone());
            return Err(BillingError::Database(format!(
                "injected fault at {:?}",
                point
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingTx for MemoryTx {
    async fn delete_pending_intents(&mut self, owner_id: Uuid) -> BillingResult<u64> {
        let before = self.working.intents.len();
        self.working
            .intents
            .retain(|i| !(i.owner_id == owner_id && i.status == PaymentStatus::Pending));
        Ok((before - self.working.intents.len()) as u64)
    }

    async fn insert_intent(&mut self, intent: &NewPurchaseIntent) -> BillingResult<PurchaseIntent> {
        if self.working.intent(&intent.reference).is_some() {
            return Err(BillingError::DuplicateReference(intent.reference.clone()));
        }
        let now = OffsetDateTime::now_utc();
        let record = PurchaseIntent {
            id: Uuid::new_v4(),
            owner_id: intent.owner_id,
            plan: intent.plan.clone(),
            period: intent.period,
            reference: intent.reference.clone(),
            amount_cents: intent.amount_cents,
            currency: intent.currency.clone(),
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.working.intents.push(record.clone());
        Ok(record)
    }

    async fn lock_intent(&mut self, reference: &str) -> BillingResult<Option<PurchaseIntent>> {
        Ok(self.working.intent(reference).cloned())
    }

    async fn update_intent_status(
        &mut self,
        intent_id: Uuid,
        status: PaymentStatus,
    ) -> BillingResult<()> {
        let intent = self
            .working
            .intents
            .iter_mut()
            .find(|i| i.id == intent_id)
            .ok_or_else(|| BillingError::Database(format!("Intent {} not found", intent_id)))?;
        intent.status = status;
        intent.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn deactivate_active_subscriptions(&mut self, owner_id: Uuid) -> BillingResult<u64> {
        let mut changed = 0;
        for sub in self.working.subscriptions.iter_mut() {
            if sub.owner_id == owner_id && sub.status == SubscriptionStatus::Active {
                sub.status = SubscriptionStatus::Inactive;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> BillingResult<Subscription> {
        self.check_fault(FaultPoint::InsertSubscription)?;
        // Mirrors the partial unique index on (owner_id) WHERE status = 'active'
        if self
            .working
            .active_subscription(subscription.owner_id)
            .is_some()
        {
            return Err(BillingError::Database(format!(
                "Owner {} already has an active subscription",
                subscription.owner_id
            )));
        }
        let record = Subscription {
            id: Uuid::new_v4(),
            owner_id: subscription.owner_id,
            plan: subscription.plan.clone(),
            status: SubscriptionStatus::Active,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            pending_unlock: subscription.pending_unlock,
            created_at: OffsetDateTime::now_utc(),
        };
        self.working.subscriptions.push(record.clone());
        Ok(record)
    }

    async fn lock_active_subscription(
        &mut self,
        owner_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self.working.active_subscription(owner_id).cloned())
    }

    async fn clear_pending_unlock(&mut self, subscription_id: Uuid) -> BillingResult<()> {
        if let Some(sub) = self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
        {
            sub.pending_unlock = false;
        }
        Ok(())
    }

    async fn resource_census(&mut self, owner_id: Uuid) -> BillingResult<ResourceCensus> {
        Ok(self.working.census(owner_id))
    }

    async fn set_all_resources(
        &mut self,
        owner_id: Uuid,
        kind: ResourceKind,
        status: ResourceStatus,
    ) -> BillingResult<u64> {
        match status {
            ResourceStatus::Active => self.check_fault(FaultPoint::ActivateResources)?,
            ResourceStatus::Blocked => self.check_fault(FaultPoint::BlockResources)?,
            ResourceStatus::Deleted => {}
        }

        let mut changed = 0;
        match kind {
            ResourceKind::Organization => {
                for org in self.working.organizations.iter_mut() {
                    if org.owner_id == owner_id && org.status != ResourceStatus::Deleted {
                        org.status = status;
                        changed += 1;
                    }
                }
            }
            ResourceKind::Auditor => {
                for user in self.working.users.iter_mut() {
                    if user.is_auditor_of(owner_id) && user.status != ResourceStatus::Deleted {
                        user.status = status;
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }

    async fn activate_selected(
        &mut self,
        owner_id: Uuid,
        kind: ResourceKind,
        ids: &[Uuid],
    ) -> BillingResult<u64> {
        self.check_fault(FaultPoint::ActivateResources)?;

        let mut changed = 0;
        match kind {
            ResourceKind::Organization => {
                for org in self.working.organizations.iter_mut() {
                    if org.owner_id == owner_id
                        && org.status != ResourceStatus::Deleted
                        && ids.contains(&org.id)
                    {
                        org.status = ResourceStatus::Active;
                        changed += 1;
                    }
                }
            }
            ResourceKind::Auditor => {
                for user in self.working.users.iter_mut() {
                    if user.is_auditor_of(owner_id)
                        && user.status != ResourceStatus::Deleted
                        && ids.contains(&user.id)
                    {
                        user.status = ResourceStatus::Active;
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }

    async fn activate_owner_account(&mut self, owner_id: Uuid) -> BillingResult<u64> {
        let mut changed = 0;
        for user in self.working.users.iter_mut() {
            if user.id == owner_id {
                user.status = ResourceStatus::Active;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn commit(&mut self) -> BillingResult<()> {
        self.check_fault(FaultPoint::Commit)?;
        *self.committed = self.working.clone();
        Ok(())
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn begin(&self) -> BillingResult<Box<dyn BillingTx>> {
        let committed = self.state.clone().lock_owned().await;
        let working = committed.clone();
        Ok(Box::new(MemoryTx {
            committed,
            working,
            fault: self.fault.clone(),
            crash_snapshot: self.crash_snapshot.clone(),
        }))
    }

    async fn active_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.state.lock().await.active_subscription(owner_id).cloned())
    }

    async fn resource_census(&self, owner_id: Uuid) -> BillingResult<ResourceCensus> {
        Ok(self.state.lock().await.census(owner_id))
    }

    async fn lapsed_subscriptions(&self, today: Date) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active && s.end_date < today)
            .cloned()
            .collect())
    }

    async fn owners_with_multiple_active(&self) -> BillingResult<Vec<(Uuid, u64)>> {
        let state = self.state.lock().await;
        let mut counts: HashMap<Uuid, u64> = HashMap::new();
        for sub in state
            .subscriptions
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
        {
            *counts.entry(sub.owner_id).or_default() += 1;
        }
        Ok(counts.into_iter().filter(|(_, n)| *n > 1).collect())
    }

    async fn entitlement_footprints(&self) -> BillingResult<Vec<EntitlementFootprint>> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .map(|s| {
                let (active_organizations, active_auditors) = state.active_counts(s.owner_id);
                EntitlementFootprint {
                    owner_id: s.owner_id,
                    plan: s.plan.clone(),
                    pending_unlock: s.pending_unlock,
                    active_organizations,
                    active_auditors,
                }
            })
            .collect())
    }
}
