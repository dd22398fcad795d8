//! Persistence seam for the billing engine
//!
//! Every mutating operation runs through a [`BillingTx`]: a unit of work that
//! is applied on [`BillingTx::commit`] and rolled back when dropped without
//! committing. Lock methods (`lock_*`) take an exclusive row lock that lasts
//! until the transaction ends.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use time::Date;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::payments::{NewPurchaseIntent, PaymentStatus, PurchaseIntent};
use crate::plans::ResourceKind;
use crate::resources::{ResourceCensus, ResourceStatus};
use crate::subscriptions::{NewSubscription, Subscription};

pub use memory::{FaultPoint, MemoryState, MemoryStore};
pub use postgres::PgStore;

/// Active resources of an owner next to its active subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementFootprint {
    pub owner_id: Uuid,
    pub plan: String,
    pub pending_unlock: bool,
    pub active_organizations: u64,
    pub active_auditors: u64,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> BillingResult<Box<dyn BillingTx>>;

    /// Most recent active subscription of the owner, without locking
    async fn active_subscription(&self, owner_id: Uuid) -> BillingResult<Option<Subscription>>;

    async fn resource_census(&self, owner_id: Uuid) -> BillingResult<ResourceCensus>;

    /// Active subscriptions whose end date is before `today`
    async fn lapsed_subscriptions(&self, today: Date) -> BillingResult<Vec<Subscription>>;

    /// Owners holding more than one active subscription, with the count
    async fn owners_with_multiple_active(&self) -> BillingResult<Vec<(Uuid, u64)>>;

    async fn entitlement_footprints(&self) -> BillingResult<Vec<EntitlementFootprint>>;
}

#[async_trait]
pub trait BillingTx: Send {
    /// Remove the owner's `pending` intents; returns rows deleted
    async fn delete_pending_intents(&mut self, owner_id: Uuid) -> BillingResult<u64>;

    /// Insert a `pending` intent; a reference collision yields
    /// `BillingError::DuplicateReference`
    async fn insert_intent(&mut self, intent: &NewPurchaseIntent) -> BillingResult<PurchaseIntent>;

    /// Load the intent for a reference under an exclusive row lock
    async fn lock_intent(&mut self, reference: &str) -> BillingResult<Option<PurchaseIntent>>;

    async fn update_intent_status(
        &mut self,
        intent_id: Uuid,
        status: PaymentStatus,
    ) -> BillingResult<()>;

    /// Flip the owner's active subscriptions to inactive; returns rows changed
    async fn deactivate_active_subscriptions(&mut self, owner_id: Uuid) -> BillingResult<u64>;

    async fn insert_subscription(&mut self, subscription: &NewSubscription)
        -> BillingResult<Subscription>;

    /// Load the owner's active subscription under an exclusive row lock
    async fn lock_active_subscription(
        &mut self,
        owner_id: Uuid,
    ) -> BillingResult<Option<Subscription>>;

    async fn clear_pending_unlock(&mut self, subscription_id: Uuid) -> BillingResult<()>;

    async fn resource_census(&mut self, owner_id: Uuid) -> BillingResult<ResourceCensus>;

    /// Set every non-deleted resource of a kind owned by `owner_id`
    /// (owner account excluded); returns rows changed
    async fn set_all_resources(
        &mut self,
        owner_id: Uuid,
        kind: ResourceKind,
        status: ResourceStatus,
    ) -> BillingResult<u64>;

    /// Activate the listed ids of a kind that `owner_id` owns; ids owned by
    /// someone else are ignored. Returns rows changed.
    async fn activate_selected(
        &mut self,
        owner_id: Uuid,
        kind: ResourceKind,
        ids: &[Uuid],
    ) -> BillingResult<u64>;

    async fn activate_owner_account(&mut self, owner_id: Uuid) -> BillingResult<u64>;

    async fn commit(&mut self) -> BillingResult<()>;
}
