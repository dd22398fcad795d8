// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError::LimitExceeded carries the offending counts
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Auditora Billing Module
//!
//! Subscription and entitlement reconciliation for the external payment
//! gateway.
//!
//! ## Features
//!
//! - **Checkout**: Purchase intents with a signed gateway reference
//! - **Webhooks**: Checksum verification and payment state transitions
//! - **Entitlement**: New subscription window and resource reconciliation on approval
//! - **Resource Gate**: Blocking and activation of organizations and auditor accounts
//! - **Manual Unlock**: Tenant-selected resources after a downgrade
//! - **Access**: Subscription status, capacity checks, lapsed subscription sweep
//! - **Invariants**: Read-only consistency checks

pub mod access;
pub mod checkout;
pub mod config;
pub mod db;
pub mod entitlement;
pub mod error;
pub mod invariants;
pub mod payments;
pub mod plans;
pub mod resources;
pub mod store;
pub mod subscriptions;
pub mod unlock;
pub mod webhooks;


// Access
pub use access::{
    AccessMode, AccessService, Capacity, ReadOnlyReason, SubscriptionOverview, SweepReport,
};

// Checkout
pub use checkout::{CheckoutService, CheckoutTicket, IntegritySigner};

// Config
pub use config::{BillingConfig, GatewayConfig};

// Entitlement
pub use entitlement::{ActivationMode, EntitlementReconciler, ReconcileOutcome};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Payments
pub use payments::{
    GatewayStatus, PaymentNotification, PaymentOutcome, PaymentProcessor, PaymentStatus,
    PurchaseIntent,
};

// Plans
pub use plans::{BillingPeriod, PlanCatalog, PlanDefinition, PlanLimits, ResourceKind};

// Resources
pub use resources::{GateReport, ResourceCensus, ResourceGate, ResourceStatus, UnlockSelection};

// Store
pub use store::{BillingStore, BillingTx, MemoryStore, PgStore};

// Subscriptions
pub use subscriptions::{Subscription, SubscriptionStatus};

// Unlock
pub use unlock::{UnlockReport, UnlockService};

// Webhooks
pub use webhooks::{WebhookEvent, WebhookHandler, WebhookOutcome, WebhookVerifier};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub access: AccessService,
    pub checkout: CheckoutService,
    pub invariants: InvariantChecker,
    pub payments: PaymentProcessor,
    pub unlock: UnlockService,
    pub webhooks: WebhookHandler,
    catalog: Arc<PlanCatalog>,
}

impl BillingService {
    /// Create a new billing service from environment variables, backed by PostgreSQL
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        Ok(Self::new(config, Arc::new(PgStore::new(pool))))
    }

    /// Create a new billing service with explicit config and store
    pub fn new(config: BillingConfig, store: Arc<dyn BillingStore>) -> Self {
        let catalog = config.catalog.clone();
        let reconciler = EntitlementReconciler::new(catalog.clone());
        let payments = PaymentProcessor::new(store.clone(), reconciler);

        Self {
            access: AccessService::new(store.clone(), catalog.clone()),
            checkout: CheckoutService::new(store.clone(), catalog.clone(), &config.gateway),
            invariants: InvariantChecker::new(store.clone(), catalog.clone()),
            payments: payments.clone(),
            unlock: UnlockService::new(store, catalog.clone()),
            webhooks: WebhookHandler::new(WebhookVerifier::new(&config.gateway), payments),
            catalog,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }
}
