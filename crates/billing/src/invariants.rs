//! Billing invariants
//!
//! Read-only consistency checks over subscriptions and resource states.
//! Safe to run at any time, including right after a webhook replay.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::plans::PlanCatalog;
use crate::store::BillingStore;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Owner(s) affected
    pub owner_ids: Vec<Uuid>,
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// A tenant holds more than it paid for
    Critical,
    /// Inconsistent state that needs attention
    High,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

const SINGLE_ACTIVE_SUBSCRIPTION: &str = "single_active_subscription";
const ENTITLEMENT_WITHIN_LIMITS: &str = "entitlement_within_limits";
const PENDING_UNLOCK_FULLY_BLOCKED: &str = "pending_unlock_fully_blocked";

#[derive(Clone)]
pub struct InvariantChecker {
    store: Arc<dyn BillingStore>,
    catalog: Arc<PlanCatalog>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn BillingStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in Self::available_checks() {
            violations.extend(self.run_check(name).await?);
        }

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: at most one active subscription per owner
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows = self.store.owners_with_multiple_active().await?;

        Ok(rows
            .into_iter()
            .map(|(owner_id, count)| InvariantViolation {
                invariant: SINGLE_ACTIVE_SUBSCRIPTION.to_string(),
                owner_ids: vec![owner_id],
                description: format!("Owner has {} active subscriptions (expected 1)", count),
                context: serde_json::json!({
                    "subscription_count": count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: without a pending unlock, active resources fit the plan
    async fn check_entitlement_within_limits(&self) -> BillingResult<Vec<InvariantViolation>> {
        let footprints = self.store.entitlement_footprints().await?;
        let mut violations = Vec::new();

        for fp in footprints.into_iter().filter(|fp| !fp.pending_unlock) {
            let Some(plan) = self.catalog.get(&fp.plan) else {
                violations.push(InvariantViolation {
                    invariant: ENTITLEMENT_WITHIN_LIMITS.to_string(),
                    owner_ids: vec![fp.owner_id],
                    description: format!("Active subscription names unknown plan '{}'", fp.plan),
                    context: serde_json::json!({ "plan": fp.plan }),
                    severity: ViolationSeverity::Critical,
                });
                continue;
            };

            let limits = plan.limits;
            if fp.active_organizations > u64::from(limits.max_organizations)
                || fp.active_auditors > u64::from(limits.max_auditors)
            {
                violations.push(InvariantViolation {
                    invariant: ENTITLEMENT_WITHIN_LIMITS.to_string(),
                    owner_ids: vec![fp.owner_id],
                    description: format!(
                        "Owner has {} active organizations and {} active auditors on plan '{}' ({} / {})",
                        fp.active_organizations,
                        fp.active_auditors,
                        fp.plan,
                        limits.max_organizations,
                        limits.max_auditors
                    ),
                    context: serde_json::json!({
                        "plan": fp.plan,
                        "active_organizations": fp.active_organizations,
                        "active_auditors": fp.active_auditors,
                        "max_organizations": limits.max_organizations,
                        "max_auditors": limits.max_auditors,
                    }),
                    severity: ViolationSeverity::Critical,
                });
            }
        }

        Ok(violations)
    }

    /// Invariant 3: while an unlock is pending, nothing is active
    async fn check_pending_unlock_fully_blocked(&self) -> BillingResult<Vec<InvariantViolation>> {
        let footprints = self.store.entitlement_footprints().await?;

        Ok(footprints
            .into_iter()
            .filter(|fp| fp.pending_unlock && (fp.active_organizations > 0 || fp.active_auditors > 0))
            .map(|fp| InvariantViolation {
                invariant: PENDING_UNLOCK_FULLY_BLOCKED.to_string(),
                owner_ids: vec![fp.owner_id],
                description: format!(
                    "Owner awaiting manual unlock has {} active organizations and {} active auditors",
                    fp.active_organizations, fp.active_auditors
                ),
                context: serde_json::json!({
                    "plan": fp.plan,
                    "active_organizations": fp.active_organizations,
                    "active_auditors": fp.active_auditors,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            SINGLE_ACTIVE_SUBSCRIPTION => self.check_single_active_subscription().await,
            ENTITLEMENT_WITHIN_LIMITS => self.check_entitlement_within_limits().await,
            PENDING_UNLOCK_FULLY_BLOCKED => self.check_pending_unlock_fully_blocked().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            SINGLE_ACTIVE_SUBSCRIPTION,
            ENTITLEMENT_WITHIN_LIMITS,
            PENDING_UNLOCK_FULLY_BLOCKED,
        ]
    }
}
