//! Owned resources (organizations and auditor accounts) and the resource gate
//!
//! The gate is the only component that flips resource states. It issues
//! set-based updates scoped by owner inside the caller's transaction; the
//! owner's own account is never blocked.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::{PlanLimits, ResourceKind};
use crate::store::BillingTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Blocked,
    Deleted,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Blocked => "blocked",
            ResourceStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ResourceStatus::Active),
            "blocked" => Ok(ResourceStatus::Blocked),
            "deleted" => Ok(ResourceStatus::Deleted),
            other => Err(BillingError::Database(format!(
                "Unknown resource status '{}'",
                other
            ))),
        }
    }
}

/// Count of a tenant's non-deleted resources, owner account excluded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCensus {
    pub organizations: u64,
    pub auditors: u64,
}

impl ResourceCensus {
    pub fn count_for(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Organization => self.organizations,
            ResourceKind::Auditor => self.auditors,
        }
    }

    /// Whether the whole footprint fits inside the limits
    pub fn fits(&self, limits: &PlanLimits) -> bool {
        self.organizations <= u64::from(limits.max_organizations)
            && self.auditors <= u64::from(limits.max_auditors)
    }
}

/// Rows touched by a gate operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateReport {
    pub organizations: u64,
    pub auditors: u64,
}

/// Resources the tenant chose to keep active after a downgrade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockSelection {
    pub organizations: BTreeSet<Uuid>,
    pub auditors: BTreeSet<Uuid>,
}

impl UnlockSelection {
    /// Build from raw id lists; duplicates collapse
    pub fn new(
        organizations: impl IntoIterator<Item = Uuid>,
        auditors: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self {
            organizations: organizations.into_iter().collect(),
            auditors: auditors.into_iter().collect(),
        }
    }

    pub fn ids_for(&self, kind: ResourceKind) -> &BTreeSet<Uuid> {
        match kind {
            ResourceKind::Organization => &self.organizations,
            ResourceKind::Auditor => &self.auditors,
        }
    }

    /// Reject the whole selection if either list is larger than the plan allows
    pub fn check_limits(&self, limits: &PlanLimits) -> BillingResult<()> {
        for kind in [ResourceKind::Organization, ResourceKind::Auditor] {
            let requested = self.ids_for(kind).len() as u64;
            let limit = limits.limit_for(kind);
            if requested > u64::from(limit) {
                return Err(BillingError::LimitExceeded {
                    resource: kind,
                    limit,
                    requested,
                });
            }
        }
        Ok(())
    }
}

/// Bulk activation and blocking of a tenant's resources
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGate;

impl ResourceGate {
    pub fn new() -> Self {
        Self
    }

    /// Block every organization and auditor account of the owner
    pub async fn block_all(&self, tx: &mut dyn BillingTx, owner_id: Uuid) -> BillingResult<GateReport> {
        self.set_all(tx, owner_id, ResourceStatus::Blocked).await
    }

    /// Activate every organization and auditor account of the owner
    pub async fn activate_all(
        &self,
        tx: &mut dyn BillingTx,
        owner_id: Uuid,
    ) -> BillingResult<GateReport> {
        self.set_all(tx, owner_id, ResourceStatus::Active).await
    }

    async fn set_all(
        &self,
        tx: &mut dyn BillingTx,
        owner_id: Uuid,
        status: ResourceStatus,
    ) -> BillingResult<GateReport> {
        let organizations = tx
            .set_all_resources(owner_id, ResourceKind::Organization, status)
            .await?;
        let auditors = tx
            .set_all_resources(owner_id, ResourceKind::Auditor, status)
            .await?;

        tracing::debug!(
            owner_id = %owner_id,
            status = %status,
            organizations = organizations,
            auditors = auditors,
            "Resource gate applied to all resources"
        );

        Ok(GateReport {
            organizations,
            auditors,
        })
    }

    /// Activate exactly the selected ids that belong to the owner
    pub async fn activate_selection(
        &self,
        tx: &mut dyn BillingTx,
        owner_id: Uuid,
        selection: &UnlockSelection,
    ) -> BillingResult<GateReport> {
        let mut report = GateReport::default();

        for kind in [ResourceKind::Organization, ResourceKind::Auditor] {
            let ids: Vec<Uuid> = selection.ids_for(kind).iter().copied().collect();
            if ids.is_empty() {
                continue;
            }
            let activated = tx.activate_selected(owner_id, kind, &ids).await?;
            match kind {
                ResourceKind::Organization => report.organizations = activated,
                ResourceKind::Auditor => report.auditors = activated,
            }
        }

        Ok(report)
    }

    /// The owner account stays usable whatever the plan
    pub async fn ensure_owner_active(&self, tx: &mut dyn BillingTx, owner_id: Uuid) -> BillingResult<()> {
        tx.activate_owner_account(owner_id).await?;
        Ok(())
    }
}
