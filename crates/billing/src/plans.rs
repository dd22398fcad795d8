//! Plan catalog: tiers, billing periods, prices and resource limits
//!
//! The catalog is process configuration. It is built once at startup (either
//! the built-in tiers or a JSON file) and shared read-only by every service.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Billing period a purchase covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingPeriod {
    #[serde(rename = "mes")]
    Month,
    #[serde(rename = "trimestre")]
    Quarter,
    #[serde(rename = "semestre")]
    Semester,
    #[serde(rename = "anio")]
    Year,
}

impl BillingPeriod {
    pub const ALL: [BillingPeriod; 4] = [
        BillingPeriod::Month,
        BillingPeriod::Quarter,
        BillingPeriod::Semester,
        BillingPeriod::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Month => "mes",
            BillingPeriod::Quarter => "trimestre",
            BillingPeriod::Semester => "semestre",
            BillingPeriod::Year => "anio",
        }
    }

    /// Length of the entitlement window in calendar months
    pub fn months(&self) -> u8 {
        match self {
            BillingPeriod::Month => 1,
            BillingPeriod::Quarter => 3,
            BillingPeriod::Semester => 6,
            BillingPeriod::Year => 12,
        }
    }

    /// Price multiplier applied on top of `months * monthly_price`
    pub fn discount_multiplier(&self) -> f64 {
        match self {
            BillingPeriod::Month => 1.0,
            BillingPeriod::Quarter => 0.90,
            BillingPeriod::Semester => 0.85,
            BillingPeriod::Year => 0.80,
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingPeriod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mes" => Ok(BillingPeriod::Month),
            "trimestre" => Ok(BillingPeriod::Quarter),
            "semestre" => Ok(BillingPeriod::Semester),
            "anio" => Ok(BillingPeriod::Year),
            other => Err(BillingError::InvalidRequest(format!(
                "Invalid period '{}'. Valid periods are: mes, trimestre, semestre, anio",
                other
            ))),
        }
    }
}

/// Kind of owned resource subject to plan capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Organization,
    Auditor,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Organization => write!(f, "organizations"),
            ResourceKind::Auditor => write!(f, "auditors"),
        }
    }
}

/// Capacity granted by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_organizations: u32,
    pub max_auditors: u32,
}

impl PlanLimits {
    pub fn limit_for(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Organization => self.max_organizations,
            ResourceKind::Auditor => self.max_auditors,
        }
    }
}

/// A single named tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub name: String,
    /// Monthly price in major currency units
    pub monthly_price: f64,
    pub limits: PlanLimits,
}

impl PlanDefinition {
    /// Total price for the period, discount applied, in major currency units
    pub fn price(&self, period: BillingPeriod) -> f64 {
        self.monthly_price * f64::from(period.months()) * period.discount_multiplier()
    }

    /// Price in minor currency units, rounded to the nearest unit
    pub fn amount_in_cents(&self, period: BillingPeriod) -> i64 {
        (self.price(period) * 100.0).round() as i64
    }
}

/// Immutable set of plans known to the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCatalog {
    plans: Vec<PlanDefinition>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<PlanDefinition>) -> BillingResult<Self> {
        if plans.is_empty() {
            return Err(BillingError::Config("Plan catalog is empty".to_string()));
        }
        for (i, plan) in plans.iter().enumerate() {
            if plan.name.trim().is_empty() {
                return Err(BillingError::Config("Plan with empty name".to_string()));
            }
            if plans[..i].iter().any(|p| p.name == plan.name) {
                return Err(BillingError::Config(format!(
                    "Duplicate plan '{}' in catalog",
                    plan.name
                )));
            }
        }
        Ok(Self { plans })
    }

    /// Built-in tiers
    pub fn standard() -> Self {
        Self {
            plans: vec![
                PlanDefinition {
                    name: "basico".to_string(),
                    monthly_price: 1_500.0,
                    limits: PlanLimits {
                        max_organizations: 1,
                        max_auditors: 1,
                    },
                },
                PlanDefinition {
                    name: "estandar".to_string(),
                    monthly_price: 2_000.0,
                    limits: PlanLimits {
                        max_organizations: 3,
                        max_auditors: 5,
                    },
                },
                PlanDefinition {
                    name: "premium".to_string(),
                    monthly_price: 189_000.0,
                    limits: PlanLimits {
                        max_organizations: 10,
                        max_auditors: 15,
                    },
                },
            ],
        }
    }

    /// Load a catalog from a JSON file of the form `{"plans": [...]}`
    pub fn from_json_file(path: impl AsRef<Path>) -> BillingResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BillingError::Config(format!("Cannot read plan catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> BillingResult<Self> {
        let parsed: PlanCatalog = serde_json::from_str(raw)
            .map_err(|e| BillingError::Config(format!("Invalid plan catalog: {}", e)))?;
        Self::new(parsed.plans)
    }

    pub fn get(&self, name: &str) -> Option<&PlanDefinition> {
        self.plans.iter().find(|p| p.name == name)
    }

    /// Lookup for plans referenced by stored rows; a miss is a server-side fault
    pub fn require(&self, name: &str) -> BillingResult<&PlanDefinition> {
        self.get(name)
            .ok_or_else(|| BillingError::UnknownPlan(name.to_string()))
    }

    pub fn plans(&self) -> &[PlanDefinition] {
        &self.plans
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
