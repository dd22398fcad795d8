//! Payment gateway configuration

use std::fmt;
use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::plans::PlanCatalog;

/// Secrets and settings shared with the external payment gateway
#[derive(Clone)]
pub struct GatewayConfig {
    /// Secret appended to the checkout integrity digest
    pub integrity_secret: String,
    /// Secret appended to the webhook event checksum
    pub events_secret: String,
    /// ISO currency code sent with every checkout (e.g. COP)
    pub currency: String,
}

// Secrets must never reach the logs
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("integrity_secret", &"[redacted]")
            .field("events_secret", &"[redacted]")
            .field("currency", &self.currency)
            .finish()
    }
}

/// Full billing configuration injected into the services
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub gateway: GatewayConfig,
    pub catalog: Arc<PlanCatalog>,
}

impl BillingConfig {
    pub fn new(gateway: GatewayConfig, catalog: PlanCatalog) -> Self {
        Self {
            gateway,
            catalog: Arc::new(catalog),
        }
    }

    /// Build from environment variables
    ///
    /// * `GATEWAY_INTEGRITY_SECRET` (required)
    /// * `GATEWAY_EVENTS_SECRET` (required)
    /// * `GATEWAY_CURRENCY` (default `COP`)
    /// * `PLAN_CATALOG_PATH` (optional JSON catalog, built-in tiers otherwise)
    pub fn from_env() -> BillingResult<Self> {
        let integrity_secret = required_env("GATEWAY_INTEGRITY_SECRET")?;
        let events_secret = required_env("GATEWAY_EVENTS_SECRET")?;
        let currency = std::env::var("GATEWAY_CURRENCY").unwrap_or_else(|_| "COP".to_string());

        let catalog = match std::env::var("PLAN_CATALOG_PATH") {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "Loading plan catalog from file");
                PlanCatalog::from_json_file(path.trim())?
            }
            _ => PlanCatalog::standard(),
        };

        Ok(Self::new(
            GatewayConfig {
                integrity_secret,
                events_secret,
                currency,
            },
            catalog,
        ))
    }
}

fn required_env(name: &str) -> BillingResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(BillingError::Config(format!("{} must be set", name))),
    }
}
