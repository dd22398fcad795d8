//! Integrity signer and purchase intent store
//!
//! A checkout request produces a gateway reference, the amount in minor
//! units and an integrity digest the gateway uses to detect client-side
//! tampering. Only the latest pending intent per owner is kept.

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::{BillingError, BillingResult};
use crate::payments::{NewPurchaseIntent, PurchaseIntent};
use crate::plans::{BillingPeriod, PlanCatalog};
use crate::store::BillingStore;

/// Attempts at inserting an intent before a reference collision is fatal
const MAX_REFERENCE_ATTEMPTS: usize = 3;

/// Signs checkout parameters with the gateway integrity secret
#[derive(Clone)]
pub struct IntegritySigner {
    secret: String,
    currency: String,
}

impl IntegritySigner {
    pub fn new(gateway: &GatewayConfig) -> Self {
        Self {
            secret: gateway.integrity_secret.clone(),
            currency: gateway.currency.clone(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Lowercase hex SHA-256 of `reference || amount || currency || secret`
    pub fn sign(&self, reference: &str, amount_cents: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(reference.as_bytes());
        hasher.update(amount_cents.to_string().as_bytes());
        hasher.update(self.currency.as_bytes());
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Unix milliseconds followed by a four digit random suffix
pub fn generate_reference() -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix: u16 = rand::rng().random_range(1000..10000);
    format!("{}{}", millis, suffix)
}

/// What the client needs to open the gateway checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutTicket {
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub integrity_signature: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    catalog: Arc<PlanCatalog>,
    signer: IntegritySigner,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        catalog: Arc<PlanCatalog>,
        gateway: &GatewayConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            signer: IntegritySigner::new(gateway),
        }
    }

    pub fn signer(&self) -> &IntegritySigner {
        &self.signer
    }

    /// Create the owner's purchase intent for a plan and period
    ///
    /// Earlier pending intents of the owner are deleted in the same unit of
    /// work. A reference collision is retried with a fresh reference.
    pub async fn create_purchase_intent(
        &self,
        owner_id: Uuid,
        plan: &str,
        period: &str,
    ) -> BillingResult<CheckoutTicket> {
        let definition = self
            .catalog
            .get(plan)
            .ok_or_else(|| BillingError::InvalidRequest(format!("Unknown plan '{}'", plan)))?;
        let period: BillingPeriod = period.parse()?;

        let amount_cents = definition.amount_in_cents(period);
        if amount_cents <= 0 {
            return Err(BillingError::InvalidAmount {
                plan: definition.name.clone(),
                period: period.to_string(),
            });
        }

        let mut attempt = 0;
        let intent = loop {
            attempt += 1;
            let new_intent = NewPurchaseIntent {
                owner_id,
                plan: definition.name.clone(),
                period,
                reference: generate_reference(),
                amount_cents,
                currency: self.signer.currency().to_string(),
            };

            match self.store_intent(&new_intent).await {
                Ok(intent) => break intent,
                Err(BillingError::DuplicateReference(reference))
                    if attempt < MAX_REFERENCE_ATTEMPTS =>
                {
                    tracing::warn!(
                        owner_id = %owner_id,
                        reference = %reference,
                        attempt = attempt,
                        "Payment reference collision, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        let integrity_signature = self.signer.sign(&intent.reference, intent.amount_cents);

        tracing::info!(
            owner_id = %owner_id,
            plan = %intent.plan,
            period = %intent.period,
            reference = %intent.reference,
            amount_cents = intent.amount_cents,
            "Purchase intent created"
        );

        Ok(CheckoutTicket {
            reference: intent.reference,
            amount_cents: intent.amount_cents,
            currency: intent.currency,
            integrity_signature,
        })
    }

    async fn store_intent(&self, intent: &NewPurchaseIntent) -> BillingResult<PurchaseIntent> {
        let mut tx = self.store.begin().await?;
        let replaced = tx.delete_pending_intents(intent.owner_id).await?;
        let stored = tx.insert_intent(intent).await?;
        tx.commit().await?;

        if replaced > 0 {
            tracing::debug!(
                owner_id = %intent.owner_id,
                replaced = replaced,
                "Replaced pending purchase intents"
            );
        }
        Ok(stored)
    }
}
