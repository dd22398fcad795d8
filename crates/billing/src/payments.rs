//! Purchase intents and the payment state machine
//!
//! A notification for a reference is applied under an exclusive row lock on
//! the intent, held until the unit of work commits. `approved` is absorbing:
//! once reached, later notifications for the same reference are no-ops.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entitlement::{EntitlementReconciler, ReconcileOutcome};
use crate::error::{BillingError, BillingResult};
use crate::plans::BillingPeriod;
use crate::store::BillingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Failed,
    Error,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Error => "error",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "approved" => Ok(PaymentStatus::Approved),
            "failed" => Ok(PaymentStatus::Failed),
            "error" => Ok(PaymentStatus::Error),
            other => Err(BillingError::Database(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Transaction status as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Approved,
    Declined,
    /// VOIDED, ERROR, PENDING or anything the gateway adds later
    Other(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "APPROVED" => GatewayStatus::Approved,
            "DECLINED" => GatewayStatus::Declined,
            other => GatewayStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayStatus::Approved => f.write_str("APPROVED"),
            GatewayStatus::Declined => f.write_str("DECLINED"),
            GatewayStatus::Other(s) => f.write_str(s),
        }
    }
}

/// One checkout attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub plan: String,
    pub period: BillingPeriod,
    pub reference: String,
    /// Minor currency units
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Values for a purchase intent about to be inserted (always `pending`)
#[derive(Debug, Clone, PartialEq)]
pub struct NewPurchaseIntent {
    pub owner_id: Uuid,
    pub plan: String,
    pub period: BillingPeriod,
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Verified notification content relevant to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub reference: String,
    pub status: GatewayStatus,
    pub amount_in_cents: i64,
}

/// What applying a notification did
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// Intent was already approved; nothing changed
    AlreadyProcessed,
    /// Intent approved and entitlement reconciled
    Approved(ReconcileOutcome),
    /// Intent moved to `failed` or `error`
    Rejected { status: PaymentStatus },
}

/// Applies gateway notifications to purchase intents
#[derive(Clone)]
pub struct PaymentProcessor {
    store: Arc<dyn BillingStore>,
    reconciler: EntitlementReconciler,
}

impl PaymentProcessor {
    pub fn new(store: Arc<dyn BillingStore>, reconciler: EntitlementReconciler) -> Self {
        Self { store, reconciler }
    }

    /// Apply a verified notification in a single unit of work
    ///
    /// The intent row stays locked until commit, which serializes duplicate
    /// deliveries of the same event. Any failure drops the transaction and
    /// with it every partial intent, subscription or resource change.
    pub async fn apply_notification(
        &self,
        notification: &PaymentNotification,
    ) -> BillingResult<PaymentOutcome> {
        let mut tx = self.store.begin().await?;

        let intent = tx
            .lock_intent(&notification.reference)
            .await?
            .ok_or_else(|| BillingError::UnknownReference(notification.reference.clone()))?;

        if intent.status == PaymentStatus::Approved {
            tx.commit().await?;
            tracing::info!(
                reference = %intent.reference,
                owner_id = %intent.owner_id,
                gateway_status = %notification.status,
                "Payment already approved - notification ignored"
            );
            return Ok(PaymentOutcome::AlreadyProcessed);
        }

        let outcome = match &notification.status {
            GatewayStatus::Approved if notification.amount_in_cents != intent.amount_cents => {
                tracing::error!(
                    reference = %intent.reference,
                    owner_id = %intent.owner_id,
                    expected_cents = intent.amount_cents,
                    received_cents = notification.amount_in_cents,
                    "Approved amount does not match purchase intent - no entitlement granted"
                );
                tx.update_intent_status(intent.id, PaymentStatus::Error).await?;
                PaymentOutcome::Rejected {
                    status: PaymentStatus::Error,
                }
            }
            GatewayStatus::Approved => {
                tx.update_intent_status(intent.id, PaymentStatus::Approved)
                    .await?;
                let reconciled = self.reconciler.reconcile(&mut *tx, &intent).await?;
                PaymentOutcome::Approved(reconciled)
            }
            GatewayStatus::Declined => {
                tx.update_intent_status(intent.id, PaymentStatus::Failed).await?;
                PaymentOutcome::Rejected {
                    status: PaymentStatus::Failed,
                }
            }
            GatewayStatus::Other(raw) => {
                tracing::warn!(
                    reference = %intent.reference,
                    gateway_status = %raw,
                    "Unexpected gateway status - payment marked as error"
                );
                tx.update_intent_status(intent.id, PaymentStatus::Error).await?;
                PaymentOutcome::Rejected {
                    status: PaymentStatus::Error,
                }
            }
        };

        tx.commit().await?;

        tracing::info!(
            reference = %intent.reference,
            owner_id = %intent.owner_id,
            previous_status = %intent.status,
            gateway_status = %notification.status,
            "Payment notification applied"
        );

        Ok(outcome)
    }
}
