//! Payment gateway webhook handling
//!
//! Every delivery is verified before anything else is looked at. The event
//! checksum is SHA-256 over
//! `transaction.id || transaction.status || transaction.amount_in_cents || timestamp || secret`
//! and must match `signature.checksum` exactly. Missing fields fail closed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::GatewayConfig;
use crate::error::{BillingError, BillingResult};
use crate::payments::{
    GatewayStatus, PaymentNotification, PaymentOutcome, PaymentProcessor, PaymentStatus,
};

/// The only event name that changes state
pub const TRANSACTION_UPDATED: &str = "transaction.updated";

/// Raw webhook body. Every field is optional so that an incomplete event is
/// rejected by verification rather than by deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data: Option<WebhookData>,
    #[serde(default)]
    pub signature: Option<WebhookSignature>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookData {
    #[serde(default)]
    pub transaction: Option<WebhookTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookTransaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount_in_cents: Option<i64>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookSignature {
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Fields of an event whose checksum has been verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEvent {
    pub event: Option<String>,
    pub transaction_id: String,
    pub status: String,
    pub amount_in_cents: i64,
    pub reference: Option<String>,
}

/// Checks webhook checksums against the gateway events secret. Pure: no I/O.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(gateway: &GatewayConfig) -> Self {
        Self {
            secret: gateway.events_secret.clone(),
        }
    }

    /// Parse a raw body; malformed JSON is treated as a bad signature
    pub fn parse(payload: &[u8]) -> BillingResult<WebhookEvent> {
        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::SignatureInvalid
        })
    }

    pub fn checksum(
        &self,
        transaction_id: &str,
        status: &str,
        amount_in_cents: i64,
        timestamp: i64,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(transaction_id.as_bytes());
        hasher.update(status.as_bytes());
        hasher.update(amount_in_cents.to_string().as_bytes());
        hasher.update(timestamp.to_string().as_bytes());
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self, event: &WebhookEvent) -> BillingResult<VerifiedEvent> {
        let transaction = event
            .data
            .as_ref()
            .and_then(|d| d.transaction.as_ref())
            .ok_or_else(|| missing("data.transaction"))?;
        let timestamp = event.timestamp.ok_or_else(|| missing("timestamp"))?;
        let transaction_id = transaction
            .id
            .as_deref()
            .ok_or_else(|| missing("data.transaction.id"))?;
        let status = transaction
            .status
            .as_deref()
            .ok_or_else(|| missing("data.transaction.status"))?;
        let amount_in_cents = transaction
            .amount_in_cents
            .ok_or_else(|| missing("data.transaction.amount_in_cents"))?;
        let received = event
            .signature
            .as_ref()
            .and_then(|s| s.checksum.as_deref())
            .ok_or_else(|| missing("signature.checksum"))?;

        let computed = self.checksum(transaction_id, status, amount_in_cents, timestamp);
        if !bool::from(computed.as_bytes().ct_eq(received.as_bytes())) {
            tracing::warn!(
                transaction_id = %transaction_id,
                reference = ?transaction.reference,
                "Webhook checksum mismatch"
            );
            return Err(BillingError::SignatureInvalid);
        }

        Ok(VerifiedEvent {
            event: event.event.clone(),
            transaction_id: transaction_id.to_string(),
            status: status.to_string(),
            amount_in_cents,
            reference: transaction.reference.clone(),
        })
    }
}

fn missing(field: &str) -> BillingError {
    tracing::warn!(field = field, "Webhook event missing required field");
    BillingError::SignatureInvalid
}

/// What a webhook delivery resulted in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Verified, but not an event that changes state
    Ignored { event: Option<String> },
    /// The intent was already approved
    AlreadyProcessed,
    /// The intent moved to `status`
    Processed { status: PaymentStatus },
}

/// Verifies, filters and applies gateway notifications
#[derive(Clone)]
pub struct WebhookHandler {
    verifier: WebhookVerifier,
    processor: PaymentProcessor,
}

impl WebhookHandler {
    pub fn new(verifier: WebhookVerifier, processor: PaymentProcessor) -> Self {
        Self {
            verifier,
            processor,
        }
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Handle a raw webhook body
    pub async fn handle_payload(&self, payload: &[u8]) -> BillingResult<WebhookOutcome> {
        let event = WebhookVerifier::parse(payload)?;
        self.handle_event(&event).await
    }

    pub async fn handle_event(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        let verified = self.verifier.verify(event)?;

        if verified.event.as_deref() != Some(TRANSACTION_UPDATED) {
            tracing::info!(
                event = ?verified.event,
                transaction_id = %verified.transaction_id,
                "Ignoring webhook event"
            );
            return Ok(WebhookOutcome::Ignored {
                event: verified.event,
            });
        }

        let reference = verified.reference.ok_or_else(|| {
            BillingError::InvalidRequest("Webhook event missing transaction reference".to_string())
        })?;

        let notification = PaymentNotification {
            reference,
            status: GatewayStatus::parse(&verified.status),
            amount_in_cents: verified.amount_in_cents,
        };

        let outcome = match self.processor.apply_notification(&notification).await {
            Ok(outcome) => outcome,
            Err(BillingError::UnknownReference(reference)) => {
                tracing::warn!(
                    reference = %reference,
                    transaction_id = %verified.transaction_id,
                    "Webhook for unknown payment reference"
                );
                return Err(BillingError::UnknownReference(reference));
            }
            Err(e) => {
                tracing::error!(
                    reference = %notification.reference,
                    error = %e,
                    "Failed to apply payment notification"
                );
                return Err(e);
            }
        };

        Ok(match outcome {
            PaymentOutcome::AlreadyProcessed => WebhookOutcome::AlreadyProcessed,
            PaymentOutcome::Approved(_) => WebhookOutcome::Processed {
                status: PaymentStatus::Approved,
            },
            PaymentOutcome::Rejected { status } => WebhookOutcome::Processed { status },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(&GatewayConfig {
            integrity_secret: "test_integrity".to_string(),
            events_secret: "test_events_secret".to_string(),
            currency: "COP".to_string(),
        })
    }

    fn signed_event(v: &WebhookVerifier) -> WebhookEvent {
        let checksum = v.checksum("1234-1610641025-49201", "APPROVED", 150000, 1530291411);
        WebhookEvent {
            event: Some(TRANSACTION_UPDATED.to_string()),
            timestamp: Some(1530291411),
            data: Some(WebhookData {
                transaction: Some(WebhookTransaction {
                    id: Some("1234-1610641025-49201".to_string()),
                    status: Some("APPROVED".to_string()),
                    amount_in_cents: Some(150000),
                    reference: Some("17000000000001234".to_string()),
                }),
            }),
            signature: Some(WebhookSignature {
                checksum: Some(checksum),
            }),
        }
    }

    #[test]
    fn test_checksum_is_concatenation_digest() {
        let v = verifier();
        let expected = hex::encode(Sha256::digest(
            "1234-1610641025-49201APPROVED1500001530291411test_events_secret".as_bytes(),
        ));
        assert_eq!(
            v.checksum("1234-1610641025-49201", "APPROVED", 150000, 1530291411),
            expected
        );
    }

    #[test]
    fn test_valid_event_verifies() {
        let v = verifier();
        let verified = v.verify(&signed_event(&v)).unwrap();
        assert_eq!(verified.status, "APPROVED");
        assert_eq!(verified.amount_in_cents, 150000);
        assert_eq!(verified.reference.as_deref(), Some("17000000000001234"));
    }

    #[test]
    fn test_tampered_fields_rejected() {
        let v = verifier();

        let mut event = signed_event(&v);
        if let Some(tx) = event.data.as_mut().and_then(|d| d.transaction.as_mut()) {
            tx.amount_in_cents = Some(1);
        }
        assert!(matches!(v.verify(&event), Err(BillingError::SignatureInvalid)));

        let mut event = signed_event(&v);
        if let Some(tx) = event.data.as_mut().and_then(|d| d.transaction.as_mut()) {
            tx.status = Some("DECLINED".to_string());
        }
        assert!(matches!(v.verify(&event), Err(BillingError::SignatureInvalid)));

        let mut event = signed_event(&v);
        event.timestamp = Some(1530291412);
        assert!(matches!(v.verify(&event), Err(BillingError::SignatureInvalid)));
    }

    #[test]
    fn test_missing_fields_fail_closed() {
        let v = verifier();

        let mut event = signed_event(&v);
        event.signature = None;
        assert!(matches!(v.verify(&event), Err(BillingError::SignatureInvalid)));

        let mut event = signed_event(&v);
        event.timestamp = None;
        assert!(matches!(v.verify(&event), Err(BillingError::SignatureInvalid)));

        let mut event = signed_event(&v);
        event.data = None;
        assert!(matches!(v.verify(&event), Err(BillingError::SignatureInvalid)));

        assert!(matches!(
            v.verify(&WebhookEvent::default()),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_checksum_from_other_secret_rejected() {
        let v = verifier();
        let other = WebhookVerifier::new(&GatewayConfig {
            integrity_secret: "test_integrity".to_string(),
            events_secret: "another_secret".to_string(),
            currency: "COP".to_string(),
        });
        assert!(v.verify(&signed_event(&other)).is_err());
    }

    #[test]
    fn test_parse_wire_format() {
        let body = br#"{
            "event": "transaction.updated",
            "timestamp": 1530291411,
            "data": {"transaction": {
                "id": "1234-1610641025-49201",
                "status": "APPROVED",
                "amount_in_cents": 150000,
                "reference": "17000000000001234"
            }},
            "signature": {"checksum": "abc", "properties": ["transaction.id"]}
        }"#;
        let event = WebhookVerifier::parse(body).unwrap();
        assert_eq!(event.event.as_deref(), Some(TRANSACTION_UPDATED));
        assert_eq!(event.timestamp, Some(1530291411));

        assert!(matches!(
            WebhookVerifier::parse(b"not json"),
            Err(BillingError::SignatureInvalid)
        ));
    }
}
