//! Billing error types

use thiserror::Error;

use crate::plans::ResourceKind;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Unknown plan, unsupported period or malformed request body
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid amount for plan {plan} ({period})")]
    InvalidAmount { plan: String, period: String },

    /// Webhook checksum missing, malformed or not matching
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Unknown payment reference: {0}")]
    UnknownReference(String),

    #[error("No active subscription")]
    NoActiveSubscription,

    #[error("No unlock is pending for the active subscription")]
    NothingPending,

    #[error("Plan limit exceeded for {resource}: limit {limit}, requested {requested}")]
    LimitExceeded {
        resource: ResourceKind,
        limit: u32,
        requested: u64,
    },

    /// A stored row names a plan the catalog no longer knows
    #[error("Plan not found in catalog: {0}")]
    UnknownPlan(String),

    /// Generated reference collided with an existing one
    #[error("Duplicate payment reference: {0}")]
    DuplicateReference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl BillingError {
    /// Errors caused by the caller's input rather than by the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidRequest(_)
                | BillingError::InvalidAmount { .. }
                | BillingError::SignatureInvalid
                | BillingError::UnknownReference(_)
                | BillingError::NoActiveSubscription
                | BillingError::NothingPending
                | BillingError::LimitExceeded { .. }
        )
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> BillingError {
    BillingError::Database(e.to_string())
}
