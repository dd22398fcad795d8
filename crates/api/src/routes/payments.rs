//! Checkout reference and gateway webhook routes

use auditora_billing::WebhookOutcome;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::ApiResult,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateReferenceRequest {
    pub plan: String,
    #[serde(alias = "periodo")]
    pub period: String,
}

/// Parameters for the gateway checkout widget
#[derive(Debug, Serialize)]
pub struct CreateReferenceResponse {
    #[serde(rename = "referencia")]
    pub reference: String,
    /// Minor currency units
    #[serde(rename = "monto")]
    pub amount_cents: i64,
    #[serde(rename = "firmaIntegridad")]
    pub integrity_signature: String,
}

pub async fn create_reference(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<CreateReferenceRequest>, JsonRejection>,
) -> ApiResult<Json<CreateReferenceResponse>> {
    let owner_id = auth_user.require_owner()?;
    let Json(req) = payload?;

    let ticket = state
        .billing
        .checkout
        .create_purchase_intent(owner_id, req.plan.trim(), req.period.trim())
        .await?;

    Ok(Json(CreateReferenceResponse {
        reference: ticket.reference,
        amount_cents: ticket.amount_cents,
        integrity_signature: ticket.integrity_signature,
    }))
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

/// Gateway event callback
///
/// 200 for processed, ignored and already processed events; 400 for a bad
/// signature or an unknown reference.
pub async fn webhook(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<WebhookResponse>> {
    let outcome = state
        .billing
        .webhooks
        .handle_payload(&body)
        .await?;

    let message = match &outcome {
        WebhookOutcome::Ignored { .. } => "Event ignored",
        WebhookOutcome::AlreadyProcessed => "Payment already processed",
        WebhookOutcome::Processed { .. } => "Webhook processed",
    };

    Ok(Json(WebhookResponse { message, outcome }))
}
