//! Subscription status and capacity routes

use auditora_billing::{BillingError, Capacity, ResourceKind, SubscriptionOverview};
use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionOverview>> {
    let overview = state
        .billing
        .access
        .subscription_status(auth_user.tenant_id)
        .await?;
    Ok(Json(overview))
}

#[derive(Debug, Serialize)]
pub struct CapacityView {
    pub limit: u32,
    pub used: u64,
    pub remaining: u64,
    pub available: bool,
}

impl From<Capacity> for CapacityView {
    fn from(c: Capacity) -> Self {
        Self {
            limit: c.limit,
            used: c.used,
            remaining: c.remaining,
            available: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CapacityResponse {
    pub organizations: CapacityView,
    pub auditors: CapacityView,
}

pub async fn get_capacity(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CapacityResponse>> {
    let organizations = capacity(&state, auth_user.tenant_id, ResourceKind::Organization).await?;
    let auditors = capacity(&state, auth_user.tenant_id, ResourceKind::Auditor).await?;
    Ok(Json(CapacityResponse {
        organizations,
        auditors,
    }))
}

/// A full plan is reported, not raised
async fn capacity(
    state: &AppState,
    tenant_id: uuid::Uuid,
    kind: ResourceKind,
) -> ApiResult<CapacityView> {
    match state.billing.access.check_capacity(tenant_id, kind).await {
        Ok(capacity) => Ok(capacity.into()),
        Err(BillingError::LimitExceeded {
            limit, requested, ..
        }) => Ok(CapacityView {
            limit,
            used: requested.saturating_sub(1),
            remaining: 0,
            available: false,
        }),
        Err(e) => Err(e.into()),
    }
}
