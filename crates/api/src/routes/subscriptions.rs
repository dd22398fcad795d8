//! Manual unlock route

use auditora_billing::{UnlockReport, UnlockSelection};
use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// Resources to keep active after a downgrade
#[derive(Debug, Default, Deserialize)]
pub struct UnlockRequest {
    #[serde(default, alias = "organizations")]
    pub empresas: Vec<Uuid>,
    #[serde(default, alias = "auditors")]
    pub usuarios: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnlockResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub report: UnlockReport,
}

pub async fn confirm_unlock(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<UnlockRequest>, JsonRejection>,
) -> ApiResult<Json<UnlockResponse>> {
    let owner_id = auth_user.require_owner()?;
    let Json(req) = payload?;
    let selection = UnlockSelection::new(req.empresas, req.usuarios);

    let report = state
        .billing
        .unlock
        .confirm_unlock(owner_id, &selection)
        .await?;

    Ok(Json(UnlockResponse {
        message: "Resources unlocked",
        report,
    }))
}
