use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{dispatch, AppState};
use crate::models::{commissions::PurchaseReceipt, transactions::Transaction};
use crate::services::{purchases::PurchaseRequest, ServiceError};

#[derive(Deserialize)]
pub struct PurchaseBody {
    pub user_id: String,
    pub amount_in_cents: Option<i64>,
}

pub async fn purchase(
    State(state): State<AppState>,
    payload: Result<Json<PurchaseBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), ServiceError> {
    let Json(req) = payload?;
    let receipt = dispatch(&state.purchase_channel, "PurchaseService", |response| {
        PurchaseRequest::Purchase {
            user_id: req.user_id,
            amount_in_cents: req.amount_in_cents,
            response,
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Transaction>>, ServiceError> {
    dispatch(&state.purchase_channel, "PurchaseService", |response| {
        PurchaseRequest::ListTransactions { user_id, response }
    })
    .await
    .map(Json)
}
