use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use super::{dispatch, require_admin, AppState};
use crate::models::{
    commissions::Commission,
    referrals::{ProgramTotals, ReferralEntry},
    users::User,
};
use crate::services::{commissions::CommissionRequest, users::UserRequest, ServiceError};

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub async fn overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProgramTotals>, ServiceError> {
    require_admin(&state, &headers).await?;

    dispatch(&state.commission_channel, "CommissionService", |response| {
        CommissionRequest::GetTotals { response }
    })
    .await
    .map(Json)
}

pub async fn search_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    search: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Vec<User>>, ServiceError> {
    require_admin(&state, &headers).await?;
    let Query(search) = search?;

    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::SearchUsers {
            query: search.q,
            response,
        }
    })
    .await
    .map(Json)
}

pub async fn tree(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReferralEntry>>, ServiceError> {
    require_admin(&state, &headers).await?;

    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::GetReferralTree {
            root: None,
            response,
        }
    })
    .await
    .map(Json)
}

pub async fn list_commissions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Commission>>, ServiceError> {
    require_admin(&state, &headers).await?;

    dispatch(&state.commission_channel, "CommissionService", |response| {
        CommissionRequest::ListCommissions {
            user_id: None,
            response,
        }
    })
    .await
    .map(Json)
}

pub async fn mark_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Commission>, ServiceError> {
    let admin = require_admin(&state, &headers).await?;
    log::info!("Admin {} marking commission {} paid.", admin.id, id);

    dispatch(&state.commission_channel, "CommissionService", |response| {
        CommissionRequest::MarkPaid { id, response }
    })
    .await
    .map(Json)
}
