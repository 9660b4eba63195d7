use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, AppState};
use crate::mlm::payouts;
use crate::models::{
    commissions::Commission,
    referrals::{ReferralEntry, ReferralLink, UserStats},
    users::{NewUser, User},
};
use crate::services::{commissions::CommissionRequest, users::UserRequest, ServiceError};

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(req) = payload?;
    let user = dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::Register {
            name: req.name,
            email: req.email,
            referral_code: req.referral_code,
            response,
        }
    })
    .await?;

    let referral_link = payouts::referral_link(&state.options.public_url, &user.referral_code);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": user,
            "referral_link": referral_link
        })),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ServiceError> {
    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::GetUser { id, response }
    })
    .await
    .map(Json)
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserStats>, ServiceError> {
    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::GetStats { id, response }
    })
    .await
    .map(Json)
}

pub async fn list_commissions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Commission>>, ServiceError> {
    dispatch(&state.commission_channel, "CommissionService", |response| {
        CommissionRequest::ListCommissions {
            user_id: Some(id),
            response,
        }
    })
    .await
    .map(Json)
}

/// The caller's own branch of the referral forest, the caller first.
pub async fn get_referrals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ReferralEntry>>, ServiceError> {
    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::GetReferralTree {
            root: Some(id),
            response,
        }
    })
    .await
    .map(Json)
}

pub async fn get_referral_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReferralLink>, ServiceError> {
    dispatch(&state.user_channel, "UserService", |response| {
        UserRequest::GetReferralLink { id, response }
    })
    .await
    .map(Json)
}
