use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::mlm::payouts::LevelInfo;
use crate::services::ServiceError;

#[derive(Serialize)]
pub struct ProgramResponse {
    pub product_name: String,
    pub product_price_in_cents: i64,
    pub commission_total_in_cents: i64,
    pub levels: Vec<LevelInfo>,
}

#[derive(Deserialize)]
pub struct PotentialQuery {
    /// Comma separated fan-out per depth, e.g. `10,5`.
    pub network: String,
}

#[derive(Serialize)]
pub struct PotentialResponse {
    pub network: Vec<u64>,
    pub earnings_in_cents: i64,
}

pub async fn get_program(State(state): State<AppState>) -> Json<ProgramResponse> {
    let table = &state.options.table;

    Json(ProgramResponse {
        product_name: state.options.product_name.clone(),
        product_price_in_cents: table.product_price_in_cents(),
        commission_total_in_cents: table.commission_total_in_cents(),
        levels: table.describe(),
    })
}

pub async fn get_potential(
    State(state): State<AppState>,
    query: Result<Query<PotentialQuery>, QueryRejection>,
) -> Result<Json<PotentialResponse>, ServiceError> {
    let Query(query) = query?;
    let network = query
        .network
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>().map_err(|_| {
                ServiceError::Validation(format!("Invalid network size: {}", part))
            })
        })
        .collect::<Result<Vec<u64>, ServiceError>>()?;

    Ok(Json(PotentialResponse {
        earnings_in_cents: state.options.table.potential_earnings(&network),
        network,
    }))
}
