use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::{CityResourcesResponse, ResourceBalance};
use crate::rate_limit::EndpointClass;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use types::ids::CityId;

/// A city's stockpile, visible to its owner only
pub async fn city_resources(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(city_id): Path<CityId>,
) -> Result<Json<CityResourcesResponse>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Query)?;

    let balances = state.market.city_balances(user.user_id, city_id)?;
    Ok(Json(CityResourcesResponse {
        city_id,
        resources: balances.into_iter().map(ResourceBalance::from).collect(),
    }))
}
