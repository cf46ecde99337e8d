//! Public emergency contact listing

use axum::{Json, Router, extract::State, routing::get};

use nightwatch_core::models::EmergencyContact;

use crate::AppState;
use crate::db::contacts;
use crate::error::ApiError;

async fn list_contacts(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmergencyContact>>, ApiError> {
    let contacts = contacts::list_contacts(&state.pool).await?;
    Ok(Json(contacts))
}

/// Public contact routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/emergency-contacts", get(list_contacts))
}
