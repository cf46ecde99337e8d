//! Admin emergency contact management

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use nightwatch_core::models::EmergencyContact;

use crate::AppState;
use crate::db::audit::AuditContext;
use crate::db::contacts::{self, ContactInput};
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::middleware::client_meta::ClientMeta;

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub display_order: i64,
}

impl From<ContactRequest> for ContactInput {
    fn from(req: ContactRequest) -> Self {
        ContactInput {
            name: req.name,
            number: req.number,
            description: req.description,
            is_default: req.is_default,
            display_order: req.display_order,
        }
    }
}

fn audit_ctx(auth: &AuthUser, meta: &ClientMeta) -> AuditContext {
    AuditContext {
        actor: Some(auth.id),
        ip: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    }
}

async fn list_contacts(
    State(state): State<AppState>,
) -> Result<Json<Vec<EmergencyContact>>, ApiError> {
    Ok(Json(contacts::list_contacts(&state.pool).await?))
}

async fn create_contact(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<ContactRequest>,
) -> Result<Response, ApiError> {
    if req.name.trim().is_empty() || req.number.trim().is_empty() {
        return Err(ApiError::validation("name and number are required"));
    }

    let contact =
        contacts::create_contact(&state.pool, req.into(), &audit_ctx(&auth, &meta)).await?;
    Ok((StatusCode::CREATED, Json(contact)).into_response())
}

async fn update_contact(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<Uuid>,
    Json(req): Json<ContactRequest>,
) -> Result<Json<EmergencyContact>, ApiError> {
    let contact =
        contacts::update_contact(&state.pool, id, req.into(), &audit_ctx(&auth, &meta)).await?;
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    contacts::delete_contact(&state.pool, id, &audit_ctx(&auth, &meta)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/emergency-contacts",
            get(list_contacts).post(create_contact),
        )
        .route(
            "/emergency-contacts/{id}",
            axum::routing::put(update_contact).delete(delete_contact),
        )
}
