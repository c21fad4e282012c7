//! Session handlers

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use tracing::instrument;

/// Release a session's hold without charging
///
/// DELETE /api/v1/sessions/{session_id}/reservation
#[instrument(skip(state))]
pub async fn release_reservation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let reservation = state
        .engine
        .manager
        .release_session(&session_id)
        .await?
        .ok_or_else(|| AppError::UnknownReservation(session_id.clone()))?;

    Ok(HttpResponse::Ok().json(reservation))
}

/// Configure session routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sessions")
            .route("/{session_id}/reservation", web::delete().to(release_reservation)),
    );
}
