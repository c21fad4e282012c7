//! Usage event intake

use crate::dto::{EventIntakeParams, UsageEventRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::models::UsageEvent;
use callmeter_core::AppError;
use serde_json::json;
use tracing::{debug, instrument, warn};
use validator::Validate;

/// Accept one session lifecycle event.
///
/// Handled inline by default and answered with the outcome; with
/// `?queue=true` it is handed to the worker pool and answered with 202.
///
/// POST /api/v1/events
#[instrument(skip(state, req), fields(kind = %req.kind, session_id = %req.session_id))]
pub async fn post_event(
    state: web::Data<AppState>,
    params: web::Query<EventIntakeParams>,
    req: web::Json<UsageEventRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Usage event validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;
    req.check_kind_fields().map_err(AppError::Validation)?;

    let event = UsageEvent::from(req.into_inner());

    if params.queue {
        let session_id = event.session_id.clone();
        state.enqueue(event)?;
        debug!("Event queued");
        return Ok(HttpResponse::Accepted().json(json!({
            "queued": true,
            "session_id": session_id,
        })));
    }

    let outcome = state.engine.processor.handle(event).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Configure event routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/events", web::post().to(post_event));
}
