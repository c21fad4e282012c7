//! API layer for callmeter
//!
//! HTTP handlers for usage event intake, credit grants and ledger queries.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;
pub mod state;

pub use dto::ApiResponse;
pub use state::AppState;

use actix_web::{web, HttpResponse};
use handlers::{
    configure_credits, configure_events, configure_orgs, configure_sessions, health_check,
};

/// Mount every route under `/api/v1`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid_body",
                "message": message,
                "status": 400,
                "retryable": false,
            })),
        )
        .into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid_query",
                "message": message,
                "status": 400,
                "retryable": false,
            })),
        )
        .into()
    }))
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health_check))
            .configure(configure_orgs)
            .configure(configure_events)
            .configure(configure_credits)
            .configure(configure_sessions),
    );
}
