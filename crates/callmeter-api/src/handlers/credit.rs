//! Credit grant intake

use crate::dto::CreditGrantRequest;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::models::{AppendOutcome, CreditGrant};
use callmeter_core::AppError;
use serde_json::json;
use tracing::{instrument, warn};
use validator::Validate;

/// Apply a top-up, bonus, refund or adjustment.
///
/// 201 with the new row; 200 with the original row when `external_event_id`
/// was already applied.
///
/// POST /api/v1/credits
#[instrument(skip(state, req), fields(org_id = %req.org_id, external_event_id = %req.external_event_id))]
pub async fn post_credit(
    state: web::Data<AppState>,
    req: web::Json<CreditGrantRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Credit grant validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let grant = CreditGrant::from(req.into_inner());
    let outcome = state.engine.processor.grant_credit(grant).await?;

    let response = match outcome {
        AppendOutcome::Applied {
            transaction,
            new_balance,
        } => HttpResponse::Created().json(json!({
            "duplicate": false,
            "transaction": transaction,
            "balance": new_balance,
        })),
        AppendOutcome::Duplicate(transaction) => HttpResponse::Ok().json(json!({
            "duplicate": true,
            "transaction": transaction,
        })),
    };
    Ok(response)
}

/// Configure credit routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/credits", web::post().to(post_credit));
}
