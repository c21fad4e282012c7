//! Organization handlers
//!
//! Wallet onboarding and read-only ledger queries.

use crate::dto::{ApiResponse, OpenWalletRequest, TransactionQueryParams};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use callmeter_core::AppError;
use tracing::{debug, instrument, warn};
use validator::Validate;

/// Open a wallet for a new organization
///
/// POST /api/v1/orgs
#[instrument(skip(state, req), fields(org_id = %req.org_id))]
pub async fn open_wallet(
    state: web::Data<AppState>,
    req: web::Json<OpenWalletRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Wallet onboarding validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let wallet = state
        .engine
        .ledger_service
        .open_wallet(&req.org_id, req.currency.as_deref())
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::with_message(wallet, "Wallet ready")))
}

/// Current balance, effective balance and debt ceiling
///
/// GET /api/v1/orgs/{org_id}/balance
#[instrument(skip(state))]
pub async fn get_balance(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let org_id = path.into_inner();
    let snapshot = state.engine.ledger_service.balance(&org_id).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Transaction history, newest first
///
/// GET /api/v1/orgs/{org_id}/transactions?cursor=&limit=
#[instrument(skip(state))]
pub async fn list_transactions(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<TransactionQueryParams>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Transaction query validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let org_id = path.into_inner();
    debug!(org_id = %org_id, cursor = ?query.cursor, "Listing transactions");

    let page = state
        .engine
        .ledger_service
        .transactions(&org_id, query.cursor(), query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Active holds for an organization
///
/// GET /api/v1/orgs/{org_id}/reservations
#[instrument(skip(state))]
pub async fn list_reservations(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let org_id = path.into_inner();
    let reservations = state.engine.manager.list_active(&org_id).await?;
    Ok(HttpResponse::Ok().json(reservations))
}

/// Replay the log and compare with the stored balance
///
/// GET /api/v1/orgs/{org_id}/ledger/verify
#[instrument(skip(state))]
pub async fn verify_ledger(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let org_id = path.into_inner();
    let report = state.engine.ledger_service.verify(&org_id).await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Configure organization routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/orgs")
            .route("", web::post().to(open_wallet))
            .route("/{org_id}/balance", web::get().to(get_balance))
            .route("/{org_id}/transactions", web::get().to(list_transactions))
            .route("/{org_id}/reservations", web::get().to(list_reservations))
            .route("/{org_id}/ledger/verify", web::get().to(verify_ledger)),
    );
}
