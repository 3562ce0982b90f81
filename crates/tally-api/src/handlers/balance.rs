//! Balance read endpoint

use crate::dto::BalanceResponse;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tally_core::AppError;
use tally_services::LedgerService;
use uuid::Uuid;

/// Configure balance routes
pub fn configure_balance(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/billing/balance").route("/{user_id}", web::get().to(get_balance)));
}

/// GET /billing/balance/{user_id}
async fn get_balance(
    path: web::Path<Uuid>,
    ledger: web::Data<Arc<LedgerService>>,
) -> Result<HttpResponse, AppError> {
    let balance = ledger.get_balance(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse::from(balance)))
}
