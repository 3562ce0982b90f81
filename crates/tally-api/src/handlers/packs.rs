//! Product pack listing endpoint

use crate::dto::PackResponse;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tally_core::AppError;
use tally_services::ProductCatalog;

/// Configure pack routes
pub fn configure_packs(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/billing/packs").route("", web::get().to(list_packs)));
}

/// GET /billing/packs
async fn list_packs(
    catalog: web::Data<Arc<ProductCatalog>>,
) -> Result<HttpResponse, AppError> {
    let packs = catalog.list_active().await?;
    let response: Vec<PackResponse> = packs.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(response))
}
