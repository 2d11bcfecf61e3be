use actix_web::{get, post, web, HttpRequest, HttpResponse};

use crate::error::{Error, Result};
use crate::service::SettlementService;

/// Header carrying the member on whose behalf a request is made. It is set by
/// the authentication layer in front of this service.
pub const ACTING_USER_HEADER: &str = "X-User-Id";

fn acting_user(request: &HttpRequest) -> Result<String> {
    request
        .headers()
        .get(ACTING_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(Error::Unauthorized)
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    service: web::Data<SettlementService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let balances = service.balances(&id).await?;
    Ok(HttpResponse::Ok().json(balances))
}

#[get("/groups/{id}/balance/{member}")]
async fn get_member_balance(
    service: web::Data<SettlementService>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse> {
    let (id, member) = path.into_inner();
    let summary = service.member_balance(&id, &member).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[post("/groups/{id}/settlements/calculate")]
async fn calculate_settlements(
    service: web::Data<SettlementService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let plan = service.calculate(&id).await?;
    Ok(HttpResponse::Ok().json(plan))
}

#[post("/groups/{id}/settlements")]
async fn create_settlements(
    service: web::Data<SettlementService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let records = service.create(&id).await?;
    Ok(HttpResponse::Created().json(records))
}

#[get("/groups/{id}/settlements")]
async fn get_settlements(
    service: web::Data<SettlementService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let records = service.list(&id).await?;
    Ok(HttpResponse::Ok().json(records))
}

#[post("/settlements/{id}/confirm")]
async fn confirm_settlement(
    request: HttpRequest,
    service: web::Data<SettlementService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let user = acting_user(&request)?;
    let record = service.confirm(&id, &user).await?;
    Ok(HttpResponse::Ok().json(record))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_balance)
        .service(get_member_balance)
        .service(calculate_settlements)
        .service(create_settlements)
        .service(get_settlements)
        .service(confirm_settlement);
}
