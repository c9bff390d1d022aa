//! Demo upstream routes served behind the gate.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde_json::json;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .default_service(web::to(echo));
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Stand-in for the proxied upstream: reflects the request line.
async fn echo(req: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "method": req.method().as_str(),
        "path": req.path(),
        "query": req.query_string(),
    }))
}
