//! Liveness endpoint

use actix_web::{HttpResponse, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{CacheBackend, Config};

/// Running version plus the grading defaults requests fall back to
#[derive(Debug, Serialize, ToSchema)]
pub struct LivenessReport {
    pub status: &'static str,
    pub version: &'static str,
    pub default_model: String,
    /// `none`, `file` or `redis`
    pub cache: &'static str,
}

#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Grader is up", body = LivenessReport)),
    tag = "health"
)]
#[get("/health/live")]
pub async fn liveness(config: web::Data<Config>) -> HttpResponse {
    let cache = match config.cache.backend {
        CacheBackend::None => "none",
        CacheBackend::File => "file",
        CacheBackend::Redis => "redis",
    };
    HttpResponse::Ok().json(LivenessReport {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        default_model: config.grading.model.clone(),
        cache,
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(liveness);
}
