//! # Web Server Routes for the Emotion Analysis API
//!
//! Handlers receive the loaded model as an [`EmotionAnalyzer`] through
//! `web::Data`, so the same routes run against the real DistilBERT model in
//! production and against stub classifiers in tests.

use actix_web::middleware::Logger;
use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ServerConfig, DEFAULT_MAX_BODY_BYTES};
use crate::emotion::EmotionAnalyzer;
use crate::error::{InferenceError, ServiceError};
use crate::types::{FeedbackRequest, HealthStatus, PredictionResponse};

/// Classifies every text in the request body.
///
/// Returns **200** with one prediction per text, **422** when the body does
/// not match `{"texts": [string, ...]}` (raised by [`json_config`] before this
/// handler runs) and **500** when tokenization or the forward pass fails.
/// Inference runs on the blocking thread pool.
#[post("/analyze")]
pub async fn analyze(
    analyzer: web::Data<EmotionAnalyzer>,
    request: web::Json<FeedbackRequest>,
) -> Result<HttpResponse, ServiceError> {
    let request_id = Uuid::new_v4();
    let texts = request.into_inner().texts;
    debug!("[{}] Analyzing {} texts", request_id, texts.len());

    let analyzer = analyzer.into_inner();
    let predictions = web::block(move || analyzer.analyze(texts))
        .await
        .map_err(|e| InferenceError::Worker(e.to_string()))
        .and_then(|result| result)
        .map_err(|e| {
            error!("[{}] Error during inference: {}", request_id, e);
            ServiceError::from(e)
        })?;

    debug!("[{}] Produced {} predictions", request_id, predictions.len());
    Ok(HttpResponse::Ok().json(PredictionResponse { predictions }))
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthStatus::healthy())
}

/// JSON extractor settings: bodies up to `limit` bytes are accepted and body
/// errors become 422 `{"detail": ...}`.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| {
            warn!("Rejected request body: {}", err);
            ServiceError::Validation(err.to_string()).into()
        })
}

/// Registers the API routes with the default body limit. The caller provides
/// the `EmotionAnalyzer` as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    configure_with_limit(cfg, DEFAULT_MAX_BODY_BYTES);
}

pub fn configure_with_limit(cfg: &mut web::ServiceConfig, max_body_bytes: usize) {
    cfg.app_data(json_config(max_body_bytes))
        .service(analyze)
        .service(health);
}

/// Binds to `config.host:config.port` and serves until shutdown.
pub async fn run_server(config: &ServerConfig, analyzer: EmotionAnalyzer) -> std::io::Result<()> {
    let analyzer = web::Data::new(analyzer);
    let max_body_bytes = config.max_body_bytes;

    info!(
        "Starting server at http://{}:{}/ with {} workers (body limit {} bytes)",
        config.host, config.port, config.workers, max_body_bytes
    );
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(analyzer.clone())
            .configure(|cfg| configure_with_limit(cfg, max_body_bytes))
    })
    .workers(config.workers.get())
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
