use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::error;

use feedback_emotion_api::config::ServerConfig;
use feedback_emotion_api::emotion::EmotionAnalyzer;
use feedback_emotion_api::loader::load_classifier;
use feedback_emotion_api::server::routes::run_server;

fn init_logging() {
    // default level is info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging();

    // The server only binds once the model is in memory.
    let classifier = load_classifier(&config)
        .map_err(|e| {
            error!("Error loading model: {}", e);
            e
        })
        .with_context(|| format!("failed to load model '{}'", config.model_id))?;
    let analyzer = EmotionAnalyzer::new(Arc::new(classifier));

    run_server(&config, analyzer)
        .await
        .with_context(|| format!("server on {}:{} failed", config.host, config.port))?;
    Ok(())
}
