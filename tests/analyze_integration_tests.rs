use std::fs;
use std::path::Path;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::distilbert::Config as DistilBertConfig;
use futures_util::future::join_all;
use ndarray::Array2;
use serde_json::{json, Value};
use tempfile::TempDir;

use feedback_emotion_api::config::ServerConfig;
use feedback_emotion_api::emotion::{EmotionAnalyzer, EMOTION_LABELS, NUM_LABELS};
use feedback_emotion_api::error::InferenceError;
use feedback_emotion_api::loader::load_classifier;
use feedback_emotion_api::model::{DistilBertClassifier, SequenceClassifier};
use feedback_emotion_api::server::routes::configure;
use feedback_emotion_api::tokenizer::TokenizerWrapper;

/// Picks the label whose index equals the text length modulo six, so every
/// response can be checked against its own input.
struct LengthClassifier;

impl SequenceClassifier for LengthClassifier {
    fn logits(&self, texts: &[String]) -> Result<Array2<f32>, InferenceError> {
        let mut logits = Array2::zeros((texts.len(), NUM_LABELS));
        for (row, text) in texts.iter().enumerate() {
            logits[[row, text.chars().count() % NUM_LABELS]] = 3.0;
        }
        Ok(logits)
    }
}

fn expected_label(text: &str) -> &'static str {
    EMOTION_LABELS[text.chars().count() % NUM_LABELS]
}

fn analyzer_data(classifier: Arc<dyn SequenceClassifier>) -> web::Data<EmotionAnalyzer> {
    web::Data::new(EmotionAnalyzer::new(classifier))
}

fn assert_valid_prediction(prediction: &Value, text: &str) {
    assert_eq!(prediction["text"], text);
    let emotions = prediction["emotions"].as_object().expect("emotions must be an object");
    assert_eq!(emotions.len(), NUM_LABELS);
    for label in EMOTION_LABELS {
        assert!(emotions.contains_key(label), "missing label {}", label);
    }

    let sum: f64 = emotions.values().map(|v| v.as_f64().unwrap()).sum();
    assert!((sum - 1.0).abs() < 1e-4, "probabilities sum to {}", sum);

    let (max_label, _) = emotions
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_f64().unwrap()))
        .fold(("", f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
    assert_eq!(prediction["dominant_emotion"], max_label);
}

#[actix_rt::test]
async fn test_predictions_match_request_order_and_length() {
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(LengthClassifier)))
            .configure(configure),
    )
    .await;

    let texts = vec!["ok", "I love it", "Shipping took forever", "meh", "Wow!"];
    let req = test::TestRequest::post()
        .uri("/analyze")
        .set_json(json!({ "texts": texts }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), texts.len());
    for (prediction, text) in predictions.iter().zip(&texts) {
        assert_valid_prediction(prediction, text);
        assert_eq!(prediction["dominant_emotion"], expected_label(text));
    }
}

#[actix_rt::test]
async fn test_empty_batch_returns_empty_predictions() {
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(LengthClassifier)))
            .configure(configure),
    )
    .await;
    let req = test::TestRequest::post()
        .uri("/analyze")
        .set_json(json!({ "texts": [] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "predictions": [] }));
}

#[actix_rt::test]
async fn test_schema_violations_are_client_errors() {
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(LengthClassifier)))
            .configure(configure),
    )
    .await;

    let bad_bodies = [
        json!({}),
        json!({ "texts": "not a list" }),
        json!({ "texts": [1, 2, 3] }),
        json!({ "texts": ["fine", null] }),
    ];
    for body in bad_bodies {
        let req = test::TestRequest::post()
            .uri("/analyze")
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error(), "{} accepted with {}", body, resp.status());
        let err: Value = test::read_body_json(resp).await;
        assert!(err["detail"].is_string());
    }

    let req = test::TestRequest::post()
        .uri("/analyze")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"texts\": [")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_client_error());
}

#[actix_rt::test]
async fn test_concurrent_requests_do_not_mix_results() {
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(LengthClassifier)))
            .configure(configure),
    )
    .await;

    let batches: Vec<Vec<String>> = (0..16)
        .map(|i| (0..=i % 4).map(|j| "x".repeat(i * 3 + j + 1)).collect())
        .collect();

    let responses = join_all(batches.iter().map(|texts| {
        let req = test::TestRequest::post()
            .uri("/analyze")
            .set_json(json!({ "texts": texts }))
            .to_request();
        test::call_and_read_body_json::<_, _, Value>(&app, req)
    }))
    .await;

    for (texts, body) in batches.iter().zip(responses) {
        let predictions = body["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), texts.len());
        for (prediction, text) in predictions.iter().zip(texts) {
            assert_eq!(prediction["text"], text.as_str());
            assert_eq!(prediction["dominant_emotion"], expected_label(text));
        }
    }
}

#[actix_rt::test]
async fn test_large_batch_over_two_mebibytes_is_accepted() {
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(LengthClassifier)))
            .configure(configure),
    )
    .await;

    // 600 reviews of about 4 KB each, past actix's 2 MiB default JSON limit.
    let texts: Vec<String> = (0..600)
        .map(|i| format!("{} {}", "the parcel arrived late again ".repeat(135), i))
        .collect();
    let body = serde_json::to_vec(&json!({ "texts": texts })).unwrap();
    assert!(body.len() > 2 * 1024 * 1024);

    let req = test::TestRequest::post()
        .uri("/analyze")
        .insert_header(("content-type", "application/json"))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), texts.len());
    for (prediction, text) in predictions.iter().zip(&texts).step_by(97) {
        assert_eq!(prediction["text"], text.as_str());
        assert_eq!(prediction["dominant_emotion"], expected_label(text));
    }
}

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "product", "is", "great", "terrible",
    "and", "i", "am", "happy", "sad", ".",
];

/// Writes a tiny randomly initialised six-label DistilBERT artifact into `dir`.
fn write_model_dir(dir: &Path) {
    let config = json!({
        "vocab_size": VOCAB.len(),
        "dim": 8,
        "n_layers": 1,
        "n_heads": 2,
        "hidden_dim": 16,
        "activation": "gelu",
        "max_position_embeddings": 512,
        "initializer_range": 0.02,
        "pad_token_id": 0,
        "model_type": "distilbert",
        "id2label": {"0": "sadness", "1": "joy", "2": "love", "3": "anger", "4": "fear", "5": "surprise"}
    });
    fs::write(dir.join("config.json"), config.to_string()).unwrap();
    fs::write(dir.join("vocab.txt"), VOCAB.join("\n")).unwrap();

    let encoder_config: DistilBertConfig = serde_json::from_value(config).unwrap();
    let tokenizer = TokenizerWrapper::from_vocab(&dir.join("vocab.txt"), 128).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    DistilBertClassifier::load(vb, &encoder_config, 8, Some("distilbert"), tokenizer).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();
}

#[actix_rt::test]
async fn test_end_to_end_with_local_model_truncates_long_text() {
    let dir = TempDir::new().unwrap();
    write_model_dir(dir.path());

    let config = ServerConfig {
        model_dir: Some(dir.path().to_path_buf()),
        ..ServerConfig::default()
    };
    let classifier = load_classifier(&config).expect("tiny model should load");
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(classifier)))
            .configure(configure),
    )
    .await;

    // Roughly 600 tokens, well past the 128-token limit.
    let long_text = "the product is great and i am happy . ".repeat(60);
    let texts = vec!["the product is terrible".to_string(), long_text];
    let req = test::TestRequest::post()
        .uri("/analyze")
        .set_json(json!({ "texts": texts }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 2);
    for (prediction, text) in predictions.iter().zip(&texts) {
        assert_valid_prediction(prediction, text);
    }
}

#[actix_rt::test]
async fn test_health_endpoint() {
    let app = test::init_service(
        App::new()
            .app_data(analyzer_data(Arc::new(LengthClassifier)))
            .configure(configure),
    )
    .await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "status": "healthy" }));
}
