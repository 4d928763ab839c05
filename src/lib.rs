//! Product Feedback Emotion Analysis API.
//!
//! A pretrained DistilBERT emotion classifier served over HTTP: `POST /analyze`
//! returns a probability for each of six emotions per input text, plus the
//! dominant one.

pub mod config;
pub mod emotion;
pub mod error;
pub mod loader;
pub mod model;
pub mod server;
pub mod tokenizer;
pub mod types;
