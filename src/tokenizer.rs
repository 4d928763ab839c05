use ndarray::Array2;
use std::path::Path;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::error::{InferenceError, LoadError};

const PAD_TOKEN: &str = "[PAD]";

/// Token ids and attention mask for one padded batch, both `[batch, seq]`.
/// Mask entries are 1 for real tokens and 0 for padding.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub input_ids: Array2<u32>,
    pub attention_mask: Array2<u32>,
}

impl EncodedBatch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// A tokenizer configured for batch classification: padding to the longest
/// sequence in the batch and truncation at `max_length` tokens.
#[derive(Debug)]
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl TokenizerWrapper {
    /// Loads a serialized `tokenizer.json`.
    pub fn from_file(tokenizer_path: &Path, max_length: usize) -> Result<Self, LoadError> {
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            LoadError::Tokenizer(format!("failed to load {:?}: {}", tokenizer_path, e))
        })?;
        Self::configure(tokenizer, max_length)
    }

    /// Builds an uncased BERT WordPiece pipeline from a `vocab.txt`.
    pub fn from_vocab(vocab_path: &Path, max_length: usize) -> Result<Self, LoadError> {
        let wordpiece = WordPiece::from_file(&vocab_path.to_string_lossy())
            .unk_token("[UNK]".to_string())
            .build()
            .map_err(|e| LoadError::Tokenizer(format!("failed to build WordPiece from {:?}: {}", vocab_path, e)))?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        tokenizer.with_normalizer(Some(BertNormalizer::default()));
        tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));

        let special = |token: &str| {
            tokenizer
                .token_to_id(token)
                .map(|id| (token.to_string(), id))
                .ok_or_else(|| LoadError::Tokenizer(format!("vocabulary has no {} token", token)))
        };
        let sep = special("[SEP]")?;
        let cls = special("[CLS]")?;
        tokenizer.with_post_processor(Some(BertProcessing::new(sep, cls)));

        Self::configure(tokenizer, max_length)
    }

    fn configure(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self, LoadError> {
        let pad_id = tokenizer.token_to_id(PAD_TOKEN).unwrap_or(0);
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id,
            pad_token: PAD_TOKEN.to_string(),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| LoadError::Tokenizer(format!("invalid truncation settings: {}", e)))?;

        Ok(Self { tokenizer, max_length })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn get_vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Encodes `texts` as one batch with special tokens added.
    pub fn encode_batch(&self, texts: &[String]) -> Result<EncodedBatch, InferenceError> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| InferenceError::Tokenization(e.to_string()))?;

        let batch = encodings.len();
        let seq = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let mut ids = Vec::with_capacity(batch * seq);
        let mut mask = Vec::with_capacity(batch * seq);
        for encoding in &encodings {
            if encoding.get_ids().len() != seq {
                return Err(InferenceError::Tokenization(format!(
                    "padded batch has uneven lengths ({} vs {})",
                    encoding.get_ids().len(),
                    seq
                )));
            }
            ids.extend_from_slice(encoding.get_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let shape_err = |e: ndarray::ShapeError| InferenceError::Tokenization(e.to_string());
        Ok(EncodedBatch {
            input_ids: Array2::from_shape_vec((batch, seq), ids).map_err(shape_err)?,
            attention_mask: Array2::from_shape_vec((batch, seq), mask).map_err(shape_err)?,
        })
    }
}
