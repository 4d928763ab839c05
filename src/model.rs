use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};
use log::debug;
use ndarray::Array2;

use crate::emotion::NUM_LABELS;
use crate::error::InferenceError;
use crate::tokenizer::{EncodedBatch, TokenizerWrapper};

/// Anything that can score a batch of texts against the emotion labels.
///
/// Implementations are shared read-only across request handlers, so `logits`
/// takes `&self` and must not mutate internal state.
pub trait SequenceClassifier: Send + Sync {
    /// Raw, unnormalized class scores with shape `[texts.len(), NUM_LABELS]`.
    fn logits(&self, texts: &[String]) -> Result<Array2<f32>, InferenceError>;
}

/// `pre_classifier` -> ReLU -> `classifier`, applied to the `[CLS]` hidden state.
#[derive(Debug)]
pub struct ClassificationHead {
    pre_classifier: Linear,
    classifier: Linear,
}

impl ClassificationHead {
    pub fn load(vb: VarBuilder, dim: usize, num_labels: usize) -> candle_core::Result<Self> {
        Ok(Self {
            pre_classifier: candle_nn::linear(dim, dim, vb.pp("pre_classifier"))?,
            classifier: candle_nn::linear(dim, num_labels, vb.pp("classifier"))?,
        })
    }

    pub fn forward(&self, cls_hidden: &Tensor) -> candle_core::Result<Tensor> {
        let pooled = self.pre_classifier.forward(cls_hidden)?.relu()?;
        self.classifier.forward(&pooled)
    }
}

/// DistilBERT encoder plus its sequence-classification head, paired with the
/// tokenizer that produced its vocabulary.
pub struct DistilBertClassifier {
    tokenizer: TokenizerWrapper,
    encoder: DistilBertModel,
    head: ClassificationHead,
    device: Device,
}

impl DistilBertClassifier {
    /// Builds the classifier from `vb`. Encoder weights are read under
    /// `encoder_prefix` (usually `"distilbert"`), head weights from the root.
    pub fn load(
        vb: VarBuilder,
        encoder_config: &DistilBertConfig,
        dim: usize,
        encoder_prefix: Option<&str>,
        tokenizer: TokenizerWrapper,
    ) -> candle_core::Result<Self> {
        let device = vb.device().clone();
        let encoder_vb = match encoder_prefix {
            Some(prefix) => vb.pp(prefix),
            None => vb.clone(),
        };
        let encoder = DistilBertModel::load(encoder_vb, encoder_config)?;
        let head = ClassificationHead::load(vb, dim, NUM_LABELS)?;
        Ok(Self {
            tokenizer,
            encoder,
            head,
            device,
        })
    }

    pub fn max_length(&self) -> usize {
        self.tokenizer.max_length()
    }

    fn forward(&self, batch: &EncodedBatch) -> candle_core::Result<Tensor> {
        let (batch_size, seq_len) = (batch.batch_size(), batch.seq_len());
        let input_ids = Tensor::from_vec(
            batch.input_ids.iter().copied().collect::<Vec<u32>>(),
            (batch_size, seq_len),
            &self.device,
        )?;

        // candle's DistilBERT fills attention scores with -inf where the mask is 1,
        // so padding positions are flagged with 1 here.
        let padding: Vec<u8> = batch
            .attention_mask
            .iter()
            .map(|&m| u8::from(m == 0))
            .collect();
        let padding = Tensor::from_vec(padding, (batch_size, 1, 1, seq_len), &self.device)?;

        let hidden = self.encoder.forward(&input_ids, &padding)?;
        let cls_hidden = hidden.i((.., 0))?;
        self.head.forward(&cls_hidden)
    }
}

impl SequenceClassifier for DistilBertClassifier {
    fn logits(&self, texts: &[String]) -> Result<Array2<f32>, InferenceError> {
        let batch = self.tokenizer.encode_batch(texts)?;
        debug!(
            "Encoded {} texts into {} x {} tokens",
            texts.len(),
            batch.batch_size(),
            batch.seq_len()
        );
        let rows: Vec<Vec<f32>> = self.forward(&batch)?.to_dtype(DType::F32)?.to_vec2()?;

        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        Array2::from_shape_vec((n_rows, n_cols), rows.into_iter().flatten().collect())
            .map_err(|e| InferenceError::Runtime(e.to_string()))
    }
}
