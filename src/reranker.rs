use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{
    Config,
    XLMRobertaForSequenceClassification,
};
use tokenizers::Tokenizer;

use crate::{
    error::{Error, Result},
    model_manager::{default_device, load_tokenizer, resolve_file},
    vector_store::ScoredChunk,
};

/// Passages kept after reranking unless configured otherwise.
pub const DEFAULT_TOP_N: usize = 3;

/// Pairs scored by the cross-encoder in one forward pass.
pub const RERANK_BATCH_SIZE: usize = 16;

const MAX_SEQUENCE_LENGTH: usize = 512;

/// A passage kept by [`rerank`], with the cross-encoder's relevance score
/// and its position in the retrieval order.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPassage {
    pub text: String,
    pub score: f32,
    pub retrieval_rank: usize,
}

/// Scores `(question, passage)` pairs. Higher means more relevant.
pub trait CrossEncoder {
    fn score(&mut self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

/// Pair the question with every retrieved chunk, in retrieval order.
pub fn pre_rerank(
    docs: &[ScoredChunk],
    question: &str,
) -> Vec<(String, String)> {
    docs.iter()
        .map(|d| (question.to_string(), d.chunk.text.clone()))
        .collect()
}

/// Score every pair and keep the `top_n` best passages, best first.
///
/// Equal scores keep their retrieval order. A `NaN` score ranks below
/// every real score. With no pairs the encoder is never called.
pub fn rerank<C: CrossEncoder + ?Sized>(
    encoder: &mut C,
    pairs: &[(String, String)],
    top_n: usize,
) -> Result<Vec<RankedPassage>> {
    if pairs.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let scores = encoder.score(pairs)?;
    if scores.len() != pairs.len() {
        return Err(Error::Config(format!(
            "cross-encoder returned {} scores for {} pairs",
            scores.len(),
            pairs.len()
        )));
    }

    let mut order: Vec<usize> = (0..pairs.len()).collect();
    order.sort_by(|&a, &b| {
        let (sa, sb) = (scores[a], scores[b]);
        match (sa.is_nan(), sb.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => sb.total_cmp(&sa),
        }
    });

    Ok(order
        .into_iter()
        .take(top_n)
        .map(|i| RankedPassage {
            text: pairs[i].1.clone(),
            score: scores[i],
            retrieval_rank: i,
        })
        .collect())
}

/// Join the ranked passages into the prompt context. Passages are
/// concatenated as-is, with nothing in between.
pub fn build_context(ranked: &[RankedPassage]) -> String {
    ranked.iter().map(|p| p.text.as_str()).collect()
}

struct LoadedReranker {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
}

/// BGE reranker: an XLM-RoBERTa sequence classifier with a single output
/// label. The raw logit is the relevance score.
pub struct BgeReranker {
    model_id: String,
    loaded: Option<LoadedReranker>,
}

impl BgeReranker {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            loaded: None,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut LoadedReranker> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => load_reranker(&self.model_id)?,
        };
        Ok(self.loaded.insert(loaded))
    }
}

fn load_reranker(model_id: &str) -> Result<LoadedReranker> {
    tracing::info!(model = model_id, "loading reranker");

    let config_path = resolve_file(model_id, "config.json")?;
    let weights_path = resolve_file(model_id, "model.safetensors")?;
    let tokenizer_path = resolve_file(model_id, "tokenizer.json")?;

    let config: Config =
        serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
    let tokenizer =
        load_tokenizer(&tokenizer_path, true, Some(MAX_SEQUENCE_LENGTH))?;

    let device = default_device();
    // SAFETY: the weights file is not modified while mapped.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(
            &[weights_path],
            candle_core::DType::F32,
            &device,
        )?
    };
    let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;

    Ok(LoadedReranker {
        model,
        tokenizer,
        device,
    })
}

impl LoadedReranker {
    fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let encodings = self
            .tokenizer
            .encode_batch(pairs.to_vec(), true)
            .map_err(Error::tokenizer)?;

        let mut ids = Vec::with_capacity(encodings.len());
        let mut masks = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            ids.push(Tensor::new(encoding.get_ids(), &self.device)?);
            masks.push(Tensor::new(encoding.get_attention_mask(), &self.device)?);
        }

        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        // [batch, 1]
        let logits =
            self.model
                .forward(&input_ids, &attention_mask, &token_type_ids)?;

        Ok(logits
            .to_dtype(candle_core::DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?)
    }
}

impl CrossEncoder for BgeReranker {
    fn score(&mut self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let loaded = self.ensure_loaded()?;
        let mut scores = Vec::with_capacity(pairs.len());
        for batch in pairs.chunks(RERANK_BATCH_SIZE) {
            scores.extend(loaded.score(batch)?);
        }
        tracing::debug!(pairs = pairs.len(), "scored passages");
        Ok(scores)
    }
}
