use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use kdam::{BarExt, tqdm};
use tokenizers::Tokenizer;

use crate::{
    embedding_db::{EmbeddingDb, cache_key},
    error::{Error, Result},
    model_manager::{default_device, load_tokenizer, resolve_file},
    splitter::Chunk,
};

/// Texts sent through the model in one forward pass.
pub const EMBEDDING_BATCH_SIZE: usize = 32;

/// Truncation length for models that ship no `sentence_bert_config.json`.
pub const MAX_SEQUENCE_LENGTH: usize = 512;

const SENTENCE_BERT_CONFIG: &str = "sentence_bert_config.json";

#[derive(Debug, serde::Deserialize)]
struct SentenceBertConfig {
    max_seq_length: Option<usize>,
}

/// Turns text into dense vectors. Implementations must return one vector
/// per input, in input order, all of the same dimension.
pub trait Embedder {
    /// Identifies the embedding space. Part of the cache key.
    fn model_id(&self) -> &str;

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::Config("embedder returned no vector".into()))
    }
}

struct LoadedBert {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Sentence-transformers style embedder: a BERT encoder followed by mean
/// pooling over the attention mask. Vectors are not normalized.
///
/// The model is not loaded until the first call to
/// [`Embedder::embed_batch`].
pub struct SentenceEmbedder {
    model_id: String,
    loaded: Option<LoadedBert>,
}

impl SentenceEmbedder {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            loaded: None,
        }
    }

    /// Returns `true` if the weights are already in memory.
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn ensure_loaded(&mut self) -> Result<&mut LoadedBert> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => load_bert(&self.model_id)?,
        };
        Ok(self.loaded.insert(loaded))
    }
}

fn load_bert(model_id: &str) -> Result<LoadedBert> {
    tracing::info!(model = model_id, "loading embedding model");

    let config_path = resolve_file(model_id, "config.json")?;
    let weights_path = resolve_file(model_id, "model.safetensors")?;
    let tokenizer_path = resolve_file(model_id, "tokenizer.json")?;

    let config: Config =
        serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
    let max_length = max_sequence_length(model_id)?;
    tracing::debug!(model = model_id, max_length, "embedder truncation");
    let tokenizer = load_tokenizer(&tokenizer_path, true, Some(max_length))?;

    let device = default_device();
    // SAFETY: the weights file is not modified while mapped.
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)?
    };
    let model = BertModel::load(vb, &config)?;

    Ok(LoadedBert {
        model,
        tokenizer,
        device,
    })
}

/// The sentence-transformers `max_seq_length` of `model_id`, or
/// [`MAX_SEQUENCE_LENGTH`] when the model has no such config.
fn max_sequence_length(model_id: &str) -> Result<usize> {
    let path = match resolve_file(model_id, SENTENCE_BERT_CONFIG) {
        Ok(path) => path,
        Err(e @ (Error::NotFound { .. } | Error::Hub(_))) => {
            tracing::debug!(
                model = model_id,
                error = %e,
                "no sentence-transformers config"
            );
            return Ok(MAX_SEQUENCE_LENGTH);
        }
        Err(e) => return Err(e),
    };
    parse_max_seq_length(&std::fs::read_to_string(path)?)
}

fn parse_max_seq_length(json: &str) -> Result<usize> {
    let config: SentenceBertConfig = serde_json::from_str(json)?;
    Ok(config.max_seq_length.unwrap_or(MAX_SEQUENCE_LENGTH))
}

impl LoadedBert {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
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

        // [batch, tokens, hidden]
        let hidden = self.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;

        let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        Ok(pooled.to_vec2::<f32>()?)
    }
}

impl Embedder for SentenceEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let loaded = self.ensure_loaded()?;
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            vectors.extend(loaded.embed(batch)?);
        }
        Ok(vectors)
    }
}

/// Vectors for a set of chunks, aligned with the input order.
#[derive(Debug, Default)]
pub struct EmbeddedChunks {
    pub vectors: Vec<Vec<f32>>,
    /// How many vectors were served from the cache.
    pub cache_hits: usize,
}

/// Embed every chunk, reusing vectors from `cache` where present and
/// storing the freshly computed ones back into it.
///
/// Progress is drawn on stderr when `show_progress` is set.
pub fn embed_chunks<E: Embedder + ?Sized>(
    embedder: &mut E,
    cache: Option<&EmbeddingDb>,
    chunks: &[Chunk],
    show_progress: bool,
) -> Result<EmbeddedChunks> {
    if chunks.is_empty() {
        return Ok(EmbeddedChunks::default());
    }

    let keys: Vec<u64> = chunks
        .iter()
        .map(|c| cache_key(embedder.model_id(), &c.text))
        .collect();

    let mut vectors = match cache {
        Some(db) => db.batch_load(&keys)?,
        None => vec![None; chunks.len()],
    };

    let missing: Vec<usize> = vectors
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_none())
        .map(|(i, _)| i)
        .collect();
    let cache_hits = chunks.len() - missing.len();

    tracing::debug!(total = chunks.len(), cache_hits, "embedding chunks");

    let mut pb = (show_progress && !missing.is_empty())
        .then(|| tqdm!(total = missing.len(), desc = "Embedding"));

    for batch in missing.chunks(EMBEDDING_BATCH_SIZE) {
        let texts: Vec<String> =
            batch.iter().map(|&i| chunks[i].text.clone()).collect();
        let embedded = embedder.embed_batch(&texts)?;
        if embedded.len() != batch.len() {
            return Err(Error::Config(format!(
                "embedder returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }

        if let Some(db) = cache {
            let entries: Vec<(u64, Vec<f32>)> = batch
                .iter()
                .zip(&embedded)
                .map(|(&i, v)| (keys[i], v.clone()))
                .collect();
            db.batch_store(&entries)?;
        }

        for (&i, vector) in batch.iter().zip(embedded) {
            vectors[i] = Some(vector);
        }

        if let Some(pb) = pb.as_mut() {
            pb.update(batch.len())?;
        }
    }

    let vectors = vectors
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| Error::Config("chunk left without a vector".into()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EmbeddedChunks {
        vectors,
        cache_hits,
    })
}
