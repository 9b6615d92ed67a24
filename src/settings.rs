//! Runtime settings for the question-answering pipeline.
//!
//! Each value is resolved from, in increasing priority: the built-in
//! default, `config.redb`, a `DOCQA_*` environment variable, and finally
//! an explicit command-line flag.

use std::{fmt, str::FromStr};

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
};

pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL: &str = "BAAI/bge-reranker-large";
pub const DEFAULT_LOCAL_LLM_MODEL: &str = "TheBloke/Llama-2-13B-chat-GGUF";
pub const DEFAULT_REMOTE_LLM_MODEL: &str = "meta-llama/Llama-2-13b-chat-hf";
pub const DEFAULT_LLM_TOKENIZER: &str = "meta-llama/Llama-2-13b-chat-hf";
pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_LANGUAGE: &str = "French";

/// Every key accepted by `docqa config set`.
pub const KEYS: &[&str] = &[
    "embedding_model",
    "reranker_model",
    "llm_model",
    "llm_tokenizer",
    "llm_base_url",
    "backend",
    "quantization",
    "language",
    "chunk_size",
    "chunk_overlap",
    "retrieve_k",
    "rerank_top_n",
    "temperature",
    "max_new_tokens",
    "repetition_penalty",
    "seed",
];

const ENV_VARS: &[(&str, &str)] = &[
    ("embedding_model", "DOCQA_EMBEDDING_MODEL"),
    ("reranker_model", "DOCQA_RERANKER_MODEL"),
    ("llm_model", "DOCQA_LLM_MODEL"),
    ("llm_base_url", "DOCQA_LLM_BASE_URL"),
    ("backend", "DOCQA_BACKEND"),
    ("language", "DOCQA_LANGUAGE"),
];

/// Which text generator answers the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// Quantized Llama weights run in-process with candle
    #[default]
    Local,
    /// Any server speaking the OpenAI chat-completions protocol
    Openai,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" => Ok(Self::Openai),
            other => Err(Error::Config(format!(
                "unknown backend '{other}' (expected 'local' or 'openai')"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Openai => "openai",
        })
    }
}

/// GGUF quantization level of the local model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantization {
    Q4_0,
    #[default]
    Q4KM,
    Q5KM,
    Q8_0,
}

impl Quantization {
    /// Suffix used in GGUF file names, e.g. `Q4_K_M`.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Q4_0 => "Q4_0",
            Self::Q4KM => "Q4_K_M",
            Self::Q5KM => "Q5_K_M",
            Self::Q8_0 => "Q8_0",
        }
    }
}

impl FromStr for Quantization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "Q4_0" => Ok(Self::Q4_0),
            "Q4_K_M" | "Q4KM" => Ok(Self::Q4KM),
            "Q5_K_M" | "Q5KM" => Ok(Self::Q5KM),
            "Q8_0" => Ok(Self::Q8_0),
            _ => Err(Error::Config(format!(
                "unknown quantization '{s}' (expected Q4_0, Q4_K_M, Q5_K_M or Q8_0)"
            ))),
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_suffix())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub embedding_model: String,
    pub reranker_model: String,
    /// `None` means the backend's default model.
    pub llm_model: Option<String>,
    pub llm_tokenizer: String,
    pub llm_base_url: String,
    pub backend: Backend,
    pub quantization: Quantization,
    /// Language the answer is requested in.
    pub language: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Candidates fetched from the vector store before reranking.
    pub retrieve_k: usize,
    /// Passages kept after reranking.
    pub rerank_top_n: usize,
    pub temperature: f64,
    pub max_new_tokens: usize,
    pub repetition_penalty: f32,
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            reranker_model: DEFAULT_RERANKER_MODEL.to_string(),
            llm_model: None,
            llm_tokenizer: DEFAULT_LLM_TOKENIZER.to_string(),
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            backend: Backend::default(),
            quantization: Quantization::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            chunk_size: 1000,
            chunk_overlap: 0,
            retrieve_k: 25,
            rerank_top_n: 3,
            temperature: 0.01,
            max_new_tokens: 512,
            repetition_penalty: 1.1,
            seed: 299792458,
        }
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("invalid value for {key}: '{value}'"))
    })
}

impl Settings {
    /// Resolve settings from defaults, `config.redb`, the environment and
    /// explicit overrides (highest priority), then validate the result.
    pub fn resolve(
        config_db: Option<&ConfigDb>,
        overrides: &[(&str, String)],
    ) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(db) = config_db {
            for (key, value) in db.list_settings()? {
                settings.apply(&key, &value)?;
            }
        }

        for (key, var) in ENV_VARS {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                settings.apply(key, &value)?;
            }
        }

        for (key, value) in overrides {
            settings.apply(key, value)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Set one field from its string form.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "embedding_model" => self.embedding_model = value.to_string(),
            "reranker_model" => self.reranker_model = value.to_string(),
            "llm_model" => self.llm_model = Some(value.to_string()),
            "llm_tokenizer" => self.llm_tokenizer = value.to_string(),
            "llm_base_url" => self.llm_base_url = value.to_string(),
            "backend" => self.backend = value.parse()?,
            "quantization" => self.quantization = value.parse()?,
            "language" => self.language = value.to_string(),
            "chunk_size" => self.chunk_size = parse_num(key, value)?,
            "chunk_overlap" => self.chunk_overlap = parse_num(key, value)?,
            "retrieve_k" => self.retrieve_k = parse_num(key, value)?,
            "rerank_top_n" => self.rerank_top_n = parse_num(key, value)?,
            "temperature" => self.temperature = parse_num(key, value)?,
            "max_new_tokens" => self.max_new_tokens = parse_num(key, value)?,
            "repetition_penalty" => {
                self.repetition_penalty = parse_num(key, value)?
            }
            "seed" => self.seed = parse_num(key, value)?,
            other => {
                return Err(Error::Config(format!(
                    "unknown setting '{other}' (known: {})",
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap > self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.temperature < 0.0 {
            return Err(Error::Config(
                "temperature must not be negative".into(),
            ));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(Error::Config(
                "repetition_penalty must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The LLM to load, falling back to the backend's default.
    pub fn llm_model(&self) -> &str {
        match (&self.llm_model, self.backend) {
            (Some(model), _) => model,
            (None, Backend::Local) => DEFAULT_LOCAL_LLM_MODEL,
            (None, Backend::Openai) => DEFAULT_REMOTE_LLM_MODEL,
        }
    }

    /// Every resolved setting as `(key, value)` pairs, in [`KEYS`] order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("embedding_model", self.embedding_model.clone()),
            ("reranker_model", self.reranker_model.clone()),
            ("llm_model", self.llm_model().to_string()),
            ("llm_tokenizer", self.llm_tokenizer.clone()),
            ("llm_base_url", self.llm_base_url.clone()),
            ("backend", self.backend.to_string()),
            ("quantization", self.quantization.to_string()),
            ("language", self.language.clone()),
            ("chunk_size", self.chunk_size.to_string()),
            ("chunk_overlap", self.chunk_overlap.to_string()),
            ("retrieve_k", self.retrieve_k.to_string()),
            ("rerank_top_n", self.rerank_top_n.to_string()),
            ("temperature", self.temperature.to_string()),
            ("max_new_tokens", self.max_new_tokens.to_string()),
            ("repetition_penalty", self.repetition_penalty.to_string()),
            ("seed", self.seed.to_string()),
        ]
    }
}
