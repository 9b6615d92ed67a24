use std::{fmt, path::PathBuf, time::Duration};

use candle_core::{Device, Tensor, quantized::gguf_file};
use candle_transformers::{
    generation::LogitsProcessor,
    models::quantized_llama::ModelWeights,
    utils::apply_repeat_penalty,
};
use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::{
    error::{Error, Result},
    model_manager::{default_device, load_tokenizer, resolve_file},
    settings::{Backend, Quantization, Settings},
};

/// Environment variable holding the bearer token for
/// [`OpenAiCompatible`] servers that require one.
pub const API_KEY_ENV_VAR: &str = "DOCQA_API_KEY";

/// Tokens of history the repetition penalty looks at.
pub const DEFAULT_REPEAT_LAST_N: usize = 64;

/// Context window of the Llama 2 chat models.
const CONTEXT_LENGTH: usize = 4096;

const EOS_TOKEN: &str = "</s>";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Produces an answer for a fully rendered prompt.
pub trait Generator {
    /// Human-readable name of the backend and model, for logs and
    /// `status` output.
    fn describe(&self) -> String;

    /// Return only the newly generated text, without the prompt.
    fn generate(&mut self, prompt: &str) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature; `0` means greedy decoding.
    pub temperature: f64,
    pub max_new_tokens: usize,
    pub repetition_penalty: f32,
    pub repeat_last_n: usize,
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for GenerationParams {
    fn from(settings: &Settings) -> Self {
        Self {
            temperature: settings.temperature,
            max_new_tokens: settings.max_new_tokens,
            repetition_penalty: settings.repetition_penalty,
            repeat_last_n: DEFAULT_REPEAT_LAST_N,
            seed: settings.seed,
        }
    }
}

/// Build the generator selected by `settings.backend`. Nothing is loaded
/// or contacted until the first [`Generator::generate`] call.
pub fn from_settings(settings: &Settings) -> Result<Box<dyn Generator>> {
    let params = GenerationParams::from(settings);
    Ok(match settings.backend {
        Backend::Local => Box::new(LocalLlama::new(
            settings.llm_model(),
            &settings.llm_tokenizer,
            settings.quantization,
            params,
        )),
        Backend::Openai => Box::new(OpenAiCompatible::new(
            &settings.llm_base_url,
            settings.llm_model(),
            std::env::var(API_KEY_ENV_VAR).ok().filter(|k| !k.is_empty()),
            params,
        )?),
    })
}

/// GGUF file name for a quantized Llama 2 chat repository, e.g.
/// `llama-2-13b-chat.Q4_K_M.gguf` for `TheBloke/Llama-2-13B-chat-GGUF`.
pub fn gguf_file_name(model_id: &str, quantization: Quantization) -> String {
    let repo = model_id.rsplit('/').next().unwrap_or(model_id);
    let base = repo
        .strip_suffix("-GGUF")
        .or_else(|| repo.strip_suffix("-gguf"))
        .unwrap_or(repo)
        .to_lowercase();
    format!("{base}.{}.gguf", quantization.file_suffix())
}

/// Keep the tail of the prompt so that it plus `max_new_tokens` fits the
/// context window. At least one prompt token is always kept.
fn fit_prompt(tokens: &[u32], max_new_tokens: usize) -> &[u32] {
    let budget = CONTEXT_LENGTH.saturating_sub(max_new_tokens).max(1);
    if tokens.len() > budget {
        &tokens[tokens.len() - budget..]
    } else {
        tokens
    }
}

struct LoadedLlama {
    model: ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos: Option<u32>,
}

/// Quantized Llama 2 chat model run in-process.
pub struct LocalLlama {
    model_id: String,
    tokenizer_id: String,
    quantization: Quantization,
    params: GenerationParams,
    loaded: Option<LoadedLlama>,
}

impl LocalLlama {
    pub fn new(
        model_id: &str,
        tokenizer_id: &str,
        quantization: Quantization,
        params: GenerationParams,
    ) -> Self {
        Self {
            model_id: model_id.to_string(),
            tokenizer_id: tokenizer_id.to_string(),
            quantization,
            params,
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn weights_path(&self) -> Result<PathBuf> {
        // A path straight to a .gguf file is used as-is.
        let direct = PathBuf::from(&self.model_id);
        if direct.is_file() {
            return Ok(direct);
        }
        resolve_file(
            &self.model_id,
            &gguf_file_name(&self.model_id, self.quantization),
        )
    }

    fn ensure_loaded(&mut self) -> Result<&mut LoadedLlama> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => self.load()?,
        };
        Ok(self.loaded.insert(loaded))
    }

    fn load(&self) -> Result<LoadedLlama> {
        tracing::info!(
            model = %self.model_id,
            quantization = %self.quantization,
            "loading language model"
        );

        let weights_path = self.weights_path()?;
        let tokenizer_path = resolve_file(&self.tokenizer_id, "tokenizer.json")?;
        let tokenizer = load_tokenizer(&tokenizer_path, false, None)?;

        let device = default_device();
        let mut file = std::fs::File::open(&weights_path)?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| e.with_path(&weights_path))?;
        let model = ModelWeights::from_gguf(content, &mut file, &device)?;

        let eos = tokenizer.token_to_id(EOS_TOKEN);
        Ok(LoadedLlama {
            model,
            tokenizer,
            device,
            eos,
        })
    }
}

impl LoadedLlama {
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::tokenizer)?;
        let prompt_tokens = encoding.get_ids();
        let fitted = fit_prompt(prompt_tokens, params.max_new_tokens);
        if fitted.len() < prompt_tokens.len() {
            tracing::warn!(
                dropped = prompt_tokens.len() - fitted.len(),
                "prompt longer than the context window, truncated from the left"
            );
        }

        let temperature = (params.temperature > 0.0).then_some(params.temperature);
        let mut sampler = LogitsProcessor::new(params.seed, temperature, None);

        let mut tokens: Vec<u32> = fitted.to_vec();
        let mut generated: Vec<u32> = Vec::new();

        // The first pass feeds the whole prompt and resets the KV cache.
        let mut input: Vec<u32> = fitted.to_vec();
        let mut index_pos = 0;

        for _ in 0..params.max_new_tokens {
            let x = Tensor::new(input.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&x, index_pos)?.squeeze(0)?;
            let logits = if params.repetition_penalty == 1.0 {
                logits
            } else {
                let start = tokens.len().saturating_sub(params.repeat_last_n);
                apply_repeat_penalty(
                    &logits,
                    params.repetition_penalty,
                    &tokens[start..],
                )?
            };

            index_pos += input.len();
            let next = sampler.sample(&logits)?;
            if Some(next) == self.eos {
                break;
            }

            tokens.push(next);
            generated.push(next);
            input = vec![next];
        }

        tracing::debug!(
            prompt_tokens = fitted.len(),
            generated_tokens = generated.len(),
            "generation finished"
        );

        self.tokenizer
            .decode(&generated, true)
            .map_err(Error::tokenizer)
    }
}

impl Generator for LocalLlama {
    fn describe(&self) -> String {
        format!("local {} ({})", self.model_id, self.quantization)
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        let params = self.params.clone();
        let loaded = self.ensure_loaded()?;
        Ok(loaded.generate(prompt, &params)?.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any server exposing the OpenAI chat-completions endpoint:
/// llama.cpp server, vLLM, Ollama and the like.
pub struct OpenAiCompatible {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    params: GenerationParams,
}

impl fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatible {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        params: GenerationParams,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            params,
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_request(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_new_tokens,
            "seed": self.params.seed,
            "stream": false,
        })
    }
}

fn parse_response(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        Error::Generation("server returned no choices".to_string())
    })?;
    Ok(choice.message.content.unwrap_or_default().trim().to_string())
}

impl Generator for OpenAiCompatible {
    fn describe(&self) -> String {
        format!("{} at {}", self.model, self.base_url)
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        let url = self.chat_completions_url();
        tracing::debug!(%url, model = %self.model, "requesting completion");

        let mut request = self.client.post(&url).json(&self.build_request(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(Error::Generation(format!(
                "{url} returned {status}: {}",
                body.trim()
            )));
        }

        parse_response(&body)
    }
}
