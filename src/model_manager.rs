//! Shared plumbing for the models: device selection, locating weight files
//! on disk or on the HuggingFace Hub, and tokenizer loading.

use std::path::{Path, PathBuf};

use candle_core::Device;
use hf_hub::api::sync::{Api, ApiBuilder};
use tokenizers::{
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};

use crate::error::{Error, Result};

/// Environment variable holding the HuggingFace access token, needed for
/// gated repositories such as the Llama 2 tokenizer.
pub const HF_TOKEN_ENV_VAR: &str = "HF_AUTH";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
pub fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn hub_api() -> Result<Api> {
    let token = std::env::var(HF_TOKEN_ENV_VAR)
        .ok()
        .filter(|t| !t.is_empty());
    Ok(ApiBuilder::new().with_token(token).build()?)
}

/// Locate `file` for `model_id`.
///
/// A model ID naming an existing local directory is read from disk;
/// anything else is treated as a Hub repository and downloaded into the
/// Hub cache on first use.
pub fn resolve_file(model_id: &str, file: &str) -> Result<PathBuf> {
    let local = Path::new(model_id);
    if local.is_dir() {
        let path = local.join(file);
        if path.is_file() {
            return Ok(path);
        }
        return Err(Error::NotFound {
            kind: "model file",
            name: path.display().to_string(),
        });
    }

    tracing::debug!(model = model_id, file, "fetching from the Hub");
    Ok(hub_api()?.model(model_id.to_string()).get(file)?)
}

/// Load a `tokenizer.json`, optionally padding batches to their longest
/// member and truncating to `max_length` tokens.
pub fn load_tokenizer(
    path: &Path,
    batch_padding: bool,
    max_length: Option<usize>,
) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path).map_err(Error::tokenizer)?;

    if batch_padding {
        // Keep the pad token declared by tokenizer.json, if any.
        let mut padding: PaddingParams =
            tokenizer.get_padding().cloned().unwrap_or_default();
        padding.strategy = PaddingStrategy::BatchLongest;
        tokenizer.with_padding(Some(padding));
    }

    if let Some(max_length) = max_length {
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(Error::tokenizer)?;
    }

    Ok(tokenizer)
}
