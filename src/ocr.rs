//! OCR engines: page raster in, text lines out.
//!
//! The OCR worker only needs `recognize(image_path) -> lines`. The shipped
//! [`VisionOcrEngine`] reads the page with a vision LLM through
//! `edgequake-llm`, so any provider that library supports (OpenAI, Anthropic,
//! Gemini, Ollama, …) can act as the OCR backend.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 2 retries the wait sequence
//! is 500 ms → 1 s. These retries are inside one task attempt; the work
//! queue's own retry policy still applies on top.

use crate::error::{FanoutError, OcrError};
use crate::pipeline::encode::{encode_raster, MAX_VISION_EDGE};
use crate::prompts::{strip_fences, OCR_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Text recognition over a page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise the image at `image_path` and return its text lines.
    async fn recognize(&self, image_path: &Path) -> Result<Vec<String>, OcrError>;

    /// Engine name for logging.
    fn name(&self) -> &str {
        "ocr"
    }
}

/// [`OcrEngine`] backed by a vision LLM.
pub struct VisionOcrEngine {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_backoff_ms: u64,
    max_tokens: usize,
    temperature: f32,
    max_edge: u32,
}

impl std::fmt::Debug for VisionOcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionOcrEngine")
            .field("max_retries", &self.max_retries)
            .field("max_tokens", &self.max_tokens)
            .field("max_edge", &self.max_edge)
            .finish_non_exhaustive()
    }
}

impl VisionOcrEngine {
    /// Wrap an already configured provider.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            max_retries: 2,
            retry_backoff_ms: 500,
            max_tokens: 4096,
            temperature: 0.0,
            max_edge: MAX_VISION_EDGE,
        }
    }

    /// Create a provider by name, or auto-detect one from the environment.
    ///
    /// Resolution order:
    ///
    /// 1. **Named provider + model**: `provider_name` is given, e.g. `"openai"`.
    ///    The provider reads its API key from the environment.
    /// 2. **Environment pair**: `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
    /// 3. **OpenAI key**: `OPENAI_API_KEY` is set.
    /// 4. **Full auto-detection** via [`ProviderFactory::from_env`].
    pub fn from_env(provider_name: Option<&str>, model: Option<&str>) -> Result<Self, FanoutError> {
        let default_model = model.unwrap_or("gpt-4.1-nano");

        if let Some(name) = provider_name {
            return Ok(Self::new(create_vision_provider(name, default_model)?));
        }

        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                return Ok(Self::new(create_vision_provider(&prov, &env_model)?));
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return Ok(Self::new(create_vision_provider("openai", default_model)?));
        }

        let (llm_provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| FanoutError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No vision provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --ocr-provider.\n\
                    Error: {}",
                    e
                ),
            })?;
        Ok(Self::new(llm_provider))
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(256);
        self
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, FanoutError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FanoutError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Split a model response into non-empty text lines.
pub fn response_lines(response: &str) -> Vec<String> {
    strip_fences(response)
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl OcrEngine for VisionOcrEngine {
    async fn recognize(&self, image_path: &Path) -> Result<Vec<String>, OcrError> {
        let path: PathBuf = image_path.to_path_buf();
        let max_edge = self.max_edge;
        let image = tokio::task::spawn_blocking(move || encode_raster(&path, max_edge))
            .await
            .map_err(|e| OcrError::Image {
                path: image_path.to_path_buf(),
                detail: format!("encode task panicked: {e}"),
            })?
            .map_err(|e| OcrError::Image {
                path: image_path.to_path_buf(),
                detail: e.to_string(),
            })?;

        // The empty user text is intentional: the image carries the content.
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = self.options();

        let mut last_err = String::from("Unknown error");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "OCR {}: retry {}/{} after {}ms",
                    image_path.display(),
                    attempt,
                    self.max_retries,
                    backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "OCR {}: {} input tokens, {} output tokens",
                        image_path.display(),
                        response.prompt_tokens,
                        response.completion_tokens
                    );
                    return Ok(response_lines(&response.content));
                }
                Err(e) => {
                    warn!("OCR attempt {} failed: {}", attempt + 1, e);
                    last_err = e.to_string();
                }
            }
        }

        Err(OcrError::Backend {
            attempts: self.max_retries + 1,
            detail: last_err,
        })
    }

    fn name(&self) -> &str {
        "vision-llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_lines_drops_blank_lines_and_fences() {
        let lines = response_lines("```\nInvoice 42\n\n  Total: 10 EUR  \n```");
        assert_eq!(lines, vec!["Invoice 42", "  Total: 10 EUR"]);
    }

    #[test]
    fn empty_response_has_no_lines() {
        assert!(response_lines("   \n").is_empty());
    }
}
