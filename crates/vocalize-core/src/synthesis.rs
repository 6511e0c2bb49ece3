//! Synthesis input assembly.
//!
//! Turns `(text, voice, speed, model)` into the exact inputs of the neural
//! inference call: framed token ids, a validated style vector, the speed,
//! and the path and id of the active model variant. Steps run strictly in
//! order: model availability, tokenization, style resolution, dispatch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::OptimizationState;
use crate::error::{VocalizeError, VocalizeResult};
use crate::model::{ModelCacheManager, VariantSelector};
use crate::token_cache::{Token, TokenCache};
use crate::voice_bank::StyleVector;
use crate::voice_manager::{StyleResolution, VoiceBankResolver};

/// Audio data type - 32-bit floating point samples in `[-1.0, 1.0]`
pub type AudioData = Vec<f32>;

/// Maximum number of token ids passed to the model, padding included
pub const MAX_TOKENS: usize = 512;

/// Padding id placed at both ends of the token sequence
pub const PAD_TOKEN: Token = 0;

/// Text to token ids
#[cfg_attr(test, mockall::automock)]
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text`
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be tokenized.
    fn tokenize(&self, text: &str) -> VocalizeResult<Vec<Token>>;
}

/// The neural inference call
#[cfg_attr(test, mockall::automock)]
pub trait SynthesisBackend: Send + Sync {
    /// Produce audio samples for one request
    ///
    /// # Errors
    ///
    /// Any error is reported to the caller as an empty result.
    fn synthesize(&self, request: &SynthesisRequest) -> anyhow::Result<AudioData>;
}

/// Inputs handed to [`SynthesisBackend::synthesize`]
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Framed token ids, at most [`MAX_TOKENS`]
    pub token_ids: Vec<Token>,
    /// 256-value style embedding
    pub style_vector: StyleVector,
    /// Speed multiplier
    pub speed: f32,
    /// Active variant id, e.g. `kokoro-int8`
    pub model_variant_id: String,
    /// Path of the active model file
    pub model_path: String,
}

/// TTS synthesis parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    /// Voice name or bank key
    pub voice: String,
    /// Speed multiplier (0.1 to 3.0)
    pub speed: f32,
    /// Pitch adjustment (-1.0 to 1.0)
    pub pitch: f32,
    /// Model to synthesize with
    pub model_id: String,
}

impl SynthesisParams {
    /// Parameters for `voice` at normal speed and pitch on the default model
    #[must_use]
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            speed: 1.0,
            pitch: 0.0,
            model_id: "kokoro".to_string(),
        }
    }

    /// Set speed multiplier
    ///
    /// # Errors
    ///
    /// Returns an error if speed is not in valid range (0.1 to 3.0)
    pub fn with_speed(mut self, speed: f32) -> VocalizeResult<Self> {
        if !(0.1..=3.0).contains(&speed) {
            return Err(VocalizeError::invalid_input(format!(
                "Speed must be between 0.1 and 3.0, got {speed}"
            )));
        }
        self.speed = speed;
        Ok(self)
    }

    /// Set pitch adjustment
    ///
    /// # Errors
    ///
    /// Returns an error if pitch is not in valid range (-1.0 to 1.0)
    pub fn with_pitch(mut self, pitch: f32) -> VocalizeResult<Self> {
        if !(-1.0..=1.0).contains(&pitch) {
            return Err(VocalizeError::invalid_input(format!(
                "Pitch must be between -1.0 and 1.0, got {pitch}"
            )));
        }
        self.pitch = pitch;
        Ok(self)
    }

    /// Synthesize with another model
    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Validate synthesis parameters
    ///
    /// # Errors
    ///
    /// Returns an error for an empty voice or model, or out-of-range speed
    /// or pitch.
    pub fn validate(&self) -> VocalizeResult<()> {
        if self.voice.trim().is_empty() {
            return Err(VocalizeError::invalid_input("Voice cannot be empty"));
        }

        if self.model_id.is_empty() {
            return Err(VocalizeError::invalid_input("Model id cannot be empty"));
        }

        if !(0.1..=3.0).contains(&self.speed) {
            return Err(VocalizeError::invalid_input(format!(
                "Speed must be between 0.1 and 3.0, got {}",
                self.speed
            )));
        }

        if !(-1.0..=1.0).contains(&self.pitch) {
            return Err(VocalizeError::invalid_input(format!(
                "Pitch must be between -1.0 and 1.0, got {}",
                self.pitch
            )));
        }

        Ok(())
    }
}

/// Pad with [`PAD_TOKEN`] at both ends, truncating to [`MAX_TOKENS`]
#[must_use]
pub fn frame_tokens(tokens: &[Token]) -> Vec<Token> {
    let body = &tokens[..tokens.len().min(MAX_TOKENS - 2)];
    let mut framed = Vec::with_capacity(body.len() + 2);
    framed.push(PAD_TOKEN);
    framed.extend_from_slice(body);
    framed.push(PAD_TOKEN);
    framed
}

/// A request ready for dispatch, with how its parts were obtained
#[derive(Debug, Clone)]
pub struct PreparedSynthesis {
    /// Backend inputs
    pub request: SynthesisRequest,
    /// How the style vector was resolved
    pub style: StyleResolution,
    /// Whether the tokens came from the token cache
    pub tokens_from_cache: bool,
}

/// Result of [`SynthesisAssembler::synthesize`]
#[derive(Debug, Clone)]
pub enum SynthesisOutcome {
    /// The backend produced audio
    Audio {
        /// Samples in `[-1.0, 1.0]`
        samples: AudioData,
        /// How the style vector was resolved
        style: StyleResolution,
        /// Whether the tokens came from the token cache
        tokens_from_cache: bool,
    },
    /// The backend failed; no retry was attempted
    Empty {
        /// Always [`VocalizeError::AssemblyFailed`]
        error: VocalizeError,
    },
}

impl SynthesisOutcome {
    /// Samples, or `None` for an empty result
    #[must_use]
    pub fn samples(&self) -> Option<&[f32]> {
        match self {
            Self::Audio { samples, .. } => Some(samples),
            Self::Empty { .. } => None,
        }
    }

    /// Whether the backend failed
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }
}

/// Composes the model cache, token cache and voice resolver into backend
/// requests
#[derive(Clone)]
pub struct SynthesisAssembler {
    models: ModelCacheManager,
    variants: VariantSelector,
    voices: Arc<VoiceBankResolver>,
    tokens: TokenCache,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    backend: Arc<dyn SynthesisBackend>,
}

impl std::fmt::Debug for SynthesisAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisAssembler")
            .field("models", &self.models)
            .field("variants", &self.variants)
            .field("voices", &self.voices)
            .field("tokens", &self.tokens)
            .field("has_tokenizer", &self.tokenizer.is_some())
            .finish_non_exhaustive()
    }
}

impl SynthesisAssembler {
    /// Assembler with no tokenizer; every token-cache miss fails with
    /// [`VocalizeError::TokenizerUnavailable`] until one is attached
    #[must_use]
    pub fn new(
        models: ModelCacheManager,
        optimizations: OptimizationState,
        tokens: TokenCache,
        backend: Arc<dyn SynthesisBackend>,
    ) -> Self {
        Self {
            variants: VariantSelector::new(models.clone(), optimizations),
            voices: Arc::new(VoiceBankResolver::new(models.clone())),
            models,
            tokens,
            tokenizer: None,
            backend,
        }
    }

    /// Attach the tokenizer capability
    #[must_use]
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Share an existing voice resolver
    #[must_use]
    pub fn with_voices(mut self, voices: Arc<VoiceBankResolver>) -> Self {
        self.voices = voices;
        self
    }

    /// Whether a tokenizer is attached
    #[must_use]
    pub fn has_tokenizer(&self) -> bool {
        self.tokenizer.is_some()
    }

    /// The token cache in use
    #[must_use]
    pub const fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    /// The voice resolver in use
    #[must_use]
    pub fn voices(&self) -> &VoiceBankResolver {
        &self.voices
    }

    fn tokens_for(&self, text: &str) -> VocalizeResult<(Vec<Token>, bool)> {
        if let Some(tokens) = self.tokens.get(text) {
            debug!("Token cache hit for {} chars", text.len());
            return Ok((tokens, true));
        }

        let tokenizer = self.tokenizer.as_ref().ok_or_else(|| {
            VocalizeError::tokenizer_unavailable("No tokenizer configured and text is not cached")
        })?;
        let tokens = tokenizer.tokenize(text)?;

        if let Err(e) = self.tokens.put(text, &tokens) {
            warn!("Failed to cache tokens: {}", e);
        }
        Ok((tokens, false))
    }

    /// Build the backend request without dispatching it.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid input, a model that is unavailable and
    /// could not be obtained, a missing tokenizer on a cache miss, or a
    /// missing voice bank.
    pub fn prepare(&self, text: &str, params: &SynthesisParams) -> VocalizeResult<PreparedSynthesis> {
        params.validate()?;
        if text.trim().is_empty() {
            return Err(VocalizeError::invalid_input("Text cannot be empty"));
        }
        if text.len() > crate::MAX_TEXT_LENGTH {
            return Err(VocalizeError::invalid_input(format!(
                "Text too long: {} characters (max: {})",
                text.len(),
                crate::MAX_TEXT_LENGTH
            )));
        }

        self.models.try_ensure_available(&params.model_id)?;

        let (tokens, tokens_from_cache) = self.tokens_for(text)?;

        let style = self.voices.get_style_vector(&params.model_id, &params.voice)?;
        if style.is_placeholder() {
            warn!("Synthesizing '{}' with a placeholder style vector", params.voice);
        }

        let variant = self.variants.active_variant(&params.model_id)?;

        Ok(PreparedSynthesis {
            request: SynthesisRequest {
                token_ids: frame_tokens(&tokens),
                style_vector: style.vector().to_vec(),
                speed: params.speed,
                model_variant_id: variant.variant_id,
                model_path: variant.path.display().to_string(),
            },
            style,
            tokens_from_cache,
        })
    }

    /// Assemble inputs and call the backend once.
    ///
    /// A backend failure becomes [`SynthesisOutcome::Empty`]. Blocks on
    /// downloads and file loads; from async code use
    /// [`Self::synthesize_async`].
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::prepare`].
    pub fn synthesize(&self, text: &str, params: &SynthesisParams) -> VocalizeResult<SynthesisOutcome> {
        let prepared = self.prepare(text, params)?;
        info!(
            "Synthesizing {} tokens with {} ({})",
            prepared.request.token_ids.len(),
            prepared.style.voice_id().unwrap_or("placeholder"),
            prepared.request.model_variant_id
        );

        match self.backend.synthesize(&prepared.request) {
            Ok(samples) => Ok(SynthesisOutcome::Audio {
                samples,
                style: prepared.style,
                tokens_from_cache: prepared.tokens_from_cache,
            }),
            Err(e) => {
                warn!("Synthesis call failed: {:#}", e);
                Ok(SynthesisOutcome::Empty {
                    error: VocalizeError::assembly_failed(format!("{e:#}")),
                })
            }
        }
    }

    /// [`Self::synthesize`] on the blocking pool
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::synthesize`], or a concurrency
    /// error if the blocking task panics.
    pub async fn synthesize_async(
        &self,
        text: String,
        params: SynthesisParams,
    ) -> VocalizeResult<SynthesisOutcome> {
        let assembler = self.clone();
        tokio::task::spawn_blocking(move || assembler.synthesize(&text, &params)).await?
    }
}
