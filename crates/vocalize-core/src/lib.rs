//! # Vocalize Core
//!
//! Resource management and input assembly for neural text-to-speech.
//!
//! ## Features
//!
//! - Model cache with flat, direct-download and legacy snapshot layouts
//! - Resumable, verified model downloads
//! - Voice bank resolution with validated style vectors and explicit fallbacks
//! - Versioned SQLite token cache shared across threads and processes
//! - Original vs quantized model variant selection
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vocalize_core::{
//!     CachePaths, ConfigStore, ModelCacheManager, SynthesisAssembler, SynthesisBackend,
//!     SynthesisParams, SynthesisRequest, TokenCache, Tokenizer, VocalizeResult,
//! };
//!
//! struct Engine;
//! impl SynthesisBackend for Engine {
//!     fn synthesize(&self, request: &SynthesisRequest) -> anyhow::Result<Vec<f32>> {
//!         Ok(vec![0.0; request.token_ids.len() * 300])
//!     }
//! }
//!
//! struct Chars;
//! impl Tokenizer for Chars {
//!     fn tokenize(&self, text: &str) -> VocalizeResult<Vec<i64>> {
//!         Ok(text.chars().map(|c| i64::from(u32::from(c) % 178)).collect())
//!     }
//! }
//!
//! fn main() -> VocalizeResult<()> {
//!     let config = ConfigStore::load_default()?;
//!     let paths = CachePaths::platform_default()?;
//!     let models = ModelCacheManager::new(paths.models_dir());
//!     let tokens = TokenCache::open(paths.token_cache_file(), config.optimizations());
//!
//!     let assembler = SynthesisAssembler::new(models, config.optimizations(), tokens, Arc::new(Engine))
//!         .with_tokenizer(Arc::new(Chars));
//!     let outcome = assembler.synthesize("Hello, world!", &SynthesisParams::new("bella"))?;
//!     println!("{} samples", outcome.samples().map_or(0, <[f32]>::len));
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod model;
pub mod synthesis;
pub mod token_cache;
pub mod voice_bank;
pub mod voice_manager;

// Re-export main types for convenience
pub use config::{CachePaths, ConfigStore, OptimizationState, VocalizeConfig};
pub use error::{VocalizeError, VocalizeResult};
pub use model::{
    format_size, ActiveVariant, CacheLayout, DownloadReport, Fetcher, HttpFetcher,
    ModelCacheManager, ModelDescriptor, ModelRegistry, ModelStatus, VariantKind,
    VariantSelector, VariantStatus,
};
pub use synthesis::{
    AudioData, SynthesisAssembler, SynthesisBackend, SynthesisOutcome, SynthesisParams,
    SynthesisRequest, Tokenizer,
};
pub use token_cache::{TokenCache, TokenCacheStats, CACHE_VERSION};
pub use voice_bank::{validate_style_vector, EmbeddingDefect, StyleVector, VoiceBank, STYLE_DIM};
pub use voice_manager::{resolve_alias, Gender, StyleResolution, VoiceBankResolver, VoiceInfo};

/// Version information for the vocalize-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for audio processing (24 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Maximum text length for synthesis (to prevent memory issues)
pub const MAX_TEXT_LENGTH: usize = 100_000;
