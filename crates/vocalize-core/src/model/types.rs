// Model registry types for TTS models

use serde::{Deserialize, Serialize};

/// Repository id used for models fetched from fixed URLs
pub const DIRECT_DOWNLOAD_REPO: &str = "direct_download";

/// Where a model's files come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModelSource {
    /// Hub-style repository, one request per file
    Registry {
        /// Repository id, e.g. `facebook/chatterbox-en`
        repo_id: String,
        /// Branch or commit to resolve files against
        revision: String,
    },
    /// Fixed URL per required file
    DirectUrls {
        /// `(filename, url)` pairs
        urls: Vec<(String, String)>,
    },
}

impl ModelSource {
    /// Directory component used under the model cache root
    #[must_use]
    pub fn cache_dir_name(&self) -> String {
        match self {
            Self::Registry { repo_id, .. } => format!("models--{}", repo_id.replace('/', "--")),
            Self::DirectUrls { .. } => format!("models--{DIRECT_DOWNLOAD_REPO}"),
        }
    }

    /// Whether the files are fetched from fixed URLs
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        matches!(self, Self::DirectUrls { .. })
    }
}

/// On-disk build of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    /// Full precision export
    Original,
    /// INT8 quantized export
    Quantized,
}

impl VariantKind {
    /// Short name used in status output
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Quantized => "int8",
        }
    }
}

/// Quantized build that can be fetched on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedVariant {
    /// File name inside the model's local directory
    pub filename: String,
    /// Download location of the pre-quantized file
    pub url: String,
}

/// Static description of a model in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry key, e.g. `kokoro`
    pub id: String,
    /// Human-readable model name
    pub display_name: String,
    /// Download source
    pub source: ModelSource,
    /// Files that must all be present for the model to count as cached
    pub required_files: Vec<String>,
    /// Optional SHA-256 digests, checked after download when present
    #[serde(default)]
    pub checksums: Vec<(String, String)>,
    /// Approximate download size in megabytes
    pub approximate_size_mb: u64,
    /// Model description
    pub description: String,
    /// Audio sample rate
    pub sample_rate: u32,
    /// Archive holding voice embeddings, if the model ships one
    pub voice_bank: Option<String>,
    /// Pre-quantized build, if one is published
    pub quantized: Option<QuantizedVariant>,
}

impl ModelDescriptor {
    /// Kokoro TTS (default) - direct download of the v1.0 ONNX export
    #[must_use]
    pub fn kokoro() -> Self {
        let release = "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0";
        Self {
            id: "kokoro".to_string(),
            display_name: "Kokoro TTS".to_string(),
            source: ModelSource::DirectUrls {
                urls: vec![
                    (
                        "kokoro-v1.0.onnx".to_string(),
                        format!("{release}/kokoro-v1.0.onnx"),
                    ),
                    (
                        "voices-v1.0.bin".to_string(),
                        format!("{release}/voices-v1.0.bin"),
                    ),
                ],
            },
            required_files: vec![
                "kokoro-v1.0.onnx".to_string(),
                "voices-v1.0.bin".to_string(),
            ],
            checksums: Vec::new(),
            approximate_size_mb: 410, // Combined model + voices size
            description: "Optimized neural TTS model (82M parameters)".to_string(),
            sample_rate: 24000,
            voice_bank: Some("voices-v1.0.bin".to_string()),
            quantized: Some(QuantizedVariant {
                filename: "kokoro-v1.0-int8.onnx".to_string(),
                url: "https://github.com/taylorchu/kokoro-onnx/releases/download/v0.2.0/kokoro-quant-convinteger.onnx".to_string(),
            }),
        }
    }

    /// Get Chatterbox model info (premium)
    #[must_use]
    pub fn chatterbox() -> Self {
        Self {
            id: "chatterbox".to_string(),
            display_name: "Chatterbox TTS".to_string(),
            source: ModelSource::Registry {
                repo_id: "facebook/chatterbox-en".to_string(),
                revision: "main".to_string(),
            },
            required_files: vec!["model.onnx".to_string(), "tokenizer.json".to_string()],
            checksums: Vec::new(),
            approximate_size_mb: 150,
            description: "Fast neural TTS model (150MB)".to_string(),
            sample_rate: 22050,
            voice_bank: None,
            quantized: None,
        }
    }

    /// Get Dia model info (premium, high-quality)
    #[must_use]
    pub fn dia() -> Self {
        Self {
            id: "dia".to_string(),
            display_name: "Dia TTS".to_string(),
            source: ModelSource::Registry {
                repo_id: "microsoft/dia-en-large".to_string(),
                revision: "main".to_string(),
            },
            required_files: vec![
                "model.onnx".to_string(),
                "config.json".to_string(),
                "tokenizer.json".to_string(),
            ],
            checksums: Vec::new(),
            approximate_size_mb: 1600,
            description: "Premium neural TTS model (1.6GB)".to_string(),
            sample_rate: 48000,
            voice_bank: None,
            quantized: None,
        }
    }

    /// Directory component used under the model cache root
    #[must_use]
    pub fn cache_dir_name(&self) -> String {
        self.source.cache_dir_name()
    }

    /// The full-precision ONNX graph (first `.onnx` required file)
    #[must_use]
    pub fn original_model_file(&self) -> Option<&str> {
        self.required_files
            .iter()
            .map(String::as_str)
            .find(|f| f.ends_with(".onnx"))
    }

    /// Expected SHA-256 digest for `filename`, if the registry pins one
    #[must_use]
    pub fn checksum_for(&self, filename: &str) -> Option<&str> {
        self.checksums
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, digest)| digest.as_str())
    }

    /// Validate static invariants
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, no files are required, or a
    /// direct-download model has no URL for one of its files.
    pub fn validate(&self) -> crate::VocalizeResult<()> {
        if self.id.is_empty() {
            return Err(crate::VocalizeError::configuration("Model id cannot be empty"));
        }
        if self.required_files.is_empty() {
            return Err(crate::VocalizeError::configuration(format!(
                "Model '{}' has no required files",
                self.id
            )));
        }
        if let ModelSource::DirectUrls { urls } = &self.source {
            for file in &self.required_files {
                if !urls.iter().any(|(name, _)| name == file) {
                    return Err(crate::VocalizeError::configuration(format!(
                        "Model '{}' has no download URL for '{}'",
                        self.id, file
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Set of known models keyed by id
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    /// Registry with the built-in models
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            models: vec![
                ModelDescriptor::kokoro(),
                ModelDescriptor::chatterbox(),
                ModelDescriptor::dia(),
            ],
        }
    }

    /// Registry with custom descriptors
    ///
    /// # Errors
    ///
    /// Returns an error if any descriptor is invalid or ids collide.
    pub fn with_models(models: Vec<ModelDescriptor>) -> crate::VocalizeResult<Self> {
        for (i, model) in models.iter().enumerate() {
            model.validate()?;
            if models[..i].iter().any(|m| m.id == model.id) {
                return Err(crate::VocalizeError::configuration(format!(
                    "Duplicate model id '{}'",
                    model.id
                )));
            }
        }
        Ok(Self { models })
    }

    /// Look up a descriptor
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// All descriptors in registry order
    #[must_use]
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// The default model (Kokoro TTS)
    #[must_use]
    pub fn default_model(&self) -> Option<&ModelDescriptor> {
        self.get("kokoro").or_else(|| self.models.first())
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
