//! Error types for the Vocalize resource layer.


/// Result type alias for Vocalize operations
pub type VocalizeResult<T> = Result<T, VocalizeError>;

/// Main error type for model, voice and token cache operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VocalizeError {
    /// Model files are not present in the local cache
    #[error("Model '{model_id}' is not cached (missing: {})", missing.join(", "))]
    NotCached {
        /// The model that was looked up
        model_id: String,
        /// Required files that could not be resolved
        missing: Vec<String>,
    },

    /// Fetching a model file failed
    #[error("Download of '{file}' for model '{model_id}' failed: {message}")]
    DownloadFailed {
        /// The model being downloaded
        model_id: String,
        /// The file that failed
        file: String,
        /// Underlying network or storage failure
        message: String,
    },

    /// A persistent cache is unreadable or has the wrong version
    #[error("Corrupt cache: {message}")]
    CorruptCache {
        /// What was wrong with the cache
        message: String,
    },

    /// A style vector failed validation
    #[error("Invalid embedding for voice '{voice_id}': {reason}")]
    InvalidEmbedding {
        /// Voice whose embedding was rejected
        voice_id: String,
        /// Validation failure
        reason: String,
    },

    /// Voice not found error
    #[error("Voice '{voice_id}' not found")]
    VoiceNotFound {
        /// The voice ID that was not found
        voice_id: String,
    },

    /// The external synthesis call failed
    #[error("Synthesis call failed: {message}")]
    AssemblyFailed {
        /// Error message reported by the backend
        message: String,
    },

    /// Model id is not part of the registry
    #[error("Unknown model '{model_id}'")]
    UnknownModel {
        /// The requested model id
        model_id: String,
    },

    /// No variant of the model exists on disk
    #[error("No model available: {message}")]
    NoModelAvailable {
        /// Which variants were looked for
        message: String,
    },

    /// Tokenization was required but no tokenizer is installed
    #[error("Tokenizer unavailable: {message}")]
    TokenizerUnavailable {
        /// Error message describing the missing capability
        message: String,
    },

    /// File I/O error
    #[error("File I/O error: {message}")]
    FileError {
        /// Error message describing the file operation failure
        message: String,
    },

    /// Persistent store error
    #[error("Storage error: {message}")]
    StorageError {
        /// Error message from the store
        message: String,
    },

    /// Invalid input error
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Error message describing the invalid input
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Timeout error
    #[error("Operation timed out: {message}")]
    TimeoutError {
        /// Error message describing the timeout
        message: String,
    },

    /// Thread or concurrency error
    #[error("Concurrency error: {message}")]
    ConcurrencyError {
        /// Error message describing the concurrency issue
        message: String,
    },
}

impl VocalizeError {
    /// Create a new not-cached error
    #[must_use]
    pub fn not_cached<S: Into<String>>(model_id: S, missing: Vec<String>) -> Self {
        Self::NotCached {
            model_id: model_id.into(),
            missing,
        }
    }

    /// Create a new download error
    #[must_use]
    pub fn download_failed<A, B, C>(model_id: A, file: B, message: C) -> Self
    where
        A: Into<String>,
        B: Into<String>,
        C: Into<String>,
    {
        Self::DownloadFailed {
            model_id: model_id.into(),
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create a new corrupt cache error
    #[must_use]
    pub fn corrupt_cache<S: Into<String>>(message: S) -> Self {
        Self::CorruptCache {
            message: message.into(),
        }
    }

    /// Create a new invalid embedding error
    #[must_use]
    pub fn invalid_embedding<A: Into<String>, B: Into<String>>(voice_id: A, reason: B) -> Self {
        Self::InvalidEmbedding {
            voice_id: voice_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new voice not found error
    #[must_use]
    pub fn voice_not_found<S: Into<String>>(voice_id: S) -> Self {
        Self::VoiceNotFound {
            voice_id: voice_id.into(),
        }
    }

    /// Create a new assembly error
    #[must_use]
    pub fn assembly_failed<S: Into<String>>(message: S) -> Self {
        Self::AssemblyFailed {
            message: message.into(),
        }
    }

    /// Create a new unknown model error
    #[must_use]
    pub fn unknown_model<S: Into<String>>(model_id: S) -> Self {
        Self::UnknownModel {
            model_id: model_id.into(),
        }
    }

    /// Create a new no-model-available error
    #[must_use]
    pub fn no_model_available<S: Into<String>>(message: S) -> Self {
        Self::NoModelAvailable {
            message: message.into(),
        }
    }

    /// Create a new tokenizer unavailable error
    #[must_use]
    pub fn tokenizer_unavailable<S: Into<String>>(message: S) -> Self {
        Self::TokenizerUnavailable {
            message: message.into(),
        }
    }

    /// Create a new file error
    #[must_use]
    pub fn file<S: Into<String>>(message: S) -> Self {
        Self::FileError {
            message: message.into(),
        }
    }

    /// Create a new storage error
    #[must_use]
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::StorageError {
            message: message.into(),
        }
    }

    /// Create a new invalid input error
    #[must_use]
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    #[must_use]
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    #[must_use]
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::TimeoutError {
            message: message.into(),
        }
    }

    /// Create a new concurrency error
    #[must_use]
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        Self::ConcurrencyError {
            message: message.into(),
        }
    }

    /// Check if this error is retriable
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. } | Self::TimeoutError { .. } | Self::NotCached { .. }
        )
    }

    /// Check if this error is due to invalid user input
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. }
                | Self::UnknownModel { .. }
                | Self::ConfigurationError { .. }
        )
    }

    /// Whether the error must be shown to the end user.
    ///
    /// Cache corruption and embedding defects are healed locally; only
    /// "genuinely unavailable" and "inference failed" conditions surface.
    #[must_use]
    pub const fn reaches_user(&self) -> bool {
        matches!(
            self,
            Self::NotCached { .. }
                | Self::DownloadFailed { .. }
                | Self::NoModelAvailable { .. }
                | Self::VoiceNotFound { .. }
                | Self::AssemblyFailed { .. }
        )
    }

    /// Get the error category for logging/metrics
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::NotCached { .. } => "not_cached",
            Self::DownloadFailed { .. } => "download",
            Self::CorruptCache { .. } => "corrupt_cache",
            Self::InvalidEmbedding { .. } => "embedding",
            Self::VoiceNotFound { .. } => "voice",
            Self::AssemblyFailed { .. } => "assembly",
            Self::UnknownModel { .. } => "model",
            Self::NoModelAvailable { .. } => "variant",
            Self::TokenizerUnavailable { .. } => "tokenizer",
            Self::FileError { .. } => "file",
            Self::StorageError { .. } => "storage",
            Self::InvalidInput { .. } => "input",
            Self::ConfigurationError { .. } => "configuration",
            Self::TimeoutError { .. } => "timeout",
            Self::ConcurrencyError { .. } => "concurrency",
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for VocalizeError {
    fn from(err: std::io::Error) -> Self {
        Self::file(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for VocalizeError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::timeout(format!("Operation timed out: {err}"))
    }
}

impl From<tokio::task::JoinError> for VocalizeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::concurrency(format!("Blocking task failed: {err}"))
    }
}

impl From<serde_json::Error> for VocalizeError {
    fn from(err: serde_json::Error) -> Self {
        Self::file(format!("JSON serialization error: {err}"))
    }
}

impl From<toml::de::Error> for VocalizeError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid config file: {err}"))
    }
}

impl From<toml::ser::Error> for VocalizeError {
    fn from(err: toml::ser::Error) -> Self {
        Self::configuration(format!("Could not serialize config: {err}"))
    }
}

impl From<rusqlite::Error> for VocalizeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpzError> for VocalizeError {
    fn from(err: ndarray_npy::ReadNpzError) -> Self {
        Self::file(format!("Voice bank is not a readable NPZ archive: {err}"))
    }
}

impl From<anyhow::Error> for VocalizeError {
    fn from(err: anyhow::Error) -> Self {
        Self::file(format!("{err:#}"))
    }
}
