//! Model cache management for neural TTS models
//! Resolves, downloads and selects on-disk model variants

/// Network fetch and temp-file promotion
pub mod download;
/// On-disk layout strategies
pub mod layout;
/// Model cache manager
pub mod manager;
/// Model registry types
pub mod types;
/// Original vs quantized variant selection
pub mod variant;

pub use download::{Fetcher, FetchSummary, HttpFetcher};
pub use layout::{
    CacheLayout, DirectDownloadLayout, FlatLocalLayout, LegacySnapshotLayout,
};
pub use manager::{
    format_size, DownloadReport, ModelCacheManager, ModelStatus, ResolvedLocation,
    DEFAULT_REGISTRY_ENDPOINT,
};
pub use types::{ModelDescriptor, ModelRegistry, ModelSource, QuantizedVariant, VariantKind};
pub use variant::{ActiveVariant, VariantInfo, VariantSelector, VariantStatus};
