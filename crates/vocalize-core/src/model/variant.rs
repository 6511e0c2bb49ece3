//! Choice between the original and quantized build of a model.
//!
//! The selector is built from the manager and the [`OptimizationState`]
//! loaded at startup. Flipping the flag means building a new selector from
//! the state the config setter returns.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::layout::is_complete_file;
use super::manager::ModelCacheManager;
use super::types::{ModelDescriptor, VariantKind};
use crate::config::OptimizationState;
use crate::error::{VocalizeError, VocalizeResult};

/// The variant a synthesis call should load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveVariant {
    /// Which build was chosen
    pub kind: VariantKind,
    /// Path to the ONNX file
    pub path: PathBuf,
    /// Identifier passed to the inference call, e.g. `kokoro-int8`
    pub variant_id: String,
}

/// One variant's on-disk state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantInfo {
    /// Which build
    pub kind: VariantKind,
    /// File name inside the model directory
    pub filename: String,
    /// Resolved path when the file exists
    pub path: Option<PathBuf>,
    /// File size in megabytes when the file exists
    pub size_mb: Option<f64>,
}

/// Variant report for one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantStatus {
    /// Model id
    pub model_id: String,
    /// Quantization flag the selector was built with
    pub quantization_enabled: bool,
    /// Known variants; the quantized entry is absent when none is published
    pub variants: Vec<VariantInfo>,
    /// Variant [`VariantSelector::active_variant`] would pick, if any
    pub active: Option<VariantKind>,
}

/// Picks the on-disk model variant according to the optimization flags
#[derive(Debug, Clone)]
pub struct VariantSelector {
    models: ModelCacheManager,
    state: OptimizationState,
}

impl VariantSelector {
    /// Create a selector for the given flags
    #[must_use]
    pub const fn new(models: ModelCacheManager, state: OptimizationState) -> Self {
        Self { models, state }
    }

    /// Flags in effect
    #[must_use]
    pub const fn state(&self) -> OptimizationState {
        self.state
    }

    /// Identifier for a variant of `model_id`
    #[must_use]
    pub fn variant_id(model_id: &str, kind: VariantKind) -> String {
        match kind {
            VariantKind::Original => model_id.to_string(),
            VariantKind::Quantized => format!("{model_id}-{}", kind.as_str()),
        }
    }

    fn quantized_path(&self, model: &ModelDescriptor) -> Option<PathBuf> {
        let variant = model.quantized.as_ref()?;
        let path = self.models.download_dir(model).join(&variant.filename);
        is_complete_file(&path).then_some(path)
    }

    fn original_path(&self, model: &ModelDescriptor) -> Option<PathBuf> {
        let filename = model.original_model_file()?;
        self.models.resolve_path(&model.id, filename)
    }

    /// Variant to load for `model_id`.
    ///
    /// Prefers the quantized file when quantization is enabled and the file
    /// is on disk, otherwise the original.
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::UnknownModel`] for ids outside the registry
    /// and [`VocalizeError::NoModelAvailable`] when neither file exists.
    pub fn active_variant(&self, model_id: &str) -> VocalizeResult<ActiveVariant> {
        let model = self.models.descriptor(model_id)?;

        if self.state.quantization_enabled {
            if let Some(path) = self.quantized_path(model) {
                debug!("Using quantized model: {}", path.display());
                return Ok(ActiveVariant {
                    kind: VariantKind::Quantized,
                    path,
                    variant_id: Self::variant_id(model_id, VariantKind::Quantized),
                });
            }
            warn!("Quantization enabled but no quantized '{}' on disk; using original", model_id);
        }

        if let Some(path) = self.original_path(model) {
            debug!("Using original model: {}", path.display());
            return Ok(ActiveVariant {
                kind: VariantKind::Original,
                path,
                variant_id: Self::variant_id(model_id, VariantKind::Original),
            });
        }

        Err(VocalizeError::no_model_available(format!(
            "No model file found for '{model_id}' (quantization {})",
            if self.state.quantization_enabled { "enabled" } else { "disabled" }
        )))
    }

    /// Path of the variant to load
    ///
    /// # Errors
    ///
    /// See [`Self::active_variant`].
    pub fn active_model_path(&self, model_id: &str) -> VocalizeResult<PathBuf> {
        self.active_variant(model_id).map(|v| v.path)
    }

    /// Download the pre-quantized build of `model_id`.
    ///
    /// Skips the download when the file is already present unless `force`.
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::InvalidInput`] if the model publishes no
    /// quantized build, or the download error.
    pub fn fetch_quantized(&self, model_id: &str, force: bool) -> VocalizeResult<PathBuf> {
        let model = self.models.descriptor(model_id)?;
        let variant = model.quantized.as_ref().ok_or_else(|| {
            VocalizeError::invalid_input(format!("Model '{model_id}' has no quantized variant"))
        })?;

        info!("Fetching quantized variant of {}", model.display_name);
        let path = self
            .models
            .fetch_extra_file(model_id, &variant.filename, &variant.url, force)?;
        info!("Quantized model available at {}", path.display());
        Ok(path)
    }

    /// Report both variants of `model_id`
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::UnknownModel`] for ids outside the registry.
    pub fn status(&self, model_id: &str) -> VocalizeResult<VariantStatus> {
        let model = self.models.descriptor(model_id)?;
        let mut variants = Vec::with_capacity(2);

        if let Some(filename) = model.original_model_file() {
            let path = self.original_path(model);
            variants.push(VariantInfo {
                kind: VariantKind::Original,
                filename: filename.to_string(),
                size_mb: path.as_deref().and_then(size_mb),
                path,
            });
        }
        if let Some(quantized) = &model.quantized {
            let path = self.quantized_path(model);
            variants.push(VariantInfo {
                kind: VariantKind::Quantized,
                filename: quantized.filename.clone(),
                size_mb: path.as_deref().and_then(size_mb),
                path,
            });
        }

        Ok(VariantStatus {
            model_id: model_id.to_string(),
            quantization_enabled: self.state.quantization_enabled,
            variants,
            active: self.active_variant(model_id).ok().map(|v| v.kind),
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn size_mb(path: &std::path::Path) -> Option<f64> {
    std::fs::metadata(path)
        .ok()
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
}
