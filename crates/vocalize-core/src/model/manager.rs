// ModelCacheManager implementation for neural TTS models
// Resolves, downloads and verifies model files across cache layouts

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::download::{download_to, Fetcher, HttpFetcher};
use super::layout::{default_layouts, dir_has_all, is_complete_file, CacheLayout};
use super::types::{ModelDescriptor, ModelRegistry, ModelSource};
use crate::config::CachePaths;
use crate::error::{VocalizeError, VocalizeResult};

/// Default hub endpoint for registry-sourced models
pub const DEFAULT_REGISTRY_ENDPOINT: &str = "https://huggingface.co";

/// Where a complete copy of a model was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLocation {
    /// Name of the layout that matched
    pub layout: &'static str,
    /// Directory holding every required file
    pub dir: PathBuf,
}

/// Cache status of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    /// Registry entry
    pub descriptor: ModelDescriptor,
    /// Whether all required files resolve
    pub cached: bool,
    /// Where they resolve, when cached
    pub location: Option<ResolvedLocation>,
}

/// Result of a download pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Files fetched over the network
    pub downloaded: Vec<String>,
    /// Files already present and left alone
    pub skipped: Vec<String>,
    /// Total bytes fetched
    pub bytes: u64,
}

impl DownloadReport {
    /// Whether the pass touched the network
    #[must_use]
    pub fn fetched_anything(&self) -> bool {
        !self.downloaded.is_empty()
    }
}

/// Manages the on-disk model cache
#[derive(Debug, Clone)]
pub struct ModelCacheManager {
    /// Root of the model cache (`<cache root>/models`)
    models_dir: PathBuf,
    registry: Arc<ModelRegistry>,
    layouts: Arc<Vec<Box<dyn CacheLayout>>>,
    fetcher: Arc<dyn Fetcher>,
    registry_endpoint: String,
}

impl ModelCacheManager {
    /// Create a manager rooted at `models_dir` with the built-in registry
    #[must_use]
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        let models_dir = models_dir.into();
        // Ensure cache directory exists
        if let Err(e) = std::fs::create_dir_all(&models_dir) {
            warn!("Failed to create cache directory {}: {}", models_dir.display(), e);
        }

        Self {
            models_dir,
            registry: Arc::new(ModelRegistry::builtin()),
            layouts: Arc::new(default_layouts()),
            fetcher: Arc::new(HttpFetcher::new()),
            registry_endpoint: DEFAULT_REGISTRY_ENDPOINT.to_string(),
        }
    }

    /// Create a manager in the cross-platform cache directory
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cache directory cannot be determined.
    pub fn new_with_default_cache() -> VocalizeResult<Self> {
        let models_dir = CachePaths::platform_default()?.models_dir();
        info!("Using cross-platform cache directory: {}", models_dir.display());
        Ok(Self::new(models_dir))
    }

    /// Replace the model registry
    #[must_use]
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Replace the network fetcher
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replace the layout lookup order
    #[must_use]
    pub fn with_layouts(mut self, layouts: Vec<Box<dyn CacheLayout>>) -> Self {
        self.layouts = Arc::new(layouts);
        self
    }

    /// Point registry-sourced downloads at another hub
    #[must_use]
    pub fn with_registry_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.registry_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Root of the model cache
    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Known models
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Look up a descriptor or fail with [`VocalizeError::UnknownModel`]
    ///
    /// # Errors
    ///
    /// Returns an error if `model_id` is not in the registry.
    pub fn descriptor(&self, model_id: &str) -> VocalizeResult<&ModelDescriptor> {
        self.registry
            .get(model_id)
            .ok_or_else(|| VocalizeError::unknown_model(model_id))
    }

    /// Directory our own downloads write into
    #[must_use]
    pub fn download_dir(&self, model: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(model.cache_dir_name()).join("local")
    }

    fn candidates<'a>(
        &'a self,
        model: &'a ModelDescriptor,
    ) -> impl Iterator<Item = (&'static str, PathBuf)> + 'a {
        self.layouts.iter().flat_map(move |layout| {
            let name = layout.name();
            layout
                .candidate_dirs(&self.models_dir, model)
                .into_iter()
                .map(move |dir| (name, dir))
        })
    }

    /// First directory, in layout order, holding every required file
    #[must_use]
    pub fn locate(&self, model_id: &str) -> Option<ResolvedLocation> {
        let model = self.registry.get(model_id)?;
        self.candidates(model)
            .find(|(_, dir)| dir_has_all(dir, &model.required_files))
            .map(|(layout, dir)| {
                debug!("Model {} resolved via {} layout at {}", model_id, layout, dir.display());
                ResolvedLocation { layout, dir }
            })
    }

    /// Check whether every required file of a model is present.
    ///
    /// Unknown ids are reported as not cached.
    #[must_use]
    pub fn is_cached(&self, model_id: &str) -> bool {
        self.locate(model_id).is_some()
    }

    /// Path to `filename` in the first layout that has it
    #[must_use]
    pub fn resolve_path(&self, model_id: &str, filename: &str) -> Option<PathBuf> {
        let model = self.registry.get(model_id)?;
        self.candidates(model)
            .map(|(_, dir)| dir.join(filename))
            .find(|path| is_complete_file(path))
    }

    /// Required files not yet present in the download directory
    #[must_use]
    pub fn missing_files(&self, model_id: &str) -> Vec<String> {
        let Some(model) = self.registry.get(model_id) else {
            return Vec::new();
        };
        let dir = self.download_dir(model);
        model
            .required_files
            .iter()
            .filter(|f| !is_complete_file(&dir.join(f)))
            .cloned()
            .collect()
    }

    fn file_url(&self, model: &ModelDescriptor, filename: &str) -> Option<String> {
        match &model.source {
            ModelSource::Registry { repo_id, revision } => Some(format!(
                "{}/{}/resolve/{}/{}",
                self.registry_endpoint, repo_id, revision, filename
            )),
            ModelSource::DirectUrls { urls } => urls
                .iter()
                .find(|(name, _)| name == filename)
                .map(|(_, url)| url.clone()),
        }
    }

    /// Download the model's required files into its local directory.
    ///
    /// Without `force`, returns immediately when the model is cached and
    /// otherwise fetches only files that are missing or incomplete. Files
    /// completed before a failure are kept so a retry resumes from there.
    /// With `force`, each existing file stays in place until its
    /// replacement has downloaded and verified.
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::UnknownModel`] for ids outside the registry
    /// and [`VocalizeError::DownloadFailed`] naming the first file that
    /// could not be fetched.
    pub fn download(&self, model_id: &str, force: bool) -> VocalizeResult<DownloadReport> {
        let model = self.descriptor(model_id)?;
        let mut report = DownloadReport::default();

        if !force && self.is_cached(model_id) {
            debug!("Model '{}' already cached", model_id);
            report.skipped = model.required_files.clone();
            return Ok(report);
        }

        info!(
            "Downloading {} ({}MB) into {}",
            model.display_name,
            model.approximate_size_mb,
            self.download_dir(model).display()
        );

        for filename in &model.required_files {
            let target = self.download_dir(model).join(filename);

            if !force && is_complete_file(&target) {
                debug!("{} already exists, skipping", filename);
                report.skipped.push(filename.clone());
                continue;
            }

            let url = self.file_url(model, filename).ok_or_else(|| {
                VocalizeError::download_failed(model_id, filename.as_str(), "no download URL")
            })?;

            let bytes = self.fetch_file(model, filename, &url, &target)?;
            report.downloaded.push(filename.clone());
            report.bytes += bytes;
        }

        info!(
            "Model '{}' ready: {} downloaded, {} already present",
            model_id,
            report.downloaded.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn fetch_file(
        &self,
        model: &ModelDescriptor,
        filename: &str,
        url: &str,
        target: &Path,
    ) -> VocalizeResult<u64> {
        // The existing file, if any, is only replaced once the new copy verifies.
        info!("Downloading {} from {}", filename, url);
        match download_to(self.fetcher.as_ref(), url, target, model.checksum_for(filename)) {
            Ok(bytes) => {
                info!("Downloaded {} ({} bytes)", filename, bytes);
                Ok(bytes)
            }
            Err(e) => {
                error!("Failed to download {}: {:#}", filename, e);
                Err(VocalizeError::download_failed(
                    model.id.as_str(),
                    filename,
                    format!("{e:#}"),
                ))
            }
        }
    }

    /// Fetch an extra file (not part of `required_files`) into the model's
    /// local directory, e.g. a quantized variant.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unknown or the download fails.
    pub fn fetch_extra_file(
        &self,
        model_id: &str,
        filename: &str,
        url: &str,
        force: bool,
    ) -> VocalizeResult<PathBuf> {
        let model = self.descriptor(model_id)?;
        let target = self.download_dir(model).join(filename);
        if !force && is_complete_file(&target) {
            debug!("{} already exists, skipping", filename);
            return Ok(target);
        }
        self.fetch_file(model, filename, url, &target)?;
        Ok(target)
    }

    /// Make sure a model is usable, downloading only what is missing.
    ///
    /// Returns the directory holding the complete file set. Blocks for the
    /// whole download; async callers want [`Self::ensure_available_async`].
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::UnknownModel`], the download error, or
    /// [`VocalizeError::NotCached`] if files are still missing afterwards.
    pub fn try_ensure_available(&self, model_id: &str) -> VocalizeResult<ResolvedLocation> {
        if let Some(location) = self.locate(model_id) {
            return Ok(location);
        }
        self.descriptor(model_id)?;

        info!("Model '{}' not found in cache. Downloading...", model_id);
        self.download(model_id, false)?;

        self.locate(model_id)
            .ok_or_else(|| VocalizeError::not_cached(model_id, self.missing_files(model_id)))
    }

    /// Boolean form of [`Self::try_ensure_available`]; failures are logged.
    ///
    /// The cached fast path performs no network access.
    pub fn ensure_available(&self, model_id: &str) -> bool {
        match self.try_ensure_available(model_id) {
            Ok(_) => true,
            Err(e) => {
                error!("Model '{}' unavailable: {}", model_id, e);
                false
            }
        }
    }

    /// Run [`Self::try_ensure_available`] on the blocking pool.
    ///
    /// `timeout` bounds the whole call; the blocking download keeps running
    /// in the background if it fires, and its partial file is cleaned up
    /// when it finishes.
    ///
    /// # Errors
    ///
    /// Returns the underlying error, or [`VocalizeError::TimeoutError`].
    pub async fn ensure_available_async(
        &self,
        model_id: &str,
        timeout: Option<Duration>,
    ) -> VocalizeResult<ResolvedLocation> {
        if let Some(location) = self.locate(model_id) {
            return Ok(location);
        }

        let manager = self.clone();
        let id = model_id.to_string();
        let task = tokio::task::spawn_blocking(move || manager.try_ensure_available(&id));

        match timeout {
            Some(limit) => tokio::time::timeout(limit, task).await??,
            None => task.await?,
        }
    }

    /// Remove one model's cache directory, or the whole model cache.
    ///
    /// The cache root is recreated afterwards. Returns `false` for unknown
    /// ids or when removal fails.
    pub fn clear(&self, model_id: Option<&str>) -> bool {
        let result = match model_id {
            Some(id) => {
                let Some(model) = self.registry.get(id) else {
                    error!("Unknown model '{}'", id);
                    return false;
                };
                let dir = self.models_dir.join(model.cache_dir_name());
                if dir.exists() {
                    std::fs::remove_dir_all(&dir).map(|()| info!("Cleared cache for {}", model.display_name))
                } else {
                    info!("No cache found for {}", model.display_name);
                    Ok(())
                }
            }
            None => {
                if self.models_dir.exists() {
                    std::fs::remove_dir_all(&self.models_dir).map(|()| info!("Cleared all model cache"))
                } else {
                    Ok(())
                }
            }
        };

        let recreated = std::fs::create_dir_all(&self.models_dir);
        match (result, recreated) {
            (Ok(()), Ok(())) => true,
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to clear cache: {}", e);
                false
            }
        }
    }

    /// Total size in bytes of regular files under the model cache
    #[must_use]
    pub fn cache_size_bytes(&self) -> u64 {
        dir_size(&self.models_dir)
    }

    /// Total cache size in human-readable form, e.g. `"410.2 MB"`
    #[must_use]
    pub fn cache_size(&self) -> String {
        format_size(self.cache_size_bytes())
    }

    /// Status of one model, `None` for unknown ids
    #[must_use]
    pub fn status(&self, model_id: &str) -> Option<ModelStatus> {
        let descriptor = self.registry.get(model_id)?.clone();
        let location = self.locate(model_id);
        Some(ModelStatus {
            descriptor,
            cached: location.is_some(),
            location,
        })
    }

    /// Status of every registry entry
    #[must_use]
    pub fn list_models(&self) -> Vec<ModelStatus> {
        self.registry
            .models()
            .iter()
            .filter_map(|m| self.status(&m.id))
            .collect()
    }
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(t) if t.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            // Symlinks into shared blob stores are not counted twice.
            _ => 0,
        })
        .sum()
}

/// Scale a byte count to B/KB/MB/GB/TB with one decimal
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
