//! On-disk layouts a model's files may live in.
//!
//! A model cache can hold the same logical model in more than one shape:
//! a flat `local/` directory written by our own downloads, a shared
//! `models--direct_download/local/` directory for URL-sourced models, and
//! hub-style `snapshots/<hash>/` trees left behind by older tooling. Each
//! shape is a [`CacheLayout`]; the manager walks an ordered list of them.

use std::fmt::Debug;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::types::ModelDescriptor;

/// One way of placing a model's files under the model cache root
pub trait CacheLayout: Send + Sync + Debug {
    /// Short name for logs and status output
    fn name(&self) -> &'static str;

    /// Candidate directories for `model`, in preference order.
    ///
    /// A completeness check must be satisfied entirely by a single
    /// directory; files are never mixed across candidates.
    fn candidate_dirs(&self, models_root: &Path, model: &ModelDescriptor) -> Vec<PathBuf>;
}

/// `<models_root>/models--<repo>/local/`
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatLocalLayout;

impl CacheLayout for FlatLocalLayout {
    fn name(&self) -> &'static str {
        "flat_local"
    }

    fn candidate_dirs(&self, models_root: &Path, model: &ModelDescriptor) -> Vec<PathBuf> {
        if model.source.is_direct() {
            return Vec::new();
        }
        vec![models_root.join(model.cache_dir_name()).join("local")]
    }
}

/// `<models_root>/models--direct_download/local/`
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDownloadLayout;

impl CacheLayout for DirectDownloadLayout {
    fn name(&self) -> &'static str {
        "direct_download"
    }

    fn candidate_dirs(&self, models_root: &Path, model: &ModelDescriptor) -> Vec<PathBuf> {
        if !model.source.is_direct() {
            return Vec::new();
        }
        vec![models_root.join(model.cache_dir_name()).join("local")]
    }
}

/// `<models_root>/models--<repo>/snapshots/<hash>/`, newest first
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacySnapshotLayout;

impl CacheLayout for LegacySnapshotLayout {
    fn name(&self) -> &'static str {
        "legacy_snapshot"
    }

    fn candidate_dirs(&self, models_root: &Path, model: &ModelDescriptor) -> Vec<PathBuf> {
        let snapshots = models_root.join(model.cache_dir_name()).join("snapshots");
        let pattern = format!(
            "{}/*",
            glob::Pattern::escape(snapshots.to_string_lossy().as_ref())
        );

        let Ok(entries) = glob::glob(&pattern) else {
            return Vec::new();
        };

        let mut dirs: Vec<(SystemTime, PathBuf)> = entries
            .flatten()
            .filter(|p| p.is_dir())
            .map(|p| {
                let modified = std::fs::metadata(&p)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, p)
            })
            .collect();

        // Most recent snapshot first; ties broken by name for stable output.
        dirs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        dirs.into_iter().map(|(_, p)| p).collect()
    }
}

/// Default lookup order: our own flat directories, then legacy snapshots
#[must_use]
pub fn default_layouts() -> Vec<Box<dyn CacheLayout>> {
    vec![
        Box::new(FlatLocalLayout),
        Box::new(DirectDownloadLayout),
        Box::new(LegacySnapshotLayout),
    ]
}

/// A file counts as present when it is a non-empty regular file we can open.
///
/// Zero-byte leftovers from an interrupted write are not considered present.
#[must_use]
pub fn is_complete_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    meta.is_file() && meta.len() > 0 && File::open(path).is_ok()
}

/// Whether every file in `files` is complete inside `dir`
#[must_use]
pub fn dir_has_all(dir: &Path, files: &[String]) -> bool {
    dir.is_dir() && files.iter().all(|f| is_complete_file(&dir.join(f)))
}
