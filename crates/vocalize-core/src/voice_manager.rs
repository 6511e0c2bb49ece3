//! Voice resolution for TTS synthesis.
//!
//! Maps user-facing voice names onto voice bank keys, lists the voices a
//! model ships through a small JSON side-cache, and turns a voice id into a
//! validated style vector with an explicit fallback chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::VOICE_CACHE_FILENAME;
use crate::error::{VocalizeError, VocalizeResult};
use crate::model::ModelCacheManager;
use crate::voice_bank::{placeholder_vector, validate_style_vector, StyleVector, VoiceBank};

/// User-friendly names and the bank keys they stand for
pub const VOICE_ALIASES: &[(&str, &str)] = &[
    ("bella", "af_bella"),
    ("alloy", "af_alloy"),
    ("sarah", "af_sarah"),
    ("adam", "am_adam"),
    ("echo", "am_echo"),
    ("nova", "af_nova"),
    ("heart", "af_heart"),
    ("jessica", "af_jessica"),
    ("nicole", "af_nicole"),
    ("river", "af_river"),
    ("sky", "af_sky"),
    ("eric", "am_eric"),
    ("liam", "am_liam"),
    ("michael", "am_michael"),
    ("onyx", "am_onyx"),
    ("fenrir", "am_fenrir"),
    ("puck", "am_puck"),
    ("female", "af_sarah"),
    ("male", "am_adam"),
    ("default", "af_sarah"),
];

/// Voices tried, in order, when the requested one is unusable
pub const FALLBACK_VOICES: &[&str] = &["af_alloy", "af_bella", "af_sarah"];

const CANONICAL_PREFIXES: &[&str] = &[
    "af_", "am_", "bf_", "bm_", "ef_", "em_", "ff_", "hf_", "hm_", "if_", "im_", "jf_", "jm_",
    "pf_", "pm_", "zf_", "zm_",
];

/// Whether `voice_id` already has a region+gender bank prefix such as `af_`
#[must_use]
pub fn is_canonical_voice_id(voice_id: &str) -> bool {
    CANONICAL_PREFIXES.iter().any(|p| voice_id.starts_with(p))
}

/// Map a voice name onto its bank key.
///
/// Canonical ids and aliases are both matched case-insensitively; canonical
/// ids come back lower-cased. Anything else passes through for the caller
/// to reject.
#[must_use]
pub fn resolve_alias(name: &str) -> String {
    let lowered = name.to_lowercase();
    if is_canonical_voice_id(&lowered) {
        return lowered;
    }
    match VOICE_ALIASES.iter().find(|(alias, _)| *alias == lowered) {
        Some((_, canonical)) => {
            debug!("Resolved voice alias: '{}' -> '{}'", name, canonical);
            (*canonical).to_string()
        }
        None => name.to_string(),
    }
}

/// Gender classification for voices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Male voice
    Male,
    /// Female voice
    Female,
    /// Unknown or neutral voice
    Neutral,
}

impl Gender {
    /// Gender encoded in the second letter of a bank key
    #[must_use]
    pub fn from_voice_id(voice_id: &str) -> Self {
        if !is_canonical_voice_id(voice_id) {
            return Self::Neutral;
        }
        match voice_id.as_bytes().get(1) {
            Some(b'f') => Self::Female,
            Some(b'm') => Self::Male,
            _ => Self::Neutral,
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Male => write!(f, "Male"),
            Self::Female => write!(f, "Female"),
            Self::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Language encoded in the first letter of a bank key
#[must_use]
pub fn language_for(voice_id: &str) -> &'static str {
    if !is_canonical_voice_id(voice_id) {
        return "English";
    }
    match voice_id.as_bytes().first() {
        Some(b'b') => "British English",
        Some(b'j') => "Japanese",
        Some(b'z') => "Mandarin Chinese",
        Some(b'e') => "Spanish",
        Some(b'f') => "French",
        Some(b'h') => "Hindi",
        Some(b'i') => "Italian",
        Some(b'p') => "Brazilian Portuguese",
        _ => "American English",
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
    })
}

/// Display name such as `"Bella (Female)"`
#[must_use]
pub fn display_name(voice_id: &str) -> String {
    if is_canonical_voice_id(voice_id) {
        let base = capitalize(&voice_id[3..].replace('_', " "));
        return match Gender::from_voice_id(voice_id) {
            Gender::Neutral => base,
            gender => format!("{base} ({gender})"),
        };
    }
    voice_id
        .split('_')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Description of one voice in a bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Bank key, e.g. `af_bella`
    pub id: String,
    /// Display name
    pub name: String,
    /// Gender parsed from the id
    pub gender: Gender,
    /// Language parsed from the id
    pub language: String,
    /// Bank file the voice lives in
    pub file_path: String,
}

impl VoiceInfo {
    /// Classify `voice_id` from its prefix
    #[must_use]
    pub fn from_id(voice_id: &str, bank_path: &Path) -> Self {
        Self {
            id: voice_id.to_string(),
            name: display_name(voice_id),
            gender: Gender::from_voice_id(voice_id),
            language: language_for(voice_id).to_string(),
            file_path: bank_path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SideCacheEntry {
    voices: Vec<VoiceInfo>,
    last_updated: String,
}

type SideCache = BTreeMap<String, SideCacheEntry>;

/// How a style vector was obtained
#[derive(Debug, Clone, PartialEq)]
pub enum StyleResolution {
    /// The requested voice, or its alias, was found and validated
    Resolved {
        /// Bank key that matched
        voice_id: String,
        /// Validated vector
        vector: StyleVector,
    },
    /// A fallback voice stood in for the requested one
    Fallback {
        /// Voice id the caller asked for
        requested: String,
        /// Fallback bank key used
        voice_id: String,
        /// Validated vector of the fallback voice
        vector: StyleVector,
        /// Why the requested voice was unusable
        reason: VocalizeError,
    },
    /// No usable voice was found; a synthetic vector was substituted
    Placeholder {
        /// Voice id the caller asked for
        requested: String,
        /// Fixed-seed synthetic vector
        vector: StyleVector,
        /// Always [`VocalizeError::VoiceNotFound`]
        reason: VocalizeError,
    },
}

impl StyleResolution {
    /// The vector to hand to synthesis
    #[must_use]
    pub fn vector(&self) -> &[f32] {
        match self {
            Self::Resolved { vector, .. }
            | Self::Fallback { vector, .. }
            | Self::Placeholder { vector, .. } => vector,
        }
    }

    /// Consume into the vector
    #[must_use]
    pub fn into_vector(self) -> StyleVector {
        match self {
            Self::Resolved { vector, .. }
            | Self::Fallback { vector, .. }
            | Self::Placeholder { vector, .. } => vector,
        }
    }

    /// Bank key actually used, `None` for the placeholder
    #[must_use]
    pub fn voice_id(&self) -> Option<&str> {
        match self {
            Self::Resolved { voice_id, .. } | Self::Fallback { voice_id, .. } => Some(voice_id),
            Self::Placeholder { .. } => None,
        }
    }

    /// Whether the vector is synthetic
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

struct LoadedBank {
    path: PathBuf,
    modified: SystemTime,
    bank: Arc<VoiceBank>,
}

/// Resolves voices against the bank of a cached model
pub struct VoiceBankResolver {
    models: ModelCacheManager,
    side_cache_path: PathBuf,
    rebuild_lock: Mutex<()>,
    loaded: Mutex<Option<LoadedBank>>,
}

impl std::fmt::Debug for VoiceBankResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBankResolver")
            .field("models_dir", &self.models.models_dir())
            .field("side_cache_path", &self.side_cache_path)
            .finish_non_exhaustive()
    }
}

impl VoiceBankResolver {
    /// Resolver with the side-cache at `<models dir>/voice_cache.json`
    #[must_use]
    pub fn new(models: ModelCacheManager) -> Self {
        let side_cache_path = models.models_dir().join(VOICE_CACHE_FILENAME);
        Self::with_side_cache(models, side_cache_path)
    }

    /// Resolver with an explicit side-cache location
    #[must_use]
    pub fn with_side_cache(models: ModelCacheManager, side_cache_path: impl Into<PathBuf>) -> Self {
        Self {
            models,
            side_cache_path: side_cache_path.into(),
            rebuild_lock: Mutex::new(()),
            loaded: Mutex::new(None),
        }
    }

    /// Location of the JSON side-cache
    #[must_use]
    pub fn side_cache_path(&self) -> &Path {
        &self.side_cache_path
    }

    /// Path of the model's voice bank, `None` when the model ships none
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::UnknownModel`] or, when the bank is not on
    /// disk, [`VocalizeError::NotCached`] naming the bank file.
    pub fn bank_path(&self, model_id: &str) -> VocalizeResult<Option<PathBuf>> {
        let model = self.models.descriptor(model_id)?;
        let Some(bank_file) = &model.voice_bank else {
            return Ok(None);
        };
        self.models
            .resolve_path(model_id, bank_file)
            .map(Some)
            .ok_or_else(|| VocalizeError::not_cached(model_id, vec![bank_file.clone()]))
    }

    fn bank_for(&self, model_id: &str) -> VocalizeResult<Arc<VoiceBank>> {
        let path = self.bank_path(model_id)?.ok_or_else(|| {
            VocalizeError::invalid_input(format!("Model '{model_id}' has no voice bank"))
        })?;
        let modified = std::fs::metadata(&path)?.modified()?;

        let mut loaded = self.loaded.lock();
        if let Some(current) = loaded.as_ref() {
            if current.path == path && current.modified == modified {
                return Ok(Arc::clone(&current.bank));
            }
        }

        info!("Loading voice bank {}", path.display());
        let bank = Arc::new(VoiceBank::load(&path)?);
        *loaded = Some(LoadedBank {
            path,
            modified,
            bank: Arc::clone(&bank),
        });
        Ok(bank)
    }

    /// List the voices a model ships.
    ///
    /// Served from the side-cache while its recorded bank mtime matches the
    /// bank on disk; otherwise the bank is opened and the side-cache entry
    /// rewritten. Models without a bank have no voices.
    ///
    /// # Errors
    ///
    /// Returns [`VocalizeError::NotCached`] if the bank is not on disk, or an
    /// error if it cannot be read.
    pub fn discover_voices(&self, model_id: &str) -> VocalizeResult<Vec<VoiceInfo>> {
        let Some(bank_path) = self.bank_path(model_id)? else {
            return Ok(Vec::new());
        };
        let stamp = mtime_stamp(&bank_path)?;

        if let Some(voices) = self.fresh_entry(model_id, &stamp) {
            debug!("Discovered {} {} voices from side-cache", voices.len(), model_id);
            return Ok(voices);
        }

        let _guard = self.rebuild_lock.lock();
        // Another thread may have rebuilt while we waited.
        if let Some(voices) = self.fresh_entry(model_id, &stamp) {
            return Ok(voices);
        }

        info!("Rebuilding voice side-cache for '{}'", model_id);
        let bank = self.bank_for(model_id)?;
        let voices: Vec<VoiceInfo> = bank
            .voice_ids()
            .iter()
            .map(|id| VoiceInfo::from_id(id, &bank_path))
            .collect();

        let mut cache = self.read_side_cache();
        cache.insert(
            model_id.to_string(),
            SideCacheEntry {
                voices: voices.clone(),
                last_updated: stamp,
            },
        );
        if let Err(e) = self.write_side_cache(&cache) {
            warn!("Could not persist voice side-cache: {}", e);
        }

        info!("Voice side-cache holds {} voices for '{}'", voices.len(), model_id);
        Ok(voices)
    }

    fn fresh_entry(&self, model_id: &str, stamp: &str) -> Option<Vec<VoiceInfo>> {
        let mut cache = self.read_side_cache();
        match cache.remove(model_id) {
            Some(entry) if entry.last_updated == stamp => Some(entry.voices),
            Some(_) => {
                debug!("Voice side-cache for '{}' is older than its bank", model_id);
                None
            }
            None => None,
        }
    }

    fn read_side_cache(&self) -> SideCache {
        let raw = match std::fs::read_to_string(&self.side_cache_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SideCache::new(),
            Err(e) => {
                warn!("Could not read {}: {}", self.side_cache_path.display(), e);
                return SideCache::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring corrupt voice side-cache: {}", e);
            SideCache::new()
        })
    }

    fn write_side_cache(&self, cache: &SideCache) -> VocalizeResult<()> {
        if let Some(parent) = self.side_cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .side_cache_path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let result = serde_json::to_string_pretty(cache)
            .map_err(VocalizeError::from)
            .and_then(|json| std::fs::write(&tmp, json).map_err(VocalizeError::from))
            .and_then(|()| std::fs::rename(&tmp, &self.side_cache_path).map_err(VocalizeError::from));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }

    /// Style vector for `voice_id` in `model_id`'s bank.
    ///
    /// Tries the alias-resolved id, then the id as given, then
    /// [`FALLBACK_VOICES`] in order. A vector that fails validation counts
    /// as not found. When nothing matches, returns a fixed-seed placeholder
    /// tagged as such.
    ///
    /// # Errors
    ///
    /// Returns an error only when the bank itself is unavailable.
    pub fn get_style_vector(&self, model_id: &str, voice_id: &str) -> VocalizeResult<StyleResolution> {
        let bank = self.bank_for(model_id)?;

        let canonical = resolve_alias(voice_id);
        let mut requested_ids = vec![canonical.clone()];
        if canonical != voice_id {
            requested_ids.push(voice_id.to_string());
        }

        let mut first_failure = None;
        for id in &requested_ids {
            match checked_vector(&bank, id) {
                Ok(vector) => {
                    return Ok(StyleResolution::Resolved {
                        voice_id: id.clone(),
                        vector,
                    })
                }
                Err(e) => {
                    first_failure.get_or_insert(e);
                }
            }
        }
        let reason = first_failure.unwrap_or_else(|| VocalizeError::voice_not_found(voice_id));

        for fallback in FALLBACK_VOICES {
            if let Ok(vector) = checked_vector(&bank, fallback) {
                warn!("Voice '{}' unusable ({}); falling back to '{}'", voice_id, reason, fallback);
                return Ok(StyleResolution::Fallback {
                    requested: voice_id.to_string(),
                    voice_id: (*fallback).to_string(),
                    vector,
                    reason,
                });
            }
        }

        warn!(
            "No usable voice for '{}' in {}; substituting placeholder style vector",
            voice_id,
            bank.path().display()
        );
        Ok(StyleResolution::Placeholder {
            requested: voice_id.to_string(),
            vector: placeholder_vector(),
            reason: VocalizeError::voice_not_found(voice_id),
        })
    }
}

fn checked_vector(bank: &VoiceBank, voice_id: &str) -> VocalizeResult<StyleVector> {
    let vector = bank
        .style_vector(voice_id)
        .ok_or_else(|| VocalizeError::voice_not_found(voice_id))?;
    validate_style_vector(&vector).map_err(|defect| {
        warn!("Voice '{}' failed validation: {}", voice_id, defect);
        VocalizeError::invalid_embedding(voice_id, defect.to_string())
    })?;
    Ok(vector)
}

fn mtime_stamp(path: &Path) -> VocalizeResult<String> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(format!("{}.{:09}", since_epoch.as_secs(), since_epoch.subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("bella", "af_bella")]
    #[case("Bella", "af_bella")]
    #[case("ALLOY", "af_alloy")]
    #[case("male", "am_adam")]
    #[case("female", "af_sarah")]
    #[case("default", "af_sarah")]
    #[case("fenrir", "am_fenrir")]
    #[case("af_bella", "af_bella")]
    #[case("bm_george", "bm_george")]
    #[case("AF_BELLA", "af_bella")]
    #[case("Bm_George", "bm_george")]
    #[case("zzz_unknown", "zzz_unknown")]
    #[case("ZZZ_Unknown", "ZZZ_Unknown")]
    fn test_resolve_alias(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(resolve_alias(input), expected);
    }

    #[test]
    fn test_canonical_prefix_is_case_sensitive() {
        assert!(is_canonical_voice_id("af_bella"));
        assert!(!is_canonical_voice_id("AF_BELLA"));
        assert!(!is_canonical_voice_id("xx_bella"));
    }

    #[test]
    fn test_alias_resolution_is_idempotent() {
        for (alias, _) in VOICE_ALIASES {
            let once = resolve_alias(alias);
            assert_eq!(resolve_alias(&once), once);
        }
    }

    #[test]
    fn test_gender_display() {
        assert_eq!(Gender::Male.to_string(), "Male");
        assert_eq!(Gender::Female.to_string(), "Female");
        assert_eq!(Gender::Neutral.to_string(), "Neutral");
    }

    #[rstest]
    #[case("af_bella", Gender::Female, "American English", "Bella (Female)")]
    #[case("am_michael", Gender::Male, "American English", "Michael (Male)")]
    #[case("bf_emma", Gender::Female, "British English", "Emma (Female)")]
    #[case("jm_kumo", Gender::Male, "Japanese", "Kumo (Male)")]
    #[case("zf_xiaobei", Gender::Female, "Mandarin Chinese", "Xiaobei (Female)")]
    #[case("custom_voice", Gender::Neutral, "English", "Custom Voice")]
    fn test_voice_classification(
        #[case] id: &str,
        #[case] gender: Gender,
        #[case] language: &str,
        #[case] name: &str,
    ) {
        let info = VoiceInfo::from_id(id, Path::new("/bank.bin"));
        assert_eq!(info.gender, gender);
        assert_eq!(info.language, language);
        assert_eq!(info.name, name);
        assert_eq!(info.file_path, "/bank.bin");
    }

    #[test]
    fn test_gender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"female\"");
    }

    #[test]
    fn test_style_resolution_accessors() {
        let placeholder = StyleResolution::Placeholder {
            requested: "x".to_string(),
            vector: vec![0.0; 4],
            reason: VocalizeError::voice_not_found("x"),
        };
        assert!(placeholder.is_placeholder());
        assert!(placeholder.voice_id().is_none());

        let resolved = StyleResolution::Resolved {
            voice_id: "af_bella".to_string(),
            vector: vec![1.0; 4],
        };
        assert_eq!(resolved.voice_id(), Some("af_bella"));
        assert_eq!(resolved.into_vector(), vec![1.0; 4]);
    }
}
