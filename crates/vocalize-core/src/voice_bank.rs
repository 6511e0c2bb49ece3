//! Voice embedding bank loaded from an NPZ archive.
//!
//! Each entry is a `[frames, 1, 256]` float32 tensor keyed by voice id. The
//! style vector handed to synthesis is frame 0.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{s, Array3, ArrayD, Ix3};
use ndarray_npy::NpzReader;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, warn};

use crate::error::VocalizeResult;

/// Length of a style vector
pub const STYLE_DIM: usize = 256;

/// Seed of the last-resort placeholder vector
pub const PLACEHOLDER_SEED: u64 = 42;

/// Standard deviation of the placeholder vector
pub const PLACEHOLDER_STD: f32 = 0.1;

/// Style embedding consumed by the synthesis call
pub type StyleVector = Vec<f32>;

/// Why a style vector was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EmbeddingDefect {
    /// Not exactly 256 values
    #[error("expected 256 values, got {0}")]
    WrongLength(usize),
    /// Contains NaN or infinity
    #[error("contains NaN or infinite values")]
    NonFinite,
    /// Some magnitude exceeds 10
    #[error("contains values with magnitude above 10")]
    ExtremeValue,
    /// Every magnitude is below 0.001
    #[error("all values are near zero")]
    NearZero,
    /// Zero mean with the spread of uniform [-1, 1] noise
    #[error("looks like uniform random noise")]
    UniformNoise,
}

/// Check a style vector before it may reach the synthesis call.
///
/// # Errors
///
/// Returns the first [`EmbeddingDefect`] found, checked in declaration order.
pub fn validate_style_vector(values: &[f32]) -> Result<(), EmbeddingDefect> {
    if values.len() != STYLE_DIM {
        return Err(EmbeddingDefect::WrongLength(values.len()));
    }
    if values.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingDefect::NonFinite);
    }
    if values.iter().any(|x| x.abs() > 10.0) {
        return Err(EmbeddingDefect::ExtremeValue);
    }
    if values.iter().all(|x| x.abs() < 0.001) {
        return Err(EmbeddingDefect::NearZero);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
    if mean.abs() < 0.01 {
        let variance = values
            .iter()
            .map(|&x| (f64::from(x) - mean).powi(2))
            .sum::<f64>()
            / n;
        if variance > 0.8 {
            return Err(EmbeddingDefect::UniformNoise);
        }
    }
    Ok(())
}

/// Deterministic low-amplitude vector used when no voice can be resolved
#[must_use]
pub fn placeholder_vector() -> StyleVector {
    let mut rng = StdRng::seed_from_u64(PLACEHOLDER_SEED);
    (0..STYLE_DIM)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * PLACEHOLDER_STD)
        .collect()
}

/// Read-only voice embeddings from one bank file
#[derive(Debug, Clone)]
pub struct VoiceBank {
    path: PathBuf,
    entries: HashMap<String, Array3<f32>>,
}

impl VoiceBank {
    /// Load every well-shaped entry of the NPZ archive at `path`.
    ///
    /// Entries with another shape or dtype are skipped with a warning and
    /// behave as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not an NPZ archive.
    pub fn load(path: &Path) -> VocalizeResult<Self> {
        let file = File::open(path)?;
        let mut npz = NpzReader::new(file)?;

        let mut entries = HashMap::new();
        for name in npz.names()? {
            let key = name.trim_end_matches(".npy").to_string();
            let array: ArrayD<f32> = match npz.by_name(&name) {
                Ok(array) => array,
                Err(e) => {
                    warn!("Skipping voice '{}' in {}: {}", key, path.display(), e);
                    continue;
                }
            };
            match array.into_dimensionality::<Ix3>() {
                Ok(array) if Self::is_style_shape(array.shape()) => {
                    entries.insert(key, array);
                }
                Ok(array) => {
                    warn!("Skipping voice '{}': unexpected shape {:?}", key, array.shape());
                }
                Err(e) => {
                    warn!("Skipping voice '{}': {}", key, e);
                }
            }
        }

        debug!("Loaded {} voices from {}", entries.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn is_style_shape(shape: &[usize]) -> bool {
        shape[0] > 0 && shape[1] == 1 && shape[2] == STYLE_DIM
    }

    /// Bank file this was loaded from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Voice ids, sorted
    #[must_use]
    pub fn voice_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `voice_id` is in the bank
    #[must_use]
    pub fn contains(&self, voice_id: &str) -> bool {
        self.entries.contains_key(voice_id)
    }

    /// Number of voices
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bank holds no usable voice
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frame 0 of `voice_id`, unvalidated
    #[must_use]
    pub fn style_vector(&self, voice_id: &str) -> Option<StyleVector> {
        self.entries
            .get(voice_id)
            .map(|frames| frames.slice(s![0, 0, ..]).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;
    use ndarray_npy::NpzWriter;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn voice(seed: f32) -> Vec<f32> {
        (0..STYLE_DIM).map(|i| ((i as f32) * 0.07 + seed).sin() * 0.3 + 0.05).collect()
    }

    #[test]
    fn test_real_looking_vector_is_valid() {
        assert_eq!(validate_style_vector(&voice(1.0)), Ok(()));
    }

    #[test]
    fn test_defects() {
        assert_eq!(
            validate_style_vector(&[0.5; 10]),
            Err(EmbeddingDefect::WrongLength(10))
        );

        let mut v = voice(0.0);
        v[3] = f32::NAN;
        assert_eq!(validate_style_vector(&v), Err(EmbeddingDefect::NonFinite));

        let mut v = voice(0.0);
        v[7] = -10.5;
        assert_eq!(validate_style_vector(&v), Err(EmbeddingDefect::ExtremeValue));

        assert_eq!(
            validate_style_vector(&[0.0005; STYLE_DIM]),
            Err(EmbeddingDefect::NearZero)
        );

        // Alternating ±1 has mean 0 and variance 1.
        let noise: Vec<f32> = (0..STYLE_DIM).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert_eq!(validate_style_vector(&noise), Err(EmbeddingDefect::UniformNoise));
    }

    #[test]
    fn test_placeholder_is_deterministic() {
        let a = placeholder_vector();
        let b = placeholder_vector();
        assert_eq!(a.len(), STYLE_DIM);
        assert_eq!(a, b);
        assert!(a.iter().all(|x| x.abs() < 1.0));
    }

    #[test]
    fn test_load_skips_malformed_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voices.bin");
        {
            let mut npz = NpzWriter::new(File::create(&path).unwrap());
            let good = Array::from_shape_vec((2, 1, STYLE_DIM), [voice(0.0), voice(1.0)].concat())
                .unwrap();
            npz.add_array("af_bella", &good).unwrap();
            let wrong = Array::from_shape_vec((1, 1, 128), vec![0.1f32; 128]).unwrap();
            npz.add_array("af_short", &wrong).unwrap();
            let flat = Array::from_shape_vec(STYLE_DIM, voice(2.0)).unwrap();
            npz.add_array("am_flat", &flat).unwrap();
            npz.finish().unwrap();
        }

        let bank = VoiceBank::load(&path).unwrap();
        assert_eq!(bank.voice_ids(), vec!["af_bella".to_string()]);
        assert!(!bank.contains("af_short"));
        assert!(bank.style_vector("am_flat").is_none());
        assert_eq!(bank.style_vector("af_bella").unwrap(), voice(0.0));
    }

    #[test]
    fn test_load_rejects_non_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voices.bin");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(VoiceBank::load(&path).is_err());
    }

    // Checks applied in the same order as the validator, written out longhand.
    fn expected_defect(values: &[f32]) -> Option<EmbeddingDefect> {
        if values.iter().any(|x| x.is_nan() || x.is_infinite()) {
            return Some(EmbeddingDefect::NonFinite);
        }
        if values.iter().any(|x| *x > 10.0 || *x < -10.0) {
            return Some(EmbeddingDefect::ExtremeValue);
        }
        if !values.iter().any(|x| x.abs() >= 0.001) {
            return Some(EmbeddingDefect::NearZero);
        }
        let n = values.len() as f64;
        let mean: f64 = values.iter().map(|x| f64::from(*x)).sum::<f64>() / n;
        let variance: f64 = values.iter().map(|x| (f64::from(*x) - mean).powi(2)).sum::<f64>() / n;
        (mean.abs() < 0.01 && variance > 0.8).then_some(EmbeddingDefect::UniformNoise)
    }

    #[test]
    fn test_non_finite_reported_before_extreme() {
        let mut v = voice(0.0);
        v[0] = 50.0;
        v[1] = f32::INFINITY;
        assert_eq!(validate_style_vector(&v), Err(EmbeddingDefect::NonFinite));

        v[1] = f32::NEG_INFINITY;
        assert_eq!(validate_style_vector(&v), Err(EmbeddingDefect::NonFinite));
    }

    #[test]
    fn test_zero_mean_needs_high_variance_to_be_noise() {
        // Mean 0, variance 0.25: a quiet but real-looking embedding.
        let quiet: Vec<f32> = (0..STYLE_DIM).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_eq!(validate_style_vector(&quiet), Ok(()));

        // High variance but the mean is clear of zero.
        let offset: Vec<f32> = (0..STYLE_DIM)
            .map(|i| if i % 2 == 0 { 2.05 } else { -2.0 })
            .collect();
        assert_eq!(validate_style_vector(&offset), Ok(()));

        // A single value at the near-zero threshold keeps the vector alive.
        let mut sparse = vec![0.0f32; STYLE_DIM];
        sparse[100] = 0.001;
        assert_eq!(validate_style_vector(&sparse), Ok(()));
    }

    fn mixed_value() -> impl Strategy<Value = f32> {
        prop_oneof![
            4 => -10.0f32..=10.0,
            1 => -0.001f32..0.001,
            1 => Just(0.0f32),
        ]
    }

    proptest! {
        #[test]
        fn prop_mixed_sign_vectors_classified(
            values in prop::collection::vec(mixed_value(), STYLE_DIM)
        ) {
            prop_assert_eq!(validate_style_vector(&values).err(), expected_defect(&values));
        }

        #[test]
        fn prop_symmetric_vectors_split_on_variance(
            half in prop::collection::vec(-10.0f32..=10.0, STYLE_DIM / 2)
        ) {
            // Each value paired with its negation: the mean is exactly zero.
            let values: Vec<f32> = half.iter().copied().chain(half.iter().map(|x| -x)).collect();
            let expected = expected_defect(&values);
            prop_assert!(expected != Some(EmbeddingDefect::ExtremeValue));
            prop_assert_eq!(validate_style_vector(&values).err(), expected);
        }

        #[test]
        fn prop_near_zero_vectors_rejected(
            values in prop::collection::vec(-0.000_99f32..0.000_99, STYLE_DIM)
        ) {
            prop_assert_eq!(validate_style_vector(&values), Err(EmbeddingDefect::NearZero));
        }

        #[test]
        fn prop_bounded_non_uniform_vectors_validate(
            values in prop::collection::vec(0.05f32..10.0, STYLE_DIM)
        ) {
            // Strictly positive values keep the mean away from zero.
            prop_assert!(validate_style_vector(&values).is_ok());
        }

        #[test]
        fn prop_nan_or_extreme_fails(
            mut values in prop::collection::vec(-10.0f32..10.0, STYLE_DIM),
            idx in 0..STYLE_DIM,
            bad in prop_oneof![Just(f32::NAN), Just(f32::INFINITY), 10.001f32..1e6, -1e6f32..-10.001],
        ) {
            values[idx] = bad;
            prop_assert!(validate_style_vector(&values).is_err());
        }
    }
}
