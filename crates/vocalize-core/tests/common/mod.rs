//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ndarray::Array;
use ndarray_npy::NpzWriter;
use parking_lot::Mutex;
use vocalize_core::model::{FetchSummary, Fetcher};
use vocalize_core::STYLE_DIM;

/// How a fake fetch should behave for a given file name
#[derive(Debug, Clone)]
pub enum Reply {
    Body(Vec<u8>),
    /// Write this many bytes, then fail as if the connection dropped
    CutOff(Vec<u8>),
    Slow(Vec<u8>, Duration),
}

/// Serves bodies keyed by the last URL segment and records every request
#[derive(Debug, Default)]
pub struct RecordingFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, filename: &str, reply: Reply) {
        self.replies.lock().insert(filename.to_string(), reply);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Fetcher for RecordingFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> anyhow::Result<FetchSummary> {
        self.requests.lock().push(url.to_string());
        let name = url.rsplit('/').next().unwrap_or_default();
        let reply = self.replies.lock().get(name).cloned();

        match reply {
            Some(Reply::Body(body)) => {
                sink.write_all(&body)?;
                Ok(FetchSummary {
                    bytes_written: body.len() as u64,
                    expected_len: Some(body.len() as u64),
                })
            }
            Some(Reply::CutOff(partial)) => {
                sink.write_all(&partial)?;
                anyhow::bail!("connection reset after {} bytes", partial.len())
            }
            Some(Reply::Slow(body, delay)) => {
                std::thread::sleep(delay);
                sink.write_all(&body)?;
                Ok(FetchSummary {
                    bytes_written: body.len() as u64,
                    expected_len: None,
                })
            }
            None => anyhow::bail!("HTTP 404 Not Found for {url}"),
        }
    }
}

/// A plausible voice embedding that passes validation
pub fn style(seed: f32) -> Vec<f32> {
    (0..STYLE_DIM)
        .map(|i| ((i as f32) * 0.13 + seed).sin() * 0.25 + 0.08)
        .collect()
}

/// Write an NPZ bank with one `[frames, 1, 256]` entry per voice
pub fn write_bank(path: &Path, voices: &[(&str, Vec<f32>)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut npz = NpzWriter::new(File::create(path).unwrap());
    for (name, frame0) in voices {
        let frames = [frame0.clone(), style(9.0)].concat();
        let array = Array::from_shape_vec((2, 1, STYLE_DIM), frames).unwrap();
        npz.add_array(*name, &array).unwrap();
    }
    npz.finish().unwrap();
}

/// Local directory direct-download models land in
pub fn direct_dir(models_dir: &Path) -> PathBuf {
    models_dir.join("models--direct_download").join("local")
}

/// Put a complete Kokoro install with the given voices under `models_dir`
pub fn install_kokoro(models_dir: &Path, voices: &[(&str, Vec<f32>)]) -> PathBuf {
    let local = direct_dir(models_dir);
    std::fs::create_dir_all(&local).unwrap();
    std::fs::write(local.join("kokoro-v1.0.onnx"), b"onnx graph bytes").unwrap();
    write_bank(&local.join("voices-v1.0.bin"), voices);
    local
}
