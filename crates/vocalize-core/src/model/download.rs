//! File fetching for the model cache.
//!
//! Downloads stream into a uniquely named `.part` file next to the target and
//! are renamed into place only after the byte count (and digest, when the
//! registry pins one) checks out. A failed download never leaves a file at
//! the target path.

use std::fmt::Debug;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

/// Outcome of a single fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    /// Bytes written to the sink
    pub bytes_written: u64,
    /// Length announced by the server, if any
    pub expected_len: Option<u64>,
}

/// Network seam used by the model cache manager
pub trait Fetcher: Send + Sync + Debug {
    /// Stream the body at `url` into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, non-success statuses, or
    /// write failures on the sink.
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<FetchSummary>;
}

const CHUNK_SIZE: usize = 64 * 1024;
const CHUNK_QUEUE: usize = 8;

/// Blocking HTTP fetcher backed by `reqwest` with rustls
///
/// Safe to call from a thread that is running a tokio runtime: the request
/// is then moved to a helper thread, and the calling thread still blocks
/// until the body is written. Async callers should prefer the `_async`
/// entry points on the manager and assembler, which use `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    user_agent: String,
}

impl HttpFetcher {
    /// Fetcher with a 30 minute per-request timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            user_agent: format!("vocalize/{}", crate::VERSION),
        }
    }

    /// Override the per-request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    fn client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")
    }

    fn open(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .client()?
            .get(url)
            .send()
            .with_context(|| format!("Request to {url} failed"))?;

        if !response.status().is_success() {
            bail!("HTTP {} for {}", response.status(), url);
        }
        Ok(response)
    }

    fn fetch_here(&self, url: &str, sink: &mut dyn Write) -> Result<FetchSummary> {
        let mut response = self.open(url)?;
        let expected_len = response.content_length();
        let bytes_written = response
            .copy_to(sink)
            .with_context(|| format!("Failed reading body of {url}"))?;

        Ok(FetchSummary {
            bytes_written,
            expected_len,
        })
    }

    fn stream_chunks(&self, url: &str, chunks: SyncSender<Vec<u8>>) -> Result<Option<u64>> {
        let mut response = self.open(url)?;
        let expected_len = response.content_length();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = response
                .read(&mut buf)
                .with_context(|| format!("Failed reading body of {url}"))?;
            if n == 0 {
                return Ok(expected_len);
            }
            if chunks.send(buf[..n].to_vec()).is_err() {
                bail!("Download of {url} abandoned by the writer");
            }
        }
    }

    // The blocking client panics when driven from a thread inside a tokio
    // runtime, so the request runs on a scoped thread and the body is
    // written out here.
    fn fetch_off_runtime(&self, url: &str, sink: &mut dyn Write) -> Result<FetchSummary> {
        std::thread::scope(|scope| {
            let (tx, rx) = sync_channel::<Vec<u8>>(CHUNK_QUEUE);
            let request = scope.spawn(move || self.stream_chunks(url, tx));

            let mut bytes_written = 0u64;
            let mut sink_error = None;
            for chunk in rx {
                if let Err(e) = sink.write_all(&chunk) {
                    sink_error = Some(e);
                    break;
                }
                bytes_written += chunk.len() as u64;
            }

            let joined = request
                .join()
                .map_err(|_| anyhow::anyhow!("Download thread for {url} panicked"))?;
            if let Some(e) = sink_error {
                return Err(e).with_context(|| format!("Failed writing body of {url}"));
            }
            Ok(FetchSummary {
                bytes_written,
                expected_len: joined?,
            })
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<FetchSummary> {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.fetch_off_runtime(url, sink)
        } else {
            self.fetch_here(url, sink)
        }
    }
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn part_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}.{}.part", uuid::Uuid::new_v4().simple()))
}

/// Download `url` to `target`, replacing any existing file.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns an error if the fetch fails, the body is empty or shorter than
/// announced, the digest does not match `expected_sha256`, or the file
/// cannot be moved into place. The partial file is removed in every case.
pub fn download_to(
    fetcher: &dyn Fetcher,
    url: &str,
    target: &Path,
    expected_sha256: Option<&str>,
) -> Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = part_path(target);
    let result = write_part(fetcher, url, &tmp, expected_sha256)
        .and_then(|bytes| promote(&tmp, target).map(|()| bytes));

    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove partial download {}: {}", tmp.display(), e);
            }
        }
    }
    result
}

fn write_part(
    fetcher: &dyn Fetcher,
    url: &str,
    tmp: &Path,
    expected_sha256: Option<&str>,
) -> Result<u64> {
    let file = File::create(tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut writer = HashingWriter {
        inner: BufWriter::new(file),
        hasher: Sha256::new(),
    };

    let summary = fetcher.fetch(url, &mut writer)?;
    writer.flush().context("Failed to flush download")?;

    let HashingWriter { inner, hasher } = writer;
    let file = inner
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush download: {}", e.error()))?;
    file.sync_all().context("Failed to sync download")?;

    if summary.bytes_written == 0 {
        bail!("Empty response body from {url}");
    }
    if let Some(expected) = summary.expected_len {
        if expected != summary.bytes_written {
            bail!(
                "Truncated download from {url}: expected {expected} bytes, got {}",
                summary.bytes_written
            );
        }
    }
    if let Some(expected) = expected_sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            bail!("Checksum mismatch for {url}: expected {expected}, got {actual}");
        }
    }

    Ok(summary.bytes_written)
}

fn promote(tmp: &Path, target: &Path) -> Result<()> {
    if let Err(err) = std::fs::rename(tmp, target) {
        // Some platforms refuse to rename over an existing file.
        if target.exists() {
            std::fs::remove_file(target)
                .with_context(|| format!("Failed replacing {}", target.display()))?;
            std::fs::rename(tmp, target)
                .with_context(|| format!("Failed moving download to {}", target.display()))?;
        } else {
            return Err(err).with_context(|| format!("Failed moving download to {}", target.display()));
        }
    }
    Ok(())
}
