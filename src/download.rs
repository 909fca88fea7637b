use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::UpgradeError;

const CHUNK_SIZE: usize = 8 * 1024;

/// Event emitted by a download. A finished download always ends with
/// exactly one `Success` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Success,
    Error(String),
    Progress(f32),
}

impl DownloadOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadOutcome::Progress(_))
    }
}

pub type DownloadEvents<'a> = Box<dyn Iterator<Item = DownloadOutcome> + 'a>;

pub trait ArchiveClient: Send + Sync {
    /// Streams `url` into `destination`. The returned sequence is lazy:
    /// bytes are only transferred while it is being consumed.
    fn download<'a>(&'a self, url: &str, destination: &Path) -> DownloadEvents<'a>;
}

/// Progress shown when the server does not announce a content length.
/// Each chunk adds a random share of `step`, never passing `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticProgress {
    pub step: f32,
    pub ceiling: f32,
}

impl Default for SyntheticProgress {
    fn default() -> Self {
        Self {
            step: 0.05,
            ceiling: 0.8,
        }
    }
}

#[derive(Clone)]
pub struct HttpArchiveClient {
    client: Client,
    synthetic: SyntheticProgress,
}

impl HttpArchiveClient {
    pub fn new(timeout: Duration) -> Result<Self, UpgradeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hybrid-upgrader/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| UpgradeError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| UpgradeError::Network(err.to_string()))?;
        Ok(Self {
            client,
            synthetic: SyntheticProgress::default(),
        })
    }

    pub fn with_synthetic_progress(mut self, synthetic: SyntheticProgress) -> Self {
        self.synthetic = synthetic;
        self
    }

    fn open(&self, url: &str, destination: &Path) -> Result<Transfer, UpgradeError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| UpgradeError::Network(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(UpgradeError::HttpStatus {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
        }
        // Truncate first so a re-run never appends to an older archive.
        let file =
            File::create(destination).map_err(|err| UpgradeError::Filesystem(err.to_string()))?;

        let total = response.content_length().filter(|len| *len > 0);
        debug!(url, ?total, "download started");
        Ok(Transfer {
            response,
            file,
            destination: destination.to_path_buf(),
            total,
            written: 0,
            synthetic: self.synthetic,
            synthetic_progress: 0.0,
            buffer: vec![0; CHUNK_SIZE],
        })
    }
}

impl ArchiveClient for HttpArchiveClient {
    fn download<'a>(&'a self, url: &str, destination: &Path) -> DownloadEvents<'a> {
        let download = match self.open(url, destination) {
            Ok(transfer) => HttpDownload {
                transfer: Some(transfer),
                pending: VecDeque::new(),
            },
            Err(err) => HttpDownload {
                transfer: None,
                pending: VecDeque::from([DownloadOutcome::Error(err.to_string())]),
            },
        };
        Box::new(download)
    }
}

pub struct HttpDownload {
    transfer: Option<Transfer>,
    pending: VecDeque<DownloadOutcome>,
}

impl Iterator for HttpDownload {
    type Item = DownloadOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        let transfer = self.transfer.as_mut()?;
        match transfer.read_chunk() {
            Ok(Some(progress)) => Some(DownloadOutcome::Progress(progress)),
            Ok(None) => {
                let transfer = self.transfer.take()?;
                self.pending.extend(transfer.finish());
                self.pending.pop_front()
            }
            Err(err) => {
                self.transfer = None;
                Some(DownloadOutcome::Error(err.to_string()))
            }
        }
    }
}

struct Transfer {
    response: Response,
    file: File,
    destination: PathBuf,
    total: Option<u64>,
    written: u64,
    synthetic: SyntheticProgress,
    synthetic_progress: f32,
    buffer: Vec<u8>,
}

impl Transfer {
    /// Reads and appends one chunk; `None` once the body is exhausted.
    fn read_chunk(&mut self) -> Result<Option<f32>, UpgradeError> {
        let read = loop {
            match self.response.read(&mut self.buffer) {
                Ok(read) => break read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(UpgradeError::Network(err.to_string())),
            }
        };
        if read == 0 {
            return Ok(None);
        }
        self.file
            .write_all(&self.buffer[..read])
            .map_err(|err| UpgradeError::Filesystem(err.to_string()))?;
        self.written += read as u64;

        let progress = match self.total {
            Some(total) => (self.written as f32 / total as f32).min(1.0),
            None => {
                let increment = rand::random::<f32>() * self.synthetic.step;
                self.synthetic_progress =
                    (self.synthetic_progress + increment).min(self.synthetic.ceiling);
                self.synthetic_progress
            }
        };
        Ok(Some(progress))
    }

    fn finish(mut self) -> Vec<DownloadOutcome> {
        if let Err(err) = self.file.flush() {
            return vec![DownloadOutcome::Error(
                UpgradeError::Filesystem(err.to_string()).to_string(),
            )];
        }
        debug!(
            path = %self.destination.display(),
            bytes = self.written,
            "archive saved"
        );
        let mut events = Vec::with_capacity(2);
        if self.total.is_none() {
            events.push(DownloadOutcome::Progress(1.0));
        }
        events.push(DownloadOutcome::Success);
        events
    }
}
