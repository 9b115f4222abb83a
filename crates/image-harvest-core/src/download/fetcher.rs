use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::{header, StatusCode};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::sleep;

use crate::config::{DownloadConfig, ValidationConfig, DEFAULT_USER_AGENTS};
use crate::error::{Error, Result};
use crate::processing::codec::save_payload_with;
use crate::session::{Gate, SessionControl};
use crate::types::DownloadTask;
use crate::validation::validate_mime_type;

/// `Accept` header sent with every request
pub const IMAGE_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Upper bound of the random delay added to request pacing
const PACING_JITTER_MS: u64 = 100;

/// First free name among `<index>.jpeg`, `<index>.1.jpeg`, `<index>.2.jpeg`, ...
pub fn next_available_path(dir: &Path, index: u64) -> PathBuf {
    let first = dir.join(format!("{}.jpeg", index));
    if !first.exists() {
        return first;
    }
    (1u64..)
        .map(|n| dir.join(format!("{}.{}.jpeg", index, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Performs single HTTP fetches under a global concurrency limit.
///
/// The semaphore permit covers the request and the body read only; decoding
/// and writing happen on the blocking pool after the permit is released.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    config: DownloadConfig,
    validation: ValidationConfig,
}

impl Fetcher {
    pub fn new(config: DownloadConfig, validation: ValidationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            validation,
        })
    }

    /// One attempt at `task`, returning the number of bytes written
    pub async fn fetch(&self, task: &DownloadTask) -> Result<u64> {
        self.check_url(task)?;
        let permit = self.acquire().await?;
        self.pace().await;
        self.fetch_with_permit(task, permit).await
    }

    /// Like [`fetch`](Self::fetch), but follows `control` until the request
    /// is sent. A cancel while queued gives up with [`Error::Cancelled`]; a
    /// pause hands the permit back and queues again after resume. Once the
    /// request is sent the attempt runs to completion.
    pub async fn fetch_unless_cancelled(
        &self,
        task: &DownloadTask,
        control: &SessionControl,
    ) -> Result<u64> {
        self.check_url(task)?;
        loop {
            let permit = tokio::select! {
                biased;
                _ = control.cancelled() => return Err(Error::Cancelled),
                permit = self.acquire() => permit?,
            };
            self.pace().await;

            if !control.is_paused() && !control.is_cancelled() {
                return self.fetch_with_permit(task, permit).await;
            }

            drop(permit);
            debug!("Holding {} until downloads resume", task.url);
            if control.wait_if_paused().await == Gate::Stop {
                return Err(Error::Cancelled);
            }
        }
    }

    fn check_url(&self, task: &DownloadTask) -> Result<()> {
        if self.validation.validate_download_request(&task.url, None) {
            Ok(())
        } else {
            Err(Error::InvalidUrl(task.url.clone()))
        }
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore.acquire().await.map_err(|_| Error::Cancelled)
    }

    async fn fetch_with_permit(
        &self,
        task: &DownloadTask,
        permit: SemaphorePermit<'_>,
    ) -> Result<u64> {
        let url = task.url.as_str();
        let mut response = self
            .client
            .get(url)
            .header(header::USER_AGENT, self.pick_user_agent())
            .header(header::ACCEPT, IMAGE_ACCEPT)
            .send()
            .await
            .map_err(|source| Error::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status, response.headers()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !validate_mime_type(&content_type) {
            return Err(Error::UnsupportedMimeType(content_type));
        }

        if let Some(declared) = response.content_length() {
            self.check_size(declared)?;
        }

        let body = self.read_body(url, &mut response).await?;
        self.check_size(body.len() as u64)?;

        drop(permit);
        debug!("Fetched {} bytes from {}", body.len(), url);

        let dir = task.target_dir.clone();
        let index = task.target_index;
        let max_size = self.validation.max_image_size;
        let quality = self.config.jpeg_quality;
        let (path, written) = tokio::task::spawn_blocking(move || {
            let path = next_available_path(&dir, index);
            save_payload_with(&body, &path, max_size, quality).map(|written| (path, written))
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        info!("Saved {} ({} bytes) from {}", path.display(), written, url);
        Ok(written)
    }

    /// Read the body chunk by chunk, giving up as soon as it outgrows
    /// `max_download_size`. Chunked and gzip-decoded responses carry no
    /// usable Content-Length, so the running total is the only bound.
    async fn read_body(&self, url: &str, response: &mut reqwest::Response) -> Result<Vec<u8>> {
        let max = self.validation.max_download_size;
        let capacity = response.content_length().unwrap_or(0).min(max);
        let mut body = Vec::with_capacity(capacity as usize);

        while let Some(chunk) = response.chunk().await.map_err(|source| Error::Network {
            url: url.to_string(),
            source,
        })? {
            let size = body.len() as u64 + chunk.len() as u64;
            if size > max {
                debug!("Body of {} passed {} bytes; dropping it", url, max);
                return Err(Error::InvalidSize {
                    size,
                    min: self.validation.min_file_size,
                    max,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if self.validation.validate_download_size(size) {
            Ok(())
        } else {
            Err(Error::InvalidSize {
                size,
                min: self.validation.min_file_size,
                max: self.validation.max_download_size,
            })
        }
    }

    fn pick_user_agent(&self) -> String {
        let mut rng = rand::rng();
        self.config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].to_string())
    }

    async fn pace(&self) {
        let pacing = self.pacing_delay();
        if !pacing.is_zero() {
            sleep(pacing).await;
        }
    }

    fn pacing_delay(&self) -> Duration {
        let base = self.config.request_delay();
        if base.is_zero() {
            return Duration::ZERO;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=PACING_JITTER_MS))
    }
}

fn status_error(url: &str, status: StatusCode, headers: &header::HeaderMap) -> Error {
    let url = url.to_string();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        Error::RateLimited { url, retry_after }
    } else if status.is_server_error() {
        Error::Http { url, status }
    } else {
        Error::Client { url, status }
    }
}
