//! HTTP download of image bytes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::domain::errors::{LoadError, LoadResult};
use crate::infrastructure::config::NetworkConfig;

/// Decides the outcome of a finished or interrupted download.
///
/// `expected` is the advertised content length, zero when unknown. A
/// cancellation that arrives after every advertised byte was received does
/// not discard the download.
///
/// # Errors
/// Returns `Cancelled` or `FetchSizeMismatch`.
pub fn settle_download(cancelled: bool, received: u64, expected: u64) -> LoadResult<()> {
    if cancelled && (expected == 0 || received != expected) {
        return Err(LoadError::Cancelled);
    }
    if expected > 0 && received != expected {
        return Err(LoadError::FetchSizeMismatch { expected, received });
    }
    Ok(())
}

/// Streams remote images into the cache directory.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the configured timeouts and redirect limit.
    ///
    /// # Errors
    /// Returns `Network` if the HTTP client cannot be built.
    pub fn new(config: &NetworkConfig) -> LoadResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| LoadError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Downloads `url`, returning the bytes received.
    ///
    /// Bytes are also streamed into `dest` when one is given. `progress` is
    /// called with (received, advertised total) after every chunk and `cancel`
    /// is checked at the same point. On error the caller owns cleanup of
    /// `dest`.
    ///
    /// # Errors
    /// Returns `FetchStatus` for non-success responses, `Network` for
    /// transport failures, `Io` if `dest` cannot be written, or the outcome
    /// of [`settle_download`].
    pub async fn download(
        &self,
        url: &str,
        dest: Option<&Path>,
        cancel: &AtomicBool,
        progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> LoadResult<Bytes> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Image request rejected");
            return Err(LoadError::FetchStatus {
                status: status.as_u16(),
            });
        }

        let expected = response.content_length().unwrap_or(0);
        let mut file = match dest {
            Some(path) => Some(File::create(path).await?),
            None => None,
        };
        let mut body = BytesMut::with_capacity(usize::try_from(expected).unwrap_or(0));
        let mut cancelled = false;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    let received = body.len() as u64;
                    if expected > 0 && received < expected {
                        debug!(url = %url, received, expected, error = %e, "Image body ended early");
                        settle_download(cancel.load(Ordering::Acquire), received, expected)?;
                    }
                    return Err(LoadError::network(format!("Failed to read body: {e}")));
                }
            };
            if let Some(file) = file.as_mut() {
                file.write_all(&chunk).await?;
            }
            body.extend_from_slice(&chunk);
            progress(body.len() as u64, expected);

            if cancel.load(Ordering::Acquire) {
                cancelled = true;
                break;
            }
        }
        if let Some(file) = file.as_mut() {
            file.flush().await?;
        }

        let received = body.len() as u64;
        settle_download(cancelled, received, expected)?;

        trace!(url = %url, size = received, "Downloaded image");
        Ok(body.freeze())
    }
}
