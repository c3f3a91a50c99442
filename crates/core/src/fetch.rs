//! The remote-fetch contract and payload naming.
//!
//! Core never talks to the network. A [`RemoteFetcher`] implementation (the
//! CLI's ERDDAP client, or a fake in tests) writes one window's payload to a
//! path chosen by the caller.

use std::path::Path;
use std::time::Duration;

use crate::error::FetchError;
use crate::request::SourceId;
use crate::window::DateWindow;

/// Result of a successful fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Payload written to the destination path.
    Written { bytes: u64 },
    /// The service holds no rows for this window. Nothing was written.
    NoData,
}

/// Retrieves one window's payload.
///
/// Implementations must write to `dest` only, and must be safe to call from
/// several worker threads at once for distinct windows.
pub trait RemoteFetcher: Sync {
    fn fetch(
        &self,
        source: &SourceId,
        window: &DateWindow,
        dest: &Path,
    ) -> Result<FetchOutcome, FetchError>;
}

impl<F: RemoteFetcher + ?Sized> RemoteFetcher for &F {
    fn fetch(
        &self,
        source: &SourceId,
        window: &DateWindow,
        dest: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        (**self).fetch(source, window, dest)
    }
}

/// `<dataset>_<YYYY-MM>.nc`
pub fn payload_file_name(source: &SourceId, window: &DateWindow) -> String {
    format!("{}_{}.nc", source.dataset(), window.label())
}

/// Wraps a fetcher and retries transient failures with exponential backoff.
///
/// Fatal errors and `NoData` are returned immediately.
pub struct RetryingFetcher<F> {
    inner: F,
    max_retries: u32,
    initial_backoff: Duration,
}

impl<F: RemoteFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, max_retries: u32, initial_backoff: Duration) -> Self {
        RetryingFetcher {
            inner,
            max_retries,
            initial_backoff,
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: RemoteFetcher> RemoteFetcher for RetryingFetcher<F> {
    fn fetch(
        &self,
        source: &SourceId,
        window: &DateWindow,
        dest: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;
        loop {
            match self.inner.fetch(source, window, dest) {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        window = %window,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "{}; retrying",
                        err
                    );
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}
