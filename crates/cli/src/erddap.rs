//! ERDDAP tabledap client.
//!
//! Three endpoints are used, all relative to the normalized dataset URL:
//!
//! - `<url>.csv0?time&orderByMinMax("time")` -- first and last timestamp
//! - `<url>.ncCFMA?&time>=<start>&time<<end>` -- one month of data as NetCDF
//! - `<host>/erddap/info/<dataset>/index.json` -- dataset attributes

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use bagsync_core::window::{format_timestamp, parse_boundary};
use bagsync_core::{DateWindow, FetchError, FetchOutcome, RemoteFetcher, SourceId};
use serde::Deserialize;
use time::OffsetDateTime;

/// Body text ERDDAP sends with a 404 when a query matches no rows.
const NO_MATCHING_RESULTS: &str = "Your query produced no matching results";

// ── Errors ──────────────────────────────────────────────────────────────────

/// Failures of the metadata endpoints. Window downloads report
/// [`FetchError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ErddapError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned http status {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InfoResponse {
    table: InfoTable,
}

/// Rows are `[row type, variable, attribute, data type, value]`.
#[derive(Debug, Deserialize)]
struct InfoTable {
    rows: Vec<Vec<serde_json::Value>>,
}

// ── URLs ────────────────────────────────────────────────────────────────────

pub fn range_url(source: &SourceId) -> String {
    format!("{}.csv0?time&orderByMinMax(%22time%22)", source.url())
}

pub fn window_url(source: &SourceId, window: &DateWindow) -> String {
    format!(
        "{}.ncCFMA?&time%3E={}&time%3C{}",
        source.url(),
        format_timestamp(window.start_instant()),
        format_timestamp(window.end_instant())
    )
}

pub fn info_url(source: &SourceId) -> String {
    format!(
        "{}/index.json",
        source.url().replacen("/tabledap/", "/info/", 1)
    )
}

// ── Client ──────────────────────────────────────────────────────────────────

/// Blocking HTTP client for one ERDDAP server.
pub struct ErddapClient {
    agent: ureq::Agent,
}

impl ErddapClient {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build();
        ErddapClient {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// First and last timestamps present in the dataset.
    pub fn available_range(
        &self,
        source: &SourceId,
    ) -> Result<(OffsetDateTime, OffsetDateTime), ErddapError> {
        let url = range_url(source);
        let response = self.get_ok(&url)?;
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|e| ErddapError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;
        parse_range(&body).map_err(|reason| ErddapError::Malformed { url, reason })
    }

    /// The dataset's `NC_GLOBAL` `title` attribute.
    pub fn dataset_title(&self, source: &SourceId) -> Result<String, ErddapError> {
        let url = info_url(source);
        let response = self.get_ok(&url)?;
        let info: InfoResponse =
            response
                .into_body()
                .read_json()
                .map_err(|e| ErddapError::Malformed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
        title_from_info(&info).ok_or_else(|| ErddapError::Malformed {
            url,
            reason: "no NC_GLOBAL title attribute".to_string(),
        })
    }

    fn get_ok(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, ErddapError> {
        tracing::debug!(%url, "GET");
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| ErddapError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ErddapError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

impl RemoteFetcher for ErddapClient {
    fn fetch(
        &self,
        source: &SourceId,
        window: &DateWindow,
        dest: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        let url = window_url(source, window);
        let transient = |message: String| FetchError::Transient {
            window: window.label(),
            message,
        };
        let fatal = |message: String| FetchError::Fatal {
            window: window.label(),
            message,
        };

        tracing::debug!(%url, %window, "GET");
        let response = self.agent.get(&url).call().map_err(|e| {
            if matches!(e, ureq::Error::BadUri(_)) {
                fatal(e.to_string())
            } else {
                transient(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 404 {
            let body = response.into_body().read_to_string().unwrap_or_default();
            if body.contains(NO_MATCHING_RESULTS) {
                return Ok(FetchOutcome::NoData);
            }
            return Err(fatal(format!("http status {}", status)));
        }
        if !(200..300).contains(&status) {
            let message = format!("http status {}", status);
            return Err(if is_retryable_status(status) {
                transient(message)
            } else {
                fatal(message)
            });
        }

        let mut file = File::create(dest)
            .map_err(|e| fatal(format!("could not create '{}': {}", dest.display(), e)))?;
        let mut reader = response.into_body().into_reader();
        let bytes = io::copy(&mut reader, &mut file)
            .map_err(|e| transient(format!("download interrupted: {}", e)))?;
        file.sync_all()
            .map_err(|e| fatal(format!("could not flush '{}': {}", dest.display(), e)))?;

        Ok(FetchOutcome::Written { bytes })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// 429 and 5xx are worth retrying; other statuses are a rejection.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Parse the two-line `orderByMinMax` CSV body.
fn parse_range(body: &str) -> Result<(OffsetDateTime, OffsetDateTime), String> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
    let (Some(first), Some(last)) = (lines.next(), lines.next()) else {
        return Err(format!("expected two timestamps, got '{}'", body.trim()));
    };
    let start = parse_boundary(first).map_err(|e| e.to_string())?;
    let end = parse_boundary(last).map_err(|e| e.to_string())?;
    Ok((start, end))
}

fn title_from_info(info: &InfoResponse) -> Option<String> {
    info.table.rows.iter().find_map(|row| {
        let cell = |i: usize| row.get(i).and_then(serde_json::Value::as_str);
        if cell(0) == Some("attribute") && cell(1) == Some("NC_GLOBAL") && cell(2) == Some("title")
        {
            cell(4).map(str::to_string)
        } else {
            None
        }
    })
}
