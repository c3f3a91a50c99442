//! The immutable description of one archive run.

use std::fmt;

use time::OffsetDateTime;

use crate::error::PlanError;
use crate::window::{self, DateWindow};

/// A normalized tabledap dataset URL.
///
/// Normalization lower-cases the URL, drops a trailing `.html` (the dataset's
/// HTML form page) and trailing slashes. The dataset name is the last path
/// segment and is what payload file names and default bag names derive from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    url: String,
    dataset: String,
}

impl SourceId {
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        let mut url = raw.trim().to_lowercase();
        if let Some(stripped) = url.strip_suffix(".html") {
            url = stripped.to_string();
        }
        let url = url.trim_end_matches('/').to_string();

        let invalid = |reason: &str| PlanError::InvalidSource {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("expected an http or https URL"));
        }
        if !url.contains("/tabledap/") {
            return Err(invalid("expected a tabledap dataset URL"));
        }

        let dataset = url.rsplit('/').next().unwrap_or_default().to_string();
        if dataset.is_empty() || dataset == "tabledap" {
            return Err(invalid("URL does not name a dataset"));
        }

        Ok(SourceId { url, dataset })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Dataset name without its final dot-separated segment, if it has one.
    pub fn station(&self) -> &str {
        match self.dataset.rsplit_once('.') {
            Some((head, _)) if !head.is_empty() => head,
            _ => &self.dataset,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// What the operator asked for. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub source: SourceId,
    pub requested_start: Option<OffsetDateTime>,
    pub requested_end: Option<OffsetDateTime>,
    pub force_refresh: bool,
}

impl ArchiveRequest {
    /// Build a request, rejecting a start that lies after the end.
    pub fn new(
        source: SourceId,
        requested_start: Option<OffsetDateTime>,
        requested_end: Option<OffsetDateTime>,
        force_refresh: bool,
    ) -> Result<Self, PlanError> {
        window::check_requested(requested_start, requested_end)?;
        Ok(ArchiveRequest {
            source,
            requested_start,
            requested_end,
            force_refresh,
        })
    }
}

/// Default bag directory name: `<dataset>_<first start>_<last end>`.
///
/// Returns `None` for an empty plan.
pub fn default_bag_name(source: &SourceId, windows: &[DateWindow]) -> Option<String> {
    let first = windows.first()?;
    let last = windows.last()?;
    Some(format!(
        "{}_{}_{}",
        source.dataset(),
        first.start(),
        last.end()
    ))
}
