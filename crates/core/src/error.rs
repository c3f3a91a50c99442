use std::io;
use std::path::PathBuf;

/// Errors raised while turning a request into a window plan.
///
/// All of these are fatal for the run: no fetch is attempted once the plan
/// cannot be trusted.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A boundary was not in one of the two accepted date formats.
    #[error("invalid date '{input}': expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ")]
    InvalidDate { input: String },

    /// Start is not before end once both bounds are normalized to months.
    #[error("invalid range: start {start} is not before end {end}")]
    InvalidRange { start: String, end: String },

    /// A month boundary could not be represented by the calendar type.
    #[error("date {date} is outside the supported calendar range")]
    OutOfCalendar { date: String },

    /// The dataset URL cannot name a tabledap dataset.
    #[error("invalid source '{url}': {reason}")]
    InvalidSource { url: String, reason: String },
}

/// A failure while retrieving one window's payload.
///
/// Fetch errors are isolated to their window; sibling windows continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network-layer failure or server-side error. Eligible for retry.
    #[error("window {window}: transient fetch failure: {message}")]
    Transient { window: String, message: String },

    /// Permanent rejection (client error, malformed source).
    #[error("window {window}: fetch rejected: {message}")]
    Fatal { window: String, message: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Label of the window this error belongs to.
    pub fn window(&self) -> &str {
        match self {
            FetchError::Transient { window, .. } | FetchError::Fatal { window, .. } => window,
        }
    }
}

/// A per-window failure recorded in the sync report.
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The download completed but could not be moved into the payload directory.
    #[error("window {window}: could not store payload at '{}': {source}", .path.display())]
    Store {
        window: String,
        path: PathBuf,
        source: io::Error,
    },
}

/// Errors that abort the whole sync run before any window is processed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("could not prepare '{}' for downloads: {source}", .path.display())]
    Prepare { path: PathBuf, source: io::Error },

    #[error("a fetch worker panicked")]
    WorkerPanicked,
}

/// Filesystem failures while placing payloads or sealing a bag.
///
/// Payload files already on disk are never removed when one of these is
/// returned, and no partially written manifest or tag file is left behind.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("could not create directory '{}': {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("payload path '{}' has no file name", .path.display())]
    InvalidPayload { path: PathBuf },

    #[error("could not copy payload '{}' into the bag: {source}", .path.display())]
    CopyPayload { path: PathBuf, source: io::Error },

    #[error("could not read payload '{}': {source}", .path.display())]
    ReadPayload { path: PathBuf, source: io::Error },

    #[error("could not list '{}': {source}", .path.display())]
    ListPayload { path: PathBuf, source: io::Error },

    #[error("could not write tag file '{name}': {source}")]
    WriteTag { name: String, source: io::Error },

    #[error("'{}' is not a bag: {reason}", .path.display())]
    NotABag { path: PathBuf, reason: String },

    #[error("{file} line {line} is malformed: '{text}'")]
    MalformedManifest {
        file: String,
        line: usize,
        text: String,
    },
}

/// Top-level error for callers that drive a whole archive run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}
