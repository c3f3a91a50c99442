//! Staleness policy: whether a window's payload is skipped, fetched or refetched.

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::window::DateWindow;

/// What to do with one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    Skip,
    Fetch,
    Refetch,
}

impl FetchDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchDecision::Skip => "skip",
            FetchDecision::Fetch => "fetch",
            FetchDecision::Refetch => "refetch",
        }
    }
}

/// Why a decision was made. Reporting only; never feeds back into the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Forced,
    Missing,
    /// Captured before the window ended. `window_open` is true when the month
    /// has not yet elapsed at decision time.
    Stale { window_open: bool },
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub window: DateWindow,
    pub action: FetchDecision,
    pub reason: DecisionReason,
}

/// Snapshot of a window's payload file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileState {
    pub path: PathBuf,
    pub exists: bool,
    pub modified_at: Option<OffsetDateTime>,
}

impl LocalFileState {
    /// Read the current state of `path`. Anything other than a regular file
    /// counts as missing.
    pub fn probe(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => LocalFileState {
                path: path.to_path_buf(),
                exists: true,
                modified_at: meta.modified().ok().map(OffsetDateTime::from),
            },
            _ => LocalFileState::missing(path),
        }
    }

    pub fn missing(path: &Path) -> Self {
        LocalFileState {
            path: path.to_path_buf(),
            exists: false,
            modified_at: None,
        }
    }

    pub fn present(path: &Path, modified_at: OffsetDateTime) -> Self {
        LocalFileState {
            path: path.to_path_buf(),
            exists: true,
            modified_at: Some(modified_at),
        }
    }
}

/// Decide whether `window` needs a download.
///
/// Rules, first match wins:
/// 1. `force_refresh` → Refetch
/// 2. no local file → Fetch
/// 3. window end strictly after the file's mtime → Refetch
/// 4. otherwise → Skip
///
/// A file with no readable mtime cannot be shown to postdate the window end
/// and is refetched.
pub fn decide(
    window: &DateWindow,
    local: &LocalFileState,
    force_refresh: bool,
    now: OffsetDateTime,
) -> Decision {
    let (action, reason) = if force_refresh {
        (FetchDecision::Refetch, DecisionReason::Forced)
    } else if !local.exists {
        (FetchDecision::Fetch, DecisionReason::Missing)
    } else {
        let window_end = window.end_instant();
        match local.modified_at {
            Some(mtime) if window_end <= mtime => (FetchDecision::Skip, DecisionReason::Current),
            _ => (
                FetchDecision::Refetch,
                DecisionReason::Stale {
                    window_open: window_end > now,
                },
            ),
        }
    };

    Decision {
        window: *window,
        action,
        reason,
    }
}
