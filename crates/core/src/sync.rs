//! Drives one archive run: snapshot, decide, fetch, place.
//!
//! Every decision is made from a snapshot of the payload directory taken
//! before the first fetch, so worker scheduling cannot influence what gets
//! fetched. Downloads land in a staging directory beside the bag and are
//! renamed into `data/` only once complete; an interrupted run never leaves a
//! truncated payload where a good one used to be.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use time::OffsetDateTime;

use crate::bag;
use crate::decision::{decide, Decision, DecisionReason, FetchDecision, LocalFileState};
use crate::error::{SyncError, WindowError};
use crate::fetch::{payload_file_name, FetchOutcome, RemoteFetcher};
use crate::request::{ArchiveRequest, SourceId};
use crate::window::DateWindow;

/// Upper bound on concurrent fetches.
pub const MAX_JOBS: usize = 4;

/// What happened to one window.
#[derive(Debug)]
pub enum WindowResult {
    Skipped,
    Fetched { bytes: u64 },
    NoData,
    Failed(WindowError),
}

#[derive(Debug)]
pub struct WindowOutcome {
    pub decision: Decision,
    /// Final payload location inside the bag.
    pub path: PathBuf,
    pub result: WindowResult,
}

/// Per-window outcomes, oldest window first.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<WindowOutcome>,
}

impl SyncReport {
    pub fn fetched(&self) -> usize {
        self.count(|r| matches!(r, WindowResult::Fetched { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, WindowResult::Skipped))
    }

    pub fn no_data(&self) -> usize {
        self.count(|r| matches!(r, WindowResult::NoData))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, WindowResult::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o.result {
                WindowResult::Fetched { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DateWindow, &WindowError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            WindowResult::Failed(err) => Some((&o.decision.window, err)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&WindowResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

struct WorkItem {
    index: usize,
    window: DateWindow,
    dest: PathBuf,
    /// A forced refetch that finds no data drops the old payload.
    forced: bool,
}

/// Fetches every window that needs it into a bag's payload directory.
pub struct SyncRunner<F> {
    fetcher: F,
    jobs: usize,
}

impl<F: RemoteFetcher> SyncRunner<F> {
    /// A runner that processes windows one at a time.
    pub fn new(fetcher: F) -> Self {
        SyncRunner { fetcher, jobs: 1 }
    }

    /// Allow up to `jobs` concurrent fetches, clamped to `1..=MAX_JOBS`.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.clamp(1, MAX_JOBS);
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Bring `bag_root/data/` up to date for `windows`.
    ///
    /// Per-window failures are recorded in the report and never abort the
    /// run. Only failing to prepare the payload or staging directory does.
    pub fn run(
        &self,
        request: &ArchiveRequest,
        bag_root: &Path,
        windows: &[DateWindow],
        now: OffsetDateTime,
    ) -> Result<SyncReport, SyncError> {
        let data = bag::data_dir(bag_root);
        fs::create_dir_all(&data).map_err(|source| SyncError::Prepare {
            path: data.clone(),
            source,
        })?;

        let decisions: Vec<(Decision, PathBuf)> = windows
            .iter()
            .map(|window| {
                let path = data.join(payload_file_name(&request.source, window));
                let local = LocalFileState::probe(&path);
                (decide(window, &local, request.force_refresh, now), path)
            })
            .collect();

        let work: Vec<WorkItem> = decisions
            .iter()
            .enumerate()
            .filter(|(_, (d, _))| d.action != FetchDecision::Skip)
            .map(|(index, (d, path))| WorkItem {
                index,
                window: d.window,
                dest: path.clone(),
                forced: d.reason == DecisionReason::Forced,
            })
            .collect();

        tracing::info!(
            source = %request.source,
            windows = windows.len(),
            to_fetch = work.len(),
            jobs = self.jobs,
            "planned sync"
        );

        let mut results: Vec<Option<WindowResult>> = decisions.iter().map(|_| None).collect();
        if !work.is_empty() {
            let staging = staging_dir(bag_root)?;
            for (index, result) in self.fetch_all(&request.source, staging.path(), &work)? {
                results[index] = Some(result);
            }
        }

        let outcomes = decisions
            .into_iter()
            .zip(results)
            .map(|((decision, path), result)| {
                let result = result.unwrap_or(WindowResult::Skipped);
                log_outcome(&decision, &result);
                WindowOutcome {
                    decision,
                    path,
                    result,
                }
            })
            .collect();

        Ok(SyncReport { outcomes })
    }

    fn fetch_all(
        &self,
        source: &SourceId,
        staging: &Path,
        work: &[WorkItem],
    ) -> Result<Vec<(usize, WindowResult)>, SyncError> {
        let workers = self.jobs.min(work.len());
        let next = AtomicUsize::new(0);

        if workers <= 1 {
            return Ok(self.drain(source, staging, work, &next));
        }

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                handles.push(scope.spawn(|| self.drain(source, staging, work, &next)));
            }
            let joined: Vec<_> = handles.into_iter().map(|h| h.join()).collect();

            let mut all = Vec::with_capacity(work.len());
            for done in joined {
                all.extend(done.map_err(|_| SyncError::WorkerPanicked)?);
            }
            Ok(all)
        })
    }

    /// Claim work items until none remain.
    fn drain(
        &self,
        source: &SourceId,
        staging: &Path,
        work: &[WorkItem],
        next: &AtomicUsize,
    ) -> Vec<(usize, WindowResult)> {
        let mut done = Vec::new();
        while let Some(item) = work.get(next.fetch_add(1, Ordering::Relaxed)) {
            done.push((item.index, self.fetch_one(source, staging, item)));
        }
        done
    }

    fn fetch_one(&self, source: &SourceId, staging: &Path, item: &WorkItem) -> WindowResult {
        let Some(name) = item.dest.file_name() else {
            return WindowResult::Failed(WindowError::Store {
                window: item.window.label(),
                path: item.dest.clone(),
                source: std::io::Error::other("payload path has no file name"),
            });
        };
        let staged = staging.join(name);

        tracing::debug!(window = %item.window, staged = %staged.display(), "fetching");
        match self.fetcher.fetch(source, &item.window, &staged) {
            Ok(FetchOutcome::Written { bytes }) => match fs::rename(&staged, &item.dest) {
                Ok(()) => WindowResult::Fetched { bytes },
                Err(source) => WindowResult::Failed(WindowError::Store {
                    window: item.window.label(),
                    path: item.dest.clone(),
                    source,
                }),
            },
            Ok(FetchOutcome::NoData) => {
                let _ = fs::remove_file(&staged);
                if item.forced {
                    if let Err(source) = remove_if_present(&item.dest) {
                        return WindowResult::Failed(WindowError::Store {
                            window: item.window.label(),
                            path: item.dest.clone(),
                            source,
                        });
                    }
                }
                WindowResult::NoData
            }
            Err(err) => {
                let _ = fs::remove_file(&staged);
                WindowResult::Failed(err.into())
            }
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Staging directory on the same filesystem as the bag, so the final move is
/// a rename.
fn staging_dir(bag_root: &Path) -> Result<TempDir, SyncError> {
    let parent = bag_root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new()
        .prefix(".bagsync-staging-")
        .tempdir_in(parent)
        .map_err(|source| SyncError::Prepare {
            path: parent.to_path_buf(),
            source,
        })
}

fn log_outcome(decision: &Decision, result: &WindowResult) {
    let window = &decision.window;
    let action = decision.action.as_str();
    match result {
        WindowResult::Skipped => {
            tracing::debug!(%window, action, reason = ?decision.reason, "up to date")
        }
        WindowResult::Fetched { bytes } => {
            tracing::info!(%window, action, bytes, "fetched")
        }
        WindowResult::NoData => tracing::info!(%window, action, "no data for window"),
        WindowResult::Failed(err) => tracing::warn!(%window, action, error = %err, "window failed"),
    }
}
