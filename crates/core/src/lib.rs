//! bagsync-core: incremental monthly sync and BagIt assembly.
//!
//! Turns a requested date range into calendar-month windows, decides which
//! windows need a (re)download, drives a [`RemoteFetcher`] for them and seals
//! the result as a BagIt bag with SHA-256 manifests.
//!
//! # Public API
//!
//! - [`plan()`] -- requested range + availability → monthly windows
//! - [`decide()`] -- staleness policy for one window
//! - [`SyncRunner`] -- snapshot, decide and fetch every window of a plan
//! - [`collect()`] -- operator metadata for `bag-info.txt`
//! - [`assemble()`] / [`verify()`] -- seal and re-check a bag
//! - [`Error`] -- top-level error type
//!
//! Nothing here talks to the network; the fetcher is supplied by the caller.

pub mod bag;
pub mod decision;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod request;
pub mod sync;
pub mod window;

// ── Convenience re-exports: key types ────────────────────────────────

pub use bag::{Bag, ManifestEntry, VerifyReport};
pub use decision::{Decision, DecisionReason, FetchDecision, LocalFileState};
pub use error::{AssemblyError, Error, FetchError, PlanError, SyncError, WindowError};
pub use fetch::{FetchOutcome, RemoteFetcher, RetryingFetcher};
pub use metadata::{MetadataConfig, MetadataField, MetadataRecord, RawFieldValues};
pub use request::{ArchiveRequest, SourceId};
pub use sync::{SyncReport, SyncRunner, WindowOutcome, WindowResult};
pub use window::DateWindow;

// ── Convenience re-exports: entry points ─────────────────────────────

pub use bag::{assemble, is_bag, verify};
pub use decision::decide;
pub use metadata::{collect, split_env_vars};
pub use window::{parse_boundary, plan};
