//! Domain types for Ducky
//!
//! This module contains the core records the orchestration layer moves around:
//! - ProcessableItem: a candidate fetched from an external source
//! - DedupRecord: the persisted claim/outcome for one external id
//! - ActionError: failure taxonomy of external calls
//! - RunState / RunSummary: bookkeeping for one batch pass

pub mod item;
pub mod outcome;
pub mod record;
pub mod run;

pub use item::{CandidatePage, Cursor, PageRequest, ProcessableItem, prioritize};
pub use outcome::{ActionError, ErrorKind};
pub use record::DedupRecord;
pub use run::{ItemError, RunPhase, RunState, RunSummary, StopReason};
