//! A file-monitor cache for incremental build and command systems.
//!
//! A `FileMonitor` stores a snapshot of declared filesystem inputs next to
//! a key and a cached result. A later `check` probes the snapshot against
//! the current filesystem and decides whether the cached result can be
//! reused or the action must re-run.

pub mod error;
pub mod monitor;
pub mod paths;

mod builder;
mod codec;
mod fsops;
mod merge;
mod probe;
mod state;

pub use error::MonitorError;
pub use fsops::{ContentHash, ModTime};
pub use monitor::{begin_update, ChangeReason, CheckResult, FileMonitor, MonitorTimestamp};
pub use paths::{DirKind, FileKind, FilePathRoot, Glob, MonitorPath, RootedGlob};

pub type Result<T> = std::result::Result<T, MonitorError>;
