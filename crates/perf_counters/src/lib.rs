//! # perf_counters
//!
//! A Rust library for measuring hardware performance counters (cycles,
//! instructions, cache and TLB events, ...) around a section of code.
//!
//! Counters are requested by name from a [`CounterDefinition`] registry,
//! opened atomically as one kernel group by an [`EventCounter`], and read
//! back as a [`CounterResult`] with multiplexing correction applied.
//!
//! ```no_run
//! use perf_counters::{CounterDefinition, EventCounter};
//!
//! let definitions = CounterDefinition::new();
//! let mut events = EventCounter::new(&definitions);
//!
//! events.add(["instructions", "cycles"])?;
//! events.start()?;
//! // ... workload ...
//! events.stop()?;
//!
//! let result = events.result()?;
//! println!("{}", result.to_csv(',', true, "workload"));
//! # Ok::<(), perf_counters::Error>(())
//! ```

mod config;
mod counter;
mod definition;
mod event_counter;
mod result;

pub use config::*;
pub use counter::*;
pub use definition::*;
pub use event_counter::*;
pub use result::*;

use std::io;
use thiserror::Error;

/// Errors that can occur when configuring or running counter groups
#[derive(Error, Debug)]
pub enum Error {
    /// The requested name is absent from the counter registry.
    #[error("unknown counter name: {0}")]
    UnknownCounterName(String),

    /// An overlay row failed to parse. The overlay load is aborted as a
    /// whole; no rows are merged.
    #[error("malformed counter definition at line {line}: {row:?}")]
    MalformedDefinition {
        /// 1-based line number of the offending row
        line: usize,
        /// The offending row, verbatim
        row: String,
    },

    /// The overlay definition source could not be read.
    #[error("failed to read counter definitions: {0}")]
    DefinitionIo(#[from] io::Error),

    /// The requested group exceeds the supported group size.
    #[error("too many counters requested (limit is {limit})")]
    TooManyCounters {
        /// Maximum number of counters per group
        limit: usize,
    },

    /// `start` was called before any counter was registered.
    #[error("no counters configured")]
    NoCountersConfigured,

    /// The kernel refused access to the counter. Usually this means the
    /// caller lacks privileges; see `/proc/sys/kernel/perf_event_paranoid`.
    #[error("permission denied opening counter {name}: {source}")]
    PermissionDenied {
        /// Name of the counter that failed to open
        name: String,
        /// Errno reported by the kernel
        source: io::Error,
    },

    /// The kernel could not instantiate the counter: the event is not
    /// supported on this CPU or the hardware counter slots are exhausted.
    #[error("failed to open counter {name}: {source}")]
    CounterOpenFailed {
        /// Name of the counter that failed to open
        name: String,
        /// Errno reported by the kernel
        source: io::Error,
    },

    /// The counter group is already counting.
    #[error("counter group already started")]
    AlreadyStarted,

    /// `stop` or `result` was called out of sequence.
    #[error("counter group not started")]
    NotStarted,

    /// Reading an open counter failed.
    #[error("failed to read counter {name}: {source}")]
    CounterReadFailed {
        /// Name of the counter that failed to read
        name: String,
        /// Errno reported by the kernel
        source: io::Error,
    },

    /// A group-wide enable, disable or reset request was rejected.
    #[error("failed to {op} counter group: {source}")]
    GroupControlFailed {
        /// The rejected operation
        op: &'static str,
        /// Errno reported by the kernel
        source: io::Error,
    },
}
