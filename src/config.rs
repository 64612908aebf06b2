//! Benchmark configuration
//!
//! Configuration is built once, usually from the command line, and passed explicitly to the
//! components that need it.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::pattern::trace::TraceExpectation;

/// How the immediate strategy sends
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SendMode {
    /// A send completes once the matching receive consumes it.
    #[default]
    Synchronous,
    /// A send may complete as soon as its data is buffered.
    Standard,
}

/// Which byte total a phase reports when peers were dropped from a replayed trace
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ByteCount {
    /// Bytes that actually moved in this run
    #[default]
    Replayed,
    /// Bytes the captured run moved on the same rank
    Captured,
}

/// Parameters of a synthetic all-to-many run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchConfig {
    /// Number of iterations
    pub ntimes: usize,
    /// Every `ratio`th rank receives. Out of range values mean every rank receives.
    pub ratio: i32,
    /// Upper bound on the number of receivers
    pub max_receivers: Option<usize>,
    /// Elements per message
    pub len: usize,
    /// Unused elements between two consecutive blocks of a buffer
    pub gap: usize,
    /// Log the communication pattern of every rank
    pub verbose: bool,
    /// Verify the receive buffer after every iteration
    pub debug: bool,
    /// Send mode of the immediate strategy
    pub send_mode: SendMode,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            ntimes: 1,
            ratio: 1,
            max_receivers: None,
            len: 48,
            gap: 0,
            verbose: false,
            debug: false,
            send_mode: SendMode::default(),
        }
    }
}

impl BenchConfig {
    /// Reject configurations that cannot describe a run.
    pub fn validate(&self) -> Result<()> {
        if self.ntimes == 0 {
            return Err(Error::Config("the number of iterations must be positive".into()));
        }
        if self.len == 0 {
            return Err(Error::Config("the message length must be positive".into()));
        }
        if self.max_receivers == Some(0) {
            return Err(Error::Config("at least one receiver is needed".into()));
        }
        Ok(())
    }
}

/// Parameters of a trace replay
#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// The trace file
    pub path: PathBuf,
    /// Process and iteration count the trace must have been captured with
    pub expect: TraceExpectation,
    /// How often both strategies are run
    pub repeat: usize,
    /// Which byte total to report
    pub byte_count: ByteCount,
    /// Log the decoded pattern of every rank
    pub verbose: bool,
}

impl TraceConfig {
    /// A replay of `path` with the captured dimensions of the reference trace.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TraceConfig {
            path: path.into(),
            expect: TraceExpectation::default(),
            repeat: 3,
            byte_count: ByteCount::default(),
            verbose: false,
        }
    }
}
