//! Error handling and error classes
//!
//! All fallible operations return [`Result`]. Failures of the process group are reported as
//! [`Error::Transport`] and carry an [`ErrorKind`] class, modelled on the MPI error classes, along
//! with the source location of the call that raised them.

use std::fmt;
use std::panic::Location;

use thiserror::Error;

macro_rules! build_error_kind {
    {
        $(#[$doc:meta])*
        pub enum $name:ident {
            $(
                 #[$err_doc:meta]
                 #[desc($desc:literal)]
                 $rust_err:ident,
            )*
        }
    } => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
            #[$err_doc]
            $rust_err,
            )*
        }

        impl $name {
            /// A short human readable description of the error class.
            pub fn description(self) -> &'static str {
                match self {
                    $(
                    $name::$rust_err => $desc,
                    )*
                }
            }
        }
    }
}

build_error_kind! {
    /// Set of error classes a process group can report.
    pub enum ErrorKind {
        /// Invalid argument of some other kind
        #[desc("invalid argument")]
        Arg,
        /// Invalid buffer region argument
        #[desc("invalid buffer region")]
        Buffer,
        /// Invalid count argument
        #[desc("invalid count")]
        Count,
        /// Invalid rank argument
        #[desc("invalid rank")]
        Rank,
        /// Invalid request argument, e.g. a full request set
        #[desc("invalid request")]
        Request,
        /// Invalid root argument
        #[desc("invalid root")]
        Root,
        /// Message truncated on receive
        #[desc("message truncated")]
        Truncate,
        /// Message element type differs from the posted receive
        #[desc("invalid datatype")]
        Type,
        /// Operation did not complete in time
        #[desc("operation timed out")]
        Pending,
        /// Operation failed because a peer process has aborted
        #[desc("peer process aborted")]
        ProcAborted,
        /// Internal (implementation) error
        #[desc("internal error")]
        Intern,
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors raised while configuring, loading or running a benchmark.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration; the affected run is skipped.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A collective or point-to-point primitive failed.
    #[error("error at {location}: {kind}: {message}")]
    Transport {
        /// Error class
        kind: ErrorKind,
        /// Diagnostic provided by the process group
        message: String,
        /// Where the failing call was issued
        location: &'static Location<'static>,
    },

    /// A pattern descriptor violates its invariants.
    #[error("invalid pattern: {0}")]
    Pattern(String),

    /// Trace metadata disagrees with what this program expects.
    #[error("trace {field} is {found}, expected {expected}")]
    TraceMismatch {
        /// Which header field mismatched
        field: &'static str,
        /// The expected value
        expected: i64,
        /// The value recorded in the trace
        found: i64,
    },

    /// A trace segment could not be decoded.
    #[error("malformed trace: {0}")]
    TraceFormat(String),

    /// Received data differed from the expected contents.
    #[error("{mismatches} receive buffer element(s) differ from the expected values")]
    Integrity {
        /// Number of mismatching elements, summed over all checks
        mismatches: usize,
    },

    /// Reading a trace failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Construct a transport error located at the caller.
    #[track_caller]
    pub fn transport(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Transport {
            kind,
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// The error class of a transport error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this error has to end the whole program rather than a single phase.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::TraceMismatch { .. } | Error::TraceFormat(_) | Error::Io(_)
        )
    }
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
