#![warn(missing_docs)]
#![warn(missing_copy_implementations)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]

//! Benchmarks of irregular all-to-many personalized communication
//!
//! Every process of a fixed group sends differently sized messages to a sparse, possibly
//! per-iteration varying subset of peers and receives from another sparse subset. This crate
//! executes such a *sparse communication matrix* with one of two strategies and measures how
//! long it takes:
//!
//! - a single **vectorized exchange** per iteration that describes every peer's count and
//!   displacement at once (`exchange::vectorized`), or
//! - a set of **immediate point-to-point** receives and sends that are completed together by one
//!   wait-all (`exchange::immediate`).
//!
//! Communication patterns come from a ratio-driven synthetic generator (`pattern::synthetic`)
//! or are replayed from a captured trace (`pattern::trace`).
//!
//! # Usage
//!
//! ```no_run
//! use alltomany::prelude::*;
//!
//! let universe = alltomany::initialize_local(4).unwrap();
//! universe.run(|world| {
//!     let config = BenchConfig {
//!         ntimes: 16,
//!         ratio: 2,
//!         len: 1024,
//!         ..BenchConfig::default()
//!     };
//!     let pattern = SyntheticPattern::new(world.size(), world.rank(), &config).unwrap();
//!     let mut buffers: Buffers<i32> = Buffers::for_synthetic(&pattern).unwrap();
//!     let mut exchanger = Exchanger::new(Strategy::Vectorized, world.size());
//!     let phase = PhaseConfig::from_bench(&config);
//!     bench::run_phase(&world, &mut exchanger, &pattern, &mut buffers, None, &phase).unwrap();
//! });
//! ```
//!
//! # Process groups
//!
//! The engine only talks to a process group through the traits in `topology`, `collective` and
//! `point_to_point`. Two implementations exist:
//!
//! - `local`: every rank is a thread of the current process, messages travel through shared
//!   memory mailboxes. This is what the tests use.
//! - `mpi_world` (cargo feature `mpi`): the world communicator of an MPI library.

pub mod bench;
pub mod buffer;
pub mod check;
pub mod collective;
pub mod config;
pub mod datatype;
pub mod environment;
pub mod error;
pub mod exchange;
pub mod launch;
pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi_world;
pub mod pattern;
pub mod point_to_point;
pub mod request;
pub mod timing;
pub mod topology;

pub use crate::environment::{initialize_local, Universe};
pub use crate::error::{Error, ErrorKind, Result};

/// Encodes number of values in multi-value messages.
pub type Count = i32;
/// Can be used to tag messages on the sender side and match on the receiver side.
pub type Tag = i32;

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::traits::*;
    pub use crate::datatype::traits::*;
    pub use crate::pattern::PatternSource;
    pub use crate::point_to_point::traits::*;
    pub use crate::topology::traits::*;
}

/// Everything a benchmark program usually needs.
pub mod prelude {
    pub use crate::bench::{self, PhaseConfig, PhaseOutcome, RunSummary};
    pub use crate::buffer::{Buffers, Fill};
    pub use crate::check::ReceiveChecker;
    pub use crate::config::{BenchConfig, ByteCount, SendMode};
    pub use crate::exchange::{Exchanger, Strategy};
    pub use crate::pattern::synthetic::SyntheticPattern;
    pub use crate::pattern::trace::{TraceExpectation, TracePattern};
    pub use crate::traits::*;
}
