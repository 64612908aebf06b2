//! Processes organized as a fixed group
//!
//! All processes partaking in a benchmark form one group that lives for the whole run. Processes
//! are addressed via their `Rank` within that group; the group has a `size` and every member
//! knows its own rank. Nothing in this crate changes membership after start-up.

use crate::error::{Error, ErrorKind, Result};

/// Topology traits
pub mod traits {
    pub use super::Communicator;
}

/// Identifies a certain process within a communicator.
pub type Rank = i32;

/// The rank that reports aggregated results.
pub const ROOT_RANK: Rank = 0;

/// A fixed group of cooperating processes, seen from one of its members
pub trait Communicator {
    /// Number of processes in this communicator
    fn size(&self) -> Rank;

    /// The `Rank` that identifies the calling process within this communicator
    fn rank(&self) -> Rank;

    /// Wall clock time in seconds, measured from an arbitrary point in the past that stays fixed
    /// for the lifetime of the group.
    fn time(&self) -> f64;

    /// Whether the calling process is the designated reporter.
    fn is_root(&self) -> bool {
        self.rank() == ROOT_RANK
    }

    /// Check that `rank` names a member of this communicator.
    #[track_caller]
    fn check_rank(&self, rank: Rank) -> Result<()> {
        if (0..self.size()).contains(&rank) {
            Ok(())
        } else {
            Err(Error::transport(
                ErrorKind::Rank,
                format!("rank {} outside of a group of {}", rank, self.size()),
            ))
        }
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn size(&self) -> Rank {
        (**self).size()
    }

    fn rank(&self) -> Rank {
        (**self).rank()
    }

    fn time(&self) -> f64 {
        (**self).time()
    }
}
