//! Environmental management
//!
//! A [`Universe`] hosts a group of ranks inside the current process: every rank runs the same
//! closure on its own thread and receives a [`LocalCommunicator`] for the group. The universe is
//! torn down once every rank has returned.
//!
//! When one rank panics, the group is marked aborted so that operations blocked on the other
//! ranks fail with [`ErrorKind::ProcAborted`](crate::ErrorKind) instead of waiting forever; the
//! panic is then resumed on the calling thread.

use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conv::ConvUtil;
use tracing::debug;

use crate::error::{Error, Result};
use crate::local::{LocalCommunicator, Shared};
use crate::topology::Rank;

/// Global context of an in-process group
#[derive(Debug, Clone)]
pub struct Universe {
    size: Rank,
    timeout: Option<Duration>,
}

/// Set up a group of `size` ranks that live in this process.
pub fn initialize_local(size: usize) -> Result<Universe> {
    let size: Rank = size
        .value_as()
        .map_err(|_| Error::Config(format!("{} ranks exceed the range of a rank", size)))?;
    if size < 1 {
        return Err(Error::Config("a group needs at least one rank".into()));
    }
    Ok(Universe {
        size,
        timeout: None,
    })
}

impl Universe {
    /// Number of ranks in the group
    pub fn size(&self) -> Rank {
        self.size
    }

    /// Fail any blocking operation that waits longer than `timeout`.
    ///
    /// Without a timeout, an erroneous program (e.g. a receive without matching send) blocks
    /// forever, just like on a real process group.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `f` once per rank, each on its own thread, and collect the results in rank order.
    ///
    /// # Panics
    ///
    /// Resumes the panic of the lowest rank that panicked.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalCommunicator) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(Shared::new(self.size, self.timeout));
        let f = &f;
        let joined: Vec<thread::Result<R>> = thread::scope(|s| {
            let handles: Vec<_> = (0..self.size)
                .map(|rank| {
                    let world = LocalCommunicator::new(rank, Arc::clone(&shared));
                    thread::Builder::new()
                        .name(format!("rank-{}", rank))
                        .spawn_scoped(s, move || {
                            let _guard = AbortOnPanic(world.shared());
                            f(world)
                        })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join(),
                    Err(err) => Err(Box::new(err) as Box<dyn std::any::Any + Send>),
                })
                .collect()
        });
        debug!(size = self.size, "local universe finished");

        let mut results = Vec::with_capacity(joined.len());
        for outcome in joined {
            match outcome {
                Ok(result) => results.push(result),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        results
    }
}

struct AbortOnPanic(Arc<Shared>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::CommunicatorCollectives;
    use crate::topology::Communicator;

    #[test]
    fn ranks_come_back_in_order() {
        let universe = initialize_local(5).unwrap();
        let ranks = universe.run(|world| {
            assert_eq!(world.size(), 5);
            world.rank()
        });
        assert_eq!(ranks, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn empty_group_is_a_configuration_error() {
        assert!(matches!(initialize_local(0), Err(Error::Config(_))));
    }

    #[test]
    #[should_panic(expected = "rank 1 gave up")]
    fn panic_on_one_rank_releases_the_others() {
        let universe = initialize_local(3).unwrap();
        universe.run(|world| {
            if world.rank() == 1 {
                panic!("rank 1 gave up");
            }
            // the barrier can never complete; it has to fail once rank 1 is gone
            assert!(world.barrier().is_err());
        });
    }
}
