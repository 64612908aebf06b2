//! Collective communication
//!
//! Operations in this module have to be invoked by every process of the group, in the same
//! order. None of them completes for any one process before that process's share of the group-wide
//! operation has completed.

use std::ops::Add;

use crate::datatype::{Element, Partition, PartitionMut};
use crate::error::Result;
use crate::topology::{Communicator, Rank};

/// Collective communication traits
pub mod traits {
    pub use super::{CommunicatorCollectives, Reducible};
}

/// A built-in reduction operation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SystemOperation {
    /// Element-wise maximum
    Max,
    /// Element-wise sum
    Sum,
}

impl SystemOperation {
    /// Apply the operation to a pair of values.
    pub fn apply<T: Reducible>(self, a: T, b: T) -> T {
        match self {
            SystemOperation::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            SystemOperation::Sum => a + b,
        }
    }

    /// Fold `other` into `acc` element by element.
    pub fn fold_into<T: Reducible>(self, acc: &mut [T], other: &[T]) {
        for (a, &b) in acc.iter_mut().zip(other.iter()) {
            *a = self.apply(*a, b);
        }
    }
}

/// Element types that the built-in reductions are defined on
pub trait Reducible: Element + PartialOrd + Add<Output = Self> {}

impl<T: Element + PartialOrd + Add<Output = T>> Reducible for T {}

/// Collective communication patterns defined on `Communicator`s
pub trait CommunicatorCollectives: Communicator {
    /// Barrier synchronization among all processes in a `Communicator`
    ///
    /// Calling processes will enter the barrier and block execution until all processes in the
    /// `Communicator` `&self` have entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Performs a global reduction under the operation `op` of the input data in `sendbuf`.
    ///
    /// The process at rank `root` receives the result, every other process gets `None`.
    fn reduce_into_root<T: Reducible>(
        &self,
        sendbuf: &[T],
        op: SystemOperation,
        root: Rank,
    ) -> Result<Option<Vec<T>>>;

    /// Distribute the send `Buffer`s from all processes to the receive `Buffer`s on all processes.
    ///
    /// The count of elements to send and receive to and from each process can vary and is
    /// specified using partitions whose counts and displacements are sized to the group. A zero
    /// count means no data moves between the pair, but the call is still collective.
    fn all_to_all_varcount_into<T: Element>(
        &self,
        sendbuf: &Partition<'_, T>,
        recvbuf: &mut PartitionMut<'_, T>,
    ) -> Result<()>;

    /// Make the operations other processes are blocked in fail, so that every process leaves the
    /// current phase.
    fn abort_phase(&self);

    /// Collective end of a phase.
    ///
    /// Waits for all processes and makes the group usable again after a process called
    /// `abort_phase()`. Returns whether the phase was aborted.
    fn end_phase(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_operations() {
        assert_eq!(SystemOperation::Max.apply(3.5, 1.0), 3.5);
        assert_eq!(SystemOperation::Max.apply(1u64, 7), 7);
        assert_eq!(SystemOperation::Sum.apply(1u64, 7), 8);

        let mut acc = [1.0, 5.0, 2.0];
        SystemOperation::Max.fold_into(&mut acc, &[4.0, 1.0, 2.5]);
        assert_eq!(acc, [4.0, 5.0, 2.5]);
    }
}
