//! Verification of received data
//!
//! For synthetic patterns the content of the receive buffer after an exchange is known in
//! advance: the slot of every other rank holds that rank's identity, gaps and the own slot keep
//! the sentinel.

use tracing::error;

use crate::buffer::Fill;
use crate::pattern::synthetic::SyntheticPattern;
use crate::pattern::PatternSource;
use crate::topology::Rank;

/// Mismatches logged per check; further ones are only counted.
const MAX_REPORTED: usize = 8;

/// Checks the receive buffer of one rank of a synthetic run
#[derive(Clone, Debug)]
pub struct ReceiveChecker {
    rank: Rank,
    size: Rank,
    len: usize,
    stride: usize,
    receiver: bool,
}

impl ReceiveChecker {
    /// A checker for the receive buffer of `pattern`
    pub fn for_synthetic(pattern: &SyntheticPattern) -> Self {
        ReceiveChecker {
            rank: pattern.rank(),
            size: pattern.size(),
            len: pattern.message_len(),
            stride: pattern.stride(),
            receiver: pattern.is_receiver(),
        }
    }

    /// Whether this rank has anything to check.
    pub fn is_active(&self) -> bool {
        self.receiver
    }

    /// Expected content of element `index` of the receive buffer
    pub fn expected<T: Fill>(&self, index: usize) -> T {
        let slot = index / self.stride;
        let within = index % self.stride;
        if slot as Rank == self.rank || within >= self.len {
            T::sentinel()
        } else {
            T::identity(slot as Rank)
        }
    }

    /// Compare `buffer` with the expected content and return the number of differing elements.
    ///
    /// Differences are logged with the offending slot and position.
    pub fn check<T: Fill>(&self, label: &str, buffer: &[T]) -> usize {
        if !self.receiver {
            return 0;
        }
        let expected_len = self.size as usize * self.stride;
        let mut mismatches = 0;
        if buffer.len() != expected_len {
            error!(
                label,
                rank = self.rank,
                "receive buffer holds {} elements, expected {}",
                buffer.len(),
                expected_len
            );
            mismatches += 1;
        }
        for (index, actual) in buffer.iter().enumerate().take(expected_len) {
            let expect: T = self.expected(index);
            if *actual != expect {
                if mismatches < MAX_REPORTED {
                    error!(
                        label,
                        rank = self.rank,
                        "slot {} position {}: expected {:?} but got {:?}",
                        index / self.stride,
                        index % self.stride,
                        expect,
                        actual
                    );
                }
                mismatches += 1;
            }
        }
        if mismatches > MAX_REPORTED {
            error!(label, rank = self.rank, mismatches, "receive buffer differs");
        }
        mismatches
    }
}
