//! Immediate point to point exchange
//!
//! Every iteration posts all receives, then all sends, then completes the whole set with one
//! `wait_all()`. The request set is sized once for the run.

use tracing::trace;

use crate::config::SendMode;
use crate::datatype::Element;
use crate::error::Result;
use crate::pattern::{Direction, PatternSource};
use crate::point_to_point::CommunicatorPointToPoint;
use crate::request::RequestSet;
use crate::topology::Rank;

/// The immediate point to point strategy
#[derive(Debug)]
pub struct ImmediateExchange {
    mode: SendMode,
    requests: RequestSet,
}

impl ImmediateExchange {
    /// Room for one receive and one send per rank of a group of `size`
    pub fn new(size: Rank, mode: SendMode) -> Self {
        ImmediateExchange {
            mode,
            requests: RequestSet::with_capacity(2 * size.max(0) as usize),
        }
    }

    /// The send mode
    pub fn mode(&self) -> SendMode {
        self.mode
    }

    /// The requests of the last iteration
    pub fn requests(&self) -> &RequestSet {
        &self.requests
    }

    /// Exchange the data of `iteration`.
    ///
    /// On failure the request set is emptied before the error is returned.
    pub fn exchange<C, S, T>(
        &mut self,
        comm: &C,
        source: &S,
        iteration: usize,
        send: &[T],
        recv: &mut [T],
    ) -> Result<()>
    where
        C: CommunicatorPointToPoint,
        S: PatternSource,
        T: Element,
    {
        self.requests.reset();
        let result = self.post_and_wait(comm, source, iteration, send, recv);
        if result.is_err() {
            self.requests.reset();
        }
        result
    }

    fn post_and_wait<C, S, T>(
        &mut self,
        comm: &C,
        source: &S,
        iteration: usize,
        send: &[T],
        recv: &mut [T],
    ) -> Result<()>
    where
        C: CommunicatorPointToPoint,
        S: PatternSource,
        T: Element,
    {
        let rank = comm.rank();
        let pattern = source.pattern(iteration);

        let layout = source.layout(iteration, Direction::Receive)?;
        for (entry, &offset) in pattern.recv.entries().iter().zip(layout.offsets()) {
            if entry.peer == rank {
                continue;
            }
            comm.immediate_receive_into(&mut self.requests, entry.peer, offset, entry.amount)?;
        }

        let layout = source.layout(iteration, Direction::Send)?;
        for (entry, &offset) in pattern.send.entries().iter().zip(layout.offsets()) {
            if entry.peer == rank {
                continue;
            }
            match self.mode {
                SendMode::Synchronous => comm.immediate_synchronous_send(
                    &mut self.requests,
                    entry.peer,
                    offset,
                    entry.amount,
                )?,
                SendMode::Standard => {
                    comm.immediate_send(&mut self.requests, entry.peer, offset, entry.amount)?
                }
            }
        }

        trace!(
            rank,
            iteration,
            requests = self.requests.len(),
            "waiting for posted requests"
        );
        comm.wait_all(&mut self.requests, send, recv)
    }
}
