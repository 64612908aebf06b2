//! Execution strategies
//!
//! Both strategies move the same data: for every iteration, the blocks listed by the send
//! descriptor leave the iteration's send region and the blocks listed by the receive descriptor
//! land in the receive buffer, each at the offset its [`BlockLayout`](crate::buffer::BlockLayout)
//! assigns.

use std::fmt;

use crate::collective::CommunicatorCollectives;
use crate::config::SendMode;
use crate::datatype::Element;
use crate::error::Result;
use crate::pattern::PatternSource;
use crate::point_to_point::CommunicatorPointToPoint;
use crate::topology::Rank;

pub mod immediate;
pub mod vectorized;

pub use self::immediate::ImmediateExchange;
pub use self::vectorized::{DenseCountTable, VectorizedExchange};

/// Which strategy executes the exchange
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// One collective call per iteration
    Vectorized,
    /// Immediate receives and sends completed by one wait
    Immediate(SendMode),
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Vectorized => f.write_str("all_to_all_varcount"),
            Strategy::Immediate(SendMode::Synchronous) => f.write_str("issend/irecv"),
            Strategy::Immediate(SendMode::Standard) => f.write_str("isend/irecv"),
        }
    }
}

/// The state a strategy keeps across the iterations of one run
#[derive(Debug)]
pub enum Exchanger {
    /// See [`VectorizedExchange`]
    Vectorized(VectorizedExchange),
    /// See [`ImmediateExchange`]
    Immediate(ImmediateExchange),
}

impl Exchanger {
    /// Set up `strategy` for a group of `size` ranks.
    pub fn new(strategy: Strategy, size: Rank) -> Self {
        match strategy {
            Strategy::Vectorized => Exchanger::Vectorized(VectorizedExchange::new()),
            Strategy::Immediate(mode) => Exchanger::Immediate(ImmediateExchange::new(size, mode)),
        }
    }

    /// The strategy being executed
    pub fn strategy(&self) -> Strategy {
        match self {
            Exchanger::Vectorized(_) => Strategy::Vectorized,
            Exchanger::Immediate(x) => Strategy::Immediate(x.mode()),
        }
    }

    /// Exchange the data of `iteration`.
    ///
    /// `send` is the region of this iteration in the send buffer, `recv` the receive buffer.
    pub fn exchange<C, S, T>(
        &mut self,
        comm: &C,
        source: &S,
        iteration: usize,
        send: &[T],
        recv: &mut [T],
    ) -> Result<()>
    where
        C: CommunicatorCollectives + CommunicatorPointToPoint,
        S: PatternSource,
        T: Element,
    {
        match self {
            Exchanger::Vectorized(x) => x.exchange(comm, source, iteration, send, recv),
            Exchanger::Immediate(x) => x.exchange(comm, source, iteration, send, recv),
        }
    }
}
