//! Point to point communication
//!
//! Receives and sends are posted into a [`RequestSet`] and complete together in
//! [`wait_all`](CommunicatorPointToPoint::wait_all). Posting never blocks and never moves data.
//! Requests address their buffers by offset, the buffers themselves are handed to `wait_all`.

use crate::datatype::Element;
use crate::error::Result;
use crate::request::{Operation, Request, RequestSet};
use crate::topology::{Communicator, Rank};
use crate::Tag;

/// Point to point communication traits
pub mod traits {
    pub use super::CommunicatorPointToPoint;
}

/// Tag used by every point to point message of the exchange engine.
pub const DEFAULT_TAG: Tag = 0;

/// Non-blocking point to point communication defined on `Communicator`s
pub trait CommunicatorPointToPoint: Communicator {
    /// Initiate receiving `count` elements from `source` into the receive buffer at `offset`.
    #[track_caller]
    fn immediate_receive_into(
        &self,
        requests: &mut RequestSet,
        source: Rank,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        self.check_rank(source)?;
        requests.push(Request {
            operation: Operation::Receive,
            peer: source,
            tag: DEFAULT_TAG,
            offset,
            count,
        })
    }

    /// Initiate a standard mode send of `count` elements at `offset` of the send buffer to
    /// `destination`.
    #[track_caller]
    fn immediate_send(
        &self,
        requests: &mut RequestSet,
        destination: Rank,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        self.check_rank(destination)?;
        requests.push(Request {
            operation: Operation::Send,
            peer: destination,
            tag: DEFAULT_TAG,
            offset,
            count,
        })
    }

    /// Initiate a synchronous mode send of `count` elements at `offset` of the send buffer to
    /// `destination`.
    ///
    /// The request completes only once the matching receive has started to consume the message.
    #[track_caller]
    fn immediate_synchronous_send(
        &self,
        requests: &mut RequestSet,
        destination: Rank,
        offset: usize,
        count: usize,
    ) -> Result<()> {
        self.check_rank(destination)?;
        requests.push(Request {
            operation: Operation::SynchronousSend,
            peer: destination,
            tag: DEFAULT_TAG,
            offset,
            count,
        })
    }

    /// Complete every request in `requests`.
    ///
    /// Sends read from `sendbuf`, receives write into `recvbuf`. Blocks until all requests have
    /// completed, then records one `Status` per request in the set.
    fn wait_all<T: Element>(
        &self,
        requests: &mut RequestSet,
        sendbuf: &[T],
        recvbuf: &mut [T],
    ) -> Result<()>;
}
