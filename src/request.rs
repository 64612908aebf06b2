//! Request objects for non-blocking operations
//!
//! Non-blocking operations such as `immediate_receive_into()` do not transfer any data when they
//! are posted; they append a [`Request`] to a [`RequestSet`] and return immediately. The data
//! moves, and the requests complete, during a single `wait_all()` on the set.
//!
//! A request refers to its buffer by an element offset and a count instead of by a borrow, so one
//! `RequestSet` can be reused for every iteration of a run: it is sized once for the worst case,
//! [`reset`](RequestSet::reset) at the start of an iteration and never grows afterwards.

use crate::error::{Error, ErrorKind, Result};
use crate::topology::Rank;
use crate::{Count, Tag};

/// What a posted request does
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Receive into the receive buffer
    Receive,
    /// Standard mode send; may complete as soon as the data is buffered
    Send,
    /// Synchronous mode send; completes only once a matching receive consumed it
    SynchronousSend,
}

impl Operation {
    /// Whether this operation reads from the send buffer.
    pub fn is_send(self) -> bool {
        !matches!(self, Operation::Receive)
    }
}

/// A posted but not yet completed point to point operation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// The kind of operation
    pub operation: Operation,
    /// Source of a receive or destination of a send
    pub peer: Rank,
    /// Message tag
    pub tag: Tag,
    /// Offset of the message in its buffer, in elements
    pub offset: usize,
    /// Length of the message, in elements
    pub count: usize,
}

impl Request {
    /// The buffer range covered by this request.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.count
    }

    /// Check that the request lies within a buffer of `len` elements.
    #[track_caller]
    pub fn check_bounds(&self, len: usize) -> Result<()> {
        if self.offset + self.count > len {
            Err(Error::transport(
                ErrorKind::Buffer,
                format!(
                    "{:?} with peer {} covers {:?} of a buffer of {}",
                    self.operation,
                    self.peer,
                    self.range(),
                    len
                ),
            ))
        } else {
            Ok(())
        }
    }
}

/// Describes the result of a completed request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    peer: Rank,
    tag: Tag,
    count: Count,
}

impl Status {
    /// Construct a status.
    pub fn new(peer: Rank, tag: Tag, count: Count) -> Self {
        Status { peer, tag, count }
    }

    /// The source of a receive or the destination of a send
    pub fn source_rank(&self) -> Rank {
        self.peer
    }

    /// The message tag
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Number of elements transferred
    pub fn count(&self) -> Count {
        self.count
    }
}

/// A capacity bounded collection of requests that complete together
///
/// # Invariant
///
/// The set never holds more than `capacity()` requests and its storage is never reallocated.
#[derive(Debug)]
pub struct RequestSet {
    requests: Vec<Request>,
    statuses: Vec<Status>,
    capacity: usize,
    outstanding: usize,
}

impl RequestSet {
    /// Constructs an empty set that accepts up to `capacity` requests.
    pub fn with_capacity(capacity: usize) -> Self {
        RequestSet {
            requests: Vec::with_capacity(capacity),
            statuses: Vec::with_capacity(capacity),
            capacity,
            outstanding: 0,
        }
    }

    /// Forget all requests and statuses of the previous iteration.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.statuses.clear();
        self.outstanding = 0;
    }

    /// Append a request.
    ///
    /// Fails with a request error if the set is full.
    #[track_caller]
    pub fn push(&mut self, request: Request) -> Result<()> {
        if self.requests.len() == self.capacity {
            return Err(Error::transport(
                ErrorKind::Request,
                format!(
                    "request set is full ({} requests), cannot post {:?} with peer {}",
                    self.capacity, request.operation, request.peer
                ),
            ));
        }
        self.requests.push(request);
        self.outstanding += 1;
        Ok(())
    }

    /// The requests posted since the last reset, in posting order
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Posted receives, in posting order
    pub fn receives(&self) -> impl Iterator<Item = (usize, &Request)> {
        self.requests
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.operation.is_send())
    }

    /// Posted sends, in posting order
    pub fn sends(&self) -> impl Iterator<Item = (usize, &Request)> {
        self.requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.operation.is_send())
    }

    /// Statuses of the last completed `wait_all()`, indexed like `requests()`
    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    /// Number of posted requests that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of posted requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no request was posted since the last reset
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Maximum number of requests
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark every request complete. Called by a process group once `statuses` holds one entry
    /// per posted request.
    pub fn complete_all(&mut self, statuses: impl IntoIterator<Item = Status>) {
        self.statuses.clear();
        self.statuses.extend(statuses);
        debug_assert_eq!(self.statuses.len(), self.requests.len());
        self.outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive(peer: Rank, offset: usize) -> Request {
        Request {
            operation: Operation::Receive,
            peer,
            tag: 0,
            offset,
            count: 4,
        }
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let mut set = RequestSet::with_capacity(2);
        set.push(receive(1, 0)).unwrap();
        set.push(receive(2, 4)).unwrap();
        let err = set.push(receive(3, 8)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Request));
        assert_eq!(set.len(), 2);
        assert_eq!(set.outstanding(), 2);

        set.reset();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), 2);
        set.push(receive(3, 8)).unwrap();
    }

    #[test]
    fn receives_and_sends_keep_posting_order() {
        let mut set = RequestSet::with_capacity(4);
        set.push(receive(1, 0)).unwrap();
        set.push(Request {
            operation: Operation::SynchronousSend,
            peer: 2,
            tag: 0,
            offset: 0,
            count: 2,
        })
        .unwrap();
        set.push(receive(3, 4)).unwrap();

        let receives: Vec<_> = set.receives().map(|(i, r)| (i, r.peer)).collect();
        assert_eq!(receives, [(0, 1), (2, 3)]);
        let sends: Vec<_> = set.sends().map(|(i, r)| (i, r.peer)).collect();
        assert_eq!(sends, [(1, 2)]);

        let statuses: Vec<Status> = set
            .requests()
            .iter()
            .map(|r| Status::new(r.peer, r.tag, r.count as Count))
            .collect();
        set.complete_all(statuses);
        assert_eq!(set.outstanding(), 0);
        assert_eq!(set.statuses()[2].source_rank(), 3);
    }

    #[test]
    fn bounds() {
        assert!(receive(1, 4).check_bounds(8).is_ok());
        assert_eq!(
            receive(1, 5).check_bounds(8).unwrap_err().kind(),
            Some(ErrorKind::Buffer)
        );
    }
}
