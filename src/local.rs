//! A process group whose ranks are threads of the current process
//!
//! Messages travel through one mailbox per destination rank. Receives match the oldest message
//! with the requested source and tag, so messages between a pair of ranks do not overtake each
//! other. Collective operations are built from the same mailboxes, on tags that point to point
//! traffic never uses.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::collective::{CommunicatorCollectives, Reducible, SystemOperation};
use crate::datatype::{count_of, Element, Partition, PartitionMut, Partitioned};
use crate::error::{Error, ErrorKind, Result};
use crate::point_to_point::CommunicatorPointToPoint;
use crate::request::{Operation, RequestSet, Status};
use crate::topology::{Communicator, Rank};
use crate::Tag;

const TAG_ALL_TO_ALL: Tag = -1;
const TAG_REDUCE: Tag = -2;

/// How long a blocked operation sleeps before it looks at the abort flag again.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Signalled by the receiver of a synchronous send once the message has been matched.
#[derive(Debug, Default)]
struct Completion {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Completion {
    fn complete(&self) -> Result<()> {
        *lock(&self.done)? = true;
        self.signal.notify_all();
        Ok(())
    }
}

struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Box<dyn Any + Send>,
    completion: Option<Arc<Completion>>,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

#[derive(Debug, Default)]
struct BarrierState {
    waiting: usize,
    generation: u64,
    // whether the phase that ended with the last release had been aborted
    aborted_phase: bool,
}

/// State shared by all ranks of one universe
pub(crate) struct Shared {
    size: Rank,
    mailboxes: Vec<Mailbox>,
    barrier: Mutex<BarrierState>,
    barrier_released: Condvar,
    aborted: AtomicBool,
    phase_aborted: AtomicBool,
    timeout: Option<Duration>,
    epoch: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::transport(ErrorKind::Intern, "a rank panicked while holding a lock"))
}

impl Shared {
    pub(crate) fn new(size: Rank, timeout: Option<Duration>) -> Self {
        Shared {
            size,
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            barrier: Mutex::new(BarrierState::default()),
            barrier_released: Condvar::new(),
            aborted: AtomicBool::new(false),
            phase_aborted: AtomicBool::new(false),
            timeout,
            epoch: Instant::now(),
        }
    }

    /// Make every blocked and future operation fail.
    pub(crate) fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            warn!("a rank of the local universe aborted");
        }
        self.wake_all();
    }

    /// Make every blocked operation fail until the group passes `end_phase()`.
    fn abort_phase(&self) {
        self.phase_aborted.store(true, Ordering::SeqCst);
        self.wake_all();
    }

    fn wake_all(&self) {
        for mailbox in &self.mailboxes {
            mailbox.arrived.notify_all();
        }
        self.barrier_released.notify_all();
    }

    /// Like `check_running()`, but also fails once another rank aborted the current phase.
    #[track_caller]
    fn check_alive(&self, started: Instant, waiting_for: &str) -> Result<()> {
        if self.phase_aborted.load(Ordering::SeqCst) {
            return Err(Error::transport(
                ErrorKind::ProcAborted,
                format!("phase aborted by another rank while waiting for {}", waiting_for),
            ));
        }
        self.check_running(started, waiting_for)
    }

    /// Fails if the group aborted or `started` lies more than the timeout in the past.
    #[track_caller]
    fn check_running(&self, started: Instant, waiting_for: &str) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::transport(
                ErrorKind::ProcAborted,
                format!("group aborted while waiting for {}", waiting_for),
            ));
        }
        match self.timeout {
            Some(timeout) if started.elapsed() > timeout => Err(Error::transport(
                ErrorKind::Pending,
                format!("no progress after {:?} waiting for {}", timeout, waiting_for),
            )),
            _ => Ok(()),
        }
    }

    fn deliver(&self, destination: Rank, envelope: Envelope) -> Result<()> {
        let mailbox = &self.mailboxes[destination as usize];
        lock(&mailbox.queue)?.push_back(envelope);
        mailbox.arrived.notify_all();
        Ok(())
    }

    /// Take the oldest message from `source` with `tag` out of the mailbox of `destination`.
    fn take(&self, destination: Rank, source: Rank, tag: Tag) -> Result<Envelope> {
        let mailbox = &self.mailboxes[destination as usize];
        let started = Instant::now();
        let mut queue = lock(&mailbox.queue)?;
        loop {
            let position = queue
                .iter()
                .position(|e| e.source == source && e.tag == tag);
            if let Some(envelope) = position.and_then(|pos| queue.remove(pos)) {
                return Ok(envelope);
            }
            self.check_alive(started, &format!("a message from rank {}", source))?;
            queue = mailbox
                .arrived
                .wait_timeout(queue, POLL_INTERVAL)
                .map_err(|_| Error::transport(ErrorKind::Intern, "mailbox lock poisoned"))?
                .0;
        }
    }

    fn wait_for(&self, completion: &Completion, destination: Rank) -> Result<()> {
        let started = Instant::now();
        let mut done = lock(&completion.done)?;
        while !*done {
            self.check_alive(
                started,
                &format!("rank {} to match a synchronous send", destination),
            )?;
            done = completion
                .signal
                .wait_timeout(done, POLL_INTERVAL)
                .map_err(|_| Error::transport(ErrorKind::Intern, "completion lock poisoned"))?
                .0;
        }
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        let started = Instant::now();
        self.check_alive(started, "the barrier")?;
        let mut state = lock(&self.barrier)?;
        let generation = state.generation;
        state.waiting += 1;
        if state.waiting == self.size as usize {
            state.waiting = 0;
            state.generation += 1;
            self.barrier_released.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            if let Err(err) = self.check_alive(started, "the barrier") {
                state.waiting -= 1;
                return Err(err);
            }
            state = self
                .barrier_released
                .wait_timeout(state, POLL_INTERVAL)
                .map_err(|_| Error::transport(ErrorKind::Intern, "barrier lock poisoned"))?
                .0;
        }
        Ok(())
    }

    /// Barrier that ignores aborted phases. The last rank to arrive drops every message left
    /// over from an aborted phase before anybody continues.
    fn end_phase(&self) -> Result<bool> {
        let started = Instant::now();
        let mut state = lock(&self.barrier)?;
        let generation = state.generation;
        state.waiting += 1;
        if state.waiting == self.size as usize {
            let aborted = self.phase_aborted.swap(false, Ordering::SeqCst);
            if aborted {
                for mailbox in &self.mailboxes {
                    lock(&mailbox.queue)?.clear();
                }
            }
            state.waiting = 0;
            state.generation += 1;
            state.aborted_phase = aborted;
            self.barrier_released.notify_all();
            return Ok(aborted);
        }
        while state.generation == generation {
            if let Err(err) = self.check_running(started, "the end of the phase") {
                state.waiting -= 1;
                return Err(err);
            }
            state = self
                .barrier_released
                .wait_timeout(state, POLL_INTERVAL)
                .map_err(|_| Error::transport(ErrorKind::Intern, "barrier lock poisoned"))?
                .0;
        }
        Ok(state.aborted_phase)
    }
}

/// Unpack a message payload into the element type the receiver expects.
fn open<T: Element>(envelope: Envelope, expected: &str) -> Result<Vec<T>> {
    let Envelope { source, payload, .. } = envelope;
    match payload.downcast::<Vec<T>>() {
        Ok(data) => Ok(*data),
        Err(_) => Err(Error::transport(
            ErrorKind::Type,
            format!(
                "message from rank {} does not hold {} elements",
                source, expected
            ),
        )),
    }
}

/// The communicator handed to every rank of a local [`Universe`](crate::Universe)
#[derive(Clone)]
pub struct LocalCommunicator {
    rank: Rank,
    shared: Arc<Shared>,
}

impl LocalCommunicator {
    pub(crate) fn new(rank: Rank, shared: Arc<Shared>) -> Self {
        LocalCommunicator { rank, shared }
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    fn post(&self, destination: Rank, tag: Tag, payload: Box<dyn Any + Send>) -> Result<()> {
        self.shared.deliver(
            destination,
            Envelope {
                source: self.rank,
                tag,
                payload,
                completion: None,
            },
        )
    }
}

impl std::fmt::Debug for LocalCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl Communicator for LocalCommunicator {
    fn size(&self) -> Rank {
        self.shared.size
    }

    fn rank(&self) -> Rank {
        self.rank
    }

    fn time(&self) -> f64 {
        self.shared.epoch.elapsed().as_secs_f64()
    }
}

impl CommunicatorCollectives for LocalCommunicator {
    fn barrier(&self) -> Result<()> {
        self.shared.barrier()
    }

    fn abort_phase(&self) {
        self.shared.abort_phase();
    }

    fn end_phase(&self) -> Result<bool> {
        self.shared.end_phase()
    }

    fn reduce_into_root<T: Reducible>(
        &self,
        sendbuf: &[T],
        op: SystemOperation,
        root: Rank,
    ) -> Result<Option<Vec<T>>> {
        if !(0..self.size()).contains(&root) {
            return Err(Error::transport(
                ErrorKind::Root,
                format!("root {} outside of a group of {}", root, self.size()),
            ));
        }
        if self.rank != root {
            self.post(root, TAG_REDUCE, Box::new(sendbuf.to_vec()))?;
            return Ok(None);
        }

        let mut acc = sendbuf.to_vec();
        for source in (0..self.size()).filter(|&r| r != root) {
            let envelope = self.shared.take(self.rank, source, TAG_REDUCE)?;
            let values = open::<T>(envelope, std::any::type_name::<T>())?;
            if values.len() != acc.len() {
                return Err(Error::transport(
                    ErrorKind::Count,
                    format!(
                        "rank {} contributed {} values to a reduction of {}",
                        source,
                        values.len(),
                        acc.len()
                    ),
                ));
            }
            op.fold_into(&mut acc, &values);
        }
        Ok(Some(acc))
    }

    fn all_to_all_varcount_into<T: Element>(
        &self,
        sendbuf: &Partition<'_, T>,
        recvbuf: &mut PartitionMut<'_, T>,
    ) -> Result<()> {
        let size = self.size() as usize;
        if sendbuf.counts().len() != size || recvbuf.counts().len() != size {
            return Err(Error::transport(
                ErrorKind::Count,
                format!(
                    "partitions of {} and {} peers in a group of {}",
                    sendbuf.counts().len(),
                    recvbuf.counts().len(),
                    size
                ),
            ));
        }
        let me = self.rank as usize;

        if sendbuf.counts()[me] != recvbuf.counts()[me] {
            return Err(Error::transport(
                ErrorKind::Truncate,
                format!(
                    "rank {} sends {} elements to itself but expects {}",
                    me,
                    sendbuf.counts()[me],
                    recvbuf.counts()[me]
                ),
            ));
        }
        for peer in (0..size).filter(|&p| p != me && sendbuf.counts()[p] > 0) {
            self.post(peer as Rank, TAG_ALL_TO_ALL, Box::new(sendbuf.block(peer).to_vec()))?;
        }
        recvbuf.block_mut(me).copy_from_slice(sendbuf.block(me));

        for peer in (0..size).filter(|&p| p != me) {
            let expected = recvbuf.counts()[peer];
            if expected == 0 {
                continue;
            }
            let envelope = self.shared.take(self.rank, peer as Rank, TAG_ALL_TO_ALL)?;
            let data = open::<T>(envelope, std::any::type_name::<T>())?;
            if count_of(data.len())? != expected {
                return Err(Error::transport(
                    ErrorKind::Truncate,
                    format!(
                        "rank {} sent {} elements, rank {} expected {}",
                        peer,
                        data.len(),
                        me,
                        expected
                    ),
                ));
            }
            recvbuf.block_mut(peer).copy_from_slice(&data);
        }
        trace!(rank = self.rank, "all_to_all_varcount complete");
        Ok(())
    }
}

impl CommunicatorPointToPoint for LocalCommunicator {
    fn wait_all<T: Element>(
        &self,
        requests: &mut RequestSet,
        sendbuf: &[T],
        recvbuf: &mut [T],
    ) -> Result<()> {
        for request in requests.requests() {
            if request.operation.is_send() {
                request.check_bounds(sendbuf.len())?;
            } else {
                request.check_bounds(recvbuf.len())?;
            }
        }

        let mut statuses = vec![Status::default(); requests.len()];
        let mut pending: SmallVec<[(Rank, Arc<Completion>); 16]> = SmallVec::new();
        for (index, request) in requests.sends() {
            let completion = match request.operation {
                Operation::SynchronousSend => {
                    let completion = Arc::new(Completion::default());
                    pending.push((request.peer, Arc::clone(&completion)));
                    Some(completion)
                }
                _ => None,
            };
            self.shared.deliver(
                request.peer,
                Envelope {
                    source: self.rank,
                    tag: request.tag,
                    payload: Box::new(sendbuf[request.range()].to_vec()),
                    completion,
                },
            )?;
            statuses[index] = Status::new(request.peer, request.tag, count_of(request.count)?);
        }

        for (index, request) in requests.receives() {
            let mut envelope = self.shared.take(self.rank, request.peer, request.tag)?;
            // matched: the sender is released even if the message turns out not to fit
            if let Some(completion) = envelope.completion.take() {
                completion.complete()?;
            }
            let data = open::<T>(envelope, std::any::type_name::<T>())?;
            if data.len() > request.count {
                return Err(Error::transport(
                    ErrorKind::Truncate,
                    format!(
                        "{} elements from rank {} into a receive of {}",
                        data.len(),
                        request.peer,
                        request.count
                    ),
                ));
            }
            recvbuf[request.offset..request.offset + data.len()].copy_from_slice(&data);
            statuses[index] = Status::new(request.peer, request.tag, count_of(data.len())?);
        }

        for (destination, completion) in &pending {
            self.shared.wait_for(completion, *destination)?;
        }

        requests.complete_all(statuses);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::initialize_local;

    #[test]
    fn barrier_and_time() {
        let universe = initialize_local(4).unwrap();
        let times = universe.run(|world| {
            let before = world.time();
            for _ in 0..10 {
                world.barrier().unwrap();
            }
            world.time() >= before
        });
        assert!(times.into_iter().all(|ok| ok));
    }

    #[test]
    fn reduce_max_and_sum() {
        let universe = initialize_local(4).unwrap();
        let results = universe.run(|world| {
            let rank = world.rank();
            let max = world
                .reduce_into_root(&[rank as f64, -(rank as f64)], SystemOperation::Max, 0)
                .unwrap();
            let sum = world
                .reduce_into_root(&[rank as u64 + 1], SystemOperation::Sum, 0)
                .unwrap();
            (max, sum)
        });
        assert_eq!(results[0].0, Some(vec![3.0, 0.0]));
        assert_eq!(results[0].1, Some(vec![10]));
        assert!(results[1..].iter().all(|(m, s)| m.is_none() && s.is_none()));
    }

    #[test]
    fn reduce_with_invalid_root() {
        let universe = initialize_local(2).unwrap();
        universe.run(|world| {
            let err = world
                .reduce_into_root(&[1u64], SystemOperation::Sum, 2)
                .unwrap_err();
            assert_eq!(err.kind(), Some(ErrorKind::Root));
        });
    }

    #[test]
    fn all_to_all_varcount_moves_blocks() {
        // rank r sends r + 1 copies of its rank to every other rank
        let universe = initialize_local(3).unwrap();
        let received = universe.run(|world| {
            let me = world.rank();
            let size = world.size() as usize;
            let send = vec![me; me as usize + 1];
            let send_counts: Vec<i32> = (0..size as i32)
                .map(|p| if p == me { 0 } else { me + 1 })
                .collect();
            let send_displs = vec![0; size];
            let recv_counts: Vec<i32> = (0..size as i32)
                .map(|p| if p == me { 0 } else { p + 1 })
                .collect();
            let mut recv_displs = vec![0; size];
            for p in 1..size {
                recv_displs[p] = recv_displs[p - 1] + recv_counts[p - 1];
            }
            let mut recv = vec![-1; 6];
            {
                let s = Partition::new(&send[..], &send_counts, &send_displs).unwrap();
                let mut r = PartitionMut::new(&mut recv[..], &recv_counts, &recv_displs).unwrap();
                world.all_to_all_varcount_into(&s, &mut r).unwrap();
            }
            recv
        });
        assert_eq!(received[0], [1, 1, 2, 2, 2, -1]);
        assert_eq!(received[1], [0, 2, 2, 2, -1, -1]);
        assert_eq!(received[2], [0, 1, 1, -1, -1, -1]);
    }

    #[test]
    fn synchronous_sends_complete_after_matching() {
        let universe = initialize_local(2).unwrap();
        let received = universe.run(|world| {
            let peer = 1 - world.rank();
            let send = [world.rank() * 10, world.rank() * 10 + 1, 7];
            let mut recv = [0; 4];
            let mut requests = RequestSet::with_capacity(2);
            world
                .immediate_receive_into(&mut requests, peer, 1, 3)
                .unwrap();
            world
                .immediate_synchronous_send(&mut requests, peer, 0, 2)
                .unwrap();
            world.wait_all(&mut requests, &send[..], &mut recv[..]).unwrap();
            assert_eq!(requests.outstanding(), 0);
            assert_eq!(requests.statuses()[0].count(), 2);
            recv
        });
        assert_eq!(received[0], [0, 10, 11, 0]);
        assert_eq!(received[1], [0, 0, 1, 0]);
    }

    #[test]
    fn oversized_message_is_truncation() {
        let universe = initialize_local(2).unwrap();
        universe.run(|world| {
            let mut requests = RequestSet::with_capacity(2);
            let send = [1u8; 4];
            let mut recv = [0u8; 4];
            if world.rank() == 0 {
                world.immediate_send(&mut requests, 1, 0, 4).unwrap();
                world.wait_all(&mut requests, &send[..], &mut recv[..]).unwrap();
            } else {
                world.immediate_receive_into(&mut requests, 0, 0, 2).unwrap();
                let err = world
                    .wait_all(&mut requests, &send[..], &mut recv[..])
                    .unwrap_err();
                assert_eq!(err.kind(), Some(ErrorKind::Truncate));
            }
        });
    }

    #[test]
    fn truncated_receive_releases_synchronous_sender() {
        let universe = initialize_local(2)
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        let results = universe.run(|world| {
            let mut requests = RequestSet::with_capacity(1);
            let send = [5i32; 4];
            let mut recv = [0i32; 4];
            if world.rank() == 1 {
                world
                    .immediate_synchronous_send(&mut requests, 0, 0, 4)
                    .unwrap();
            } else {
                world.immediate_receive_into(&mut requests, 1, 0, 2).unwrap();
            }
            world
                .wait_all(&mut requests, &send[..], &mut recv[..])
                .map_err(|err| err.kind())
        });
        assert_eq!(results[0], Err(Some(ErrorKind::Truncate)));
        assert_eq!(results[1], Ok(()));
    }

    #[test]
    fn self_block_mismatch_sends_nothing() {
        let universe = initialize_local(2)
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        universe.run(|world| {
            let send = [1i32, 2];
            let mut recv = [0i32; 2];
            if world.rank() == 0 {
                // one element for rank 1, but a self block that does not match
                let s = Partition::new(&send[..], &[1, 1], &[0, 1]).unwrap();
                let mut r = PartitionMut::new(&mut recv[..], &[0, 0], &[0, 0]).unwrap();
                let err = world.all_to_all_varcount_into(&s, &mut r).unwrap_err();
                assert_eq!(err.kind(), Some(ErrorKind::Truncate));
            }
            world.barrier().unwrap();
            // nothing from the failed call may be left for rank 1 to match
            let queued = lock(&world.shared.mailboxes[1].queue).unwrap().len();
            assert_eq!(queued, 0);
        });
    }

    #[test]
    fn aborted_phase_releases_blocked_ranks() {
        let universe = initialize_local(3)
            .unwrap()
            .with_timeout(Duration::from_secs(10));
        let results = universe.run(|world| {
            let mut requests = RequestSet::with_capacity(2);
            let send = [world.rank(); 2];
            let mut recv = [0i32; 2];
            let failed = if world.rank() == 0 {
                // leaves a message behind and never serves the receives of the others
                world.immediate_send(&mut requests, 1, 0, 2).unwrap();
                world.wait_all(&mut requests, &send[..], &mut recv[..]).unwrap();
                world.abort_phase();
                None
            } else {
                world.immediate_receive_into(&mut requests, 0, 0, 2).unwrap();
                world.immediate_receive_into(&mut requests, 0, 0, 2).unwrap();
                let err = world
                    .wait_all(&mut requests, &send[..], &mut recv[..])
                    .unwrap_err();
                err.kind()
            };
            let aborted = world.end_phase().unwrap();

            // the group is usable again and holds no stale messages
            let mut requests = RequestSet::with_capacity(2);
            let peer = (world.rank() + 1) % 3;
            let from = (world.rank() + 2) % 3;
            world.immediate_receive_into(&mut requests, from, 0, 1).unwrap();
            world.immediate_synchronous_send(&mut requests, peer, 0, 1).unwrap();
            let mut recv = [-1i32; 2];
            world.wait_all(&mut requests, &send[..], &mut recv[..]).unwrap();
            assert!(!world.end_phase().unwrap());
            (failed, aborted, recv[0])
        });
        assert_eq!(results[0], (None, true, 2));
        assert_eq!(results[1], (Some(ErrorKind::ProcAborted), true, 0));
        assert_eq!(results[2], (Some(ErrorKind::ProcAborted), true, 1));
    }

    #[test]
    fn unmatched_receive_times_out() {
        let universe = initialize_local(2)
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        universe.run(|world| {
            if world.rank() == 0 {
                let mut requests = RequestSet::with_capacity(1);
                world.immediate_receive_into(&mut requests, 1, 0, 1).unwrap();
                let send: [i32; 0] = [];
                let mut recv = [0i32; 1];
                let err = world
                    .wait_all(&mut requests, &send[..], &mut recv[..])
                    .unwrap_err();
                assert_eq!(err.kind(), Some(ErrorKind::Pending));
            }
        });
    }
}
