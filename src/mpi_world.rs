//! The process group of an MPI library
//!
//! [`MpiCommunicator`] adapts the world communicator of the `mpi` crate to the traits of this
//! crate. Errors of the library abort the job through its default error handler, so the methods
//! only fail on invalid arguments that are caught before the library is called. A rank that fails
//! a phase aborts the job for the same reason.

use mpi::collective::SystemOperation as MpiOperation;
use mpi::datatype::{Partition as MpiPartition, PartitionMut as MpiPartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::{
    Communicator as _, CommunicatorCollectives as _, Destination as _, Root as _, Source as _,
};

use crate::collective::{CommunicatorCollectives, Reducible, SystemOperation};
use crate::datatype::{count_of, Element, Partition, PartitionMut, Partitioned};
use crate::error::{Error, ErrorKind, Result};
use crate::point_to_point::CommunicatorPointToPoint;
use crate::request::{Operation, Request, RequestSet, Status};
use crate::topology::{Communicator, Rank};
use crate::Count;

/// The MPI world communicator
pub struct MpiCommunicator {
    world: SimpleCommunicator,
}

/// Initialize MPI, run `f` on the world communicator of this process and finalize.
pub fn run<F>(f: F) -> Result<()>
where
    F: FnOnce(&MpiCommunicator) -> Result<()>,
{
    let universe = mpi::initialize()
        .ok_or_else(|| Error::Config("MPI has already been initialized".into()))?;
    let comm = MpiCommunicator {
        world: universe.world(),
    };
    f(&comm)
}

fn operation(op: SystemOperation) -> MpiOperation {
    match op {
        SystemOperation::Max => MpiOperation::max(),
        SystemOperation::Sum => MpiOperation::sum(),
    }
}

impl Communicator for MpiCommunicator {
    fn size(&self) -> Rank {
        self.world.size()
    }

    fn rank(&self) -> Rank {
        self.world.rank()
    }

    fn time(&self) -> f64 {
        mpi::environment::time()
    }
}

impl CommunicatorCollectives for MpiCommunicator {
    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn reduce_into_root<T: Reducible>(
        &self,
        sendbuf: &[T],
        op: SystemOperation,
        root: Rank,
    ) -> Result<Option<Vec<T>>> {
        self.check_rank(root)
            .map_err(|_| Error::transport(ErrorKind::Root, format!("invalid root {}", root)))?;
        let root_process = self.world.process_at_rank(root);
        if self.rank() == root {
            let mut recv = sendbuf.to_vec();
            root_process.reduce_into_root(sendbuf, &mut recv[..], operation(op));
            Ok(Some(recv))
        } else {
            root_process.reduce_into(sendbuf, operation(op));
            Ok(None)
        }
    }

    fn all_to_all_varcount_into<T: Element>(
        &self,
        sendbuf: &Partition<'_, T>,
        recvbuf: &mut PartitionMut<'_, T>,
    ) -> Result<()> {
        let send = MpiPartition::new(sendbuf.buffer(), sendbuf.counts(), sendbuf.displs());
        let (buf, counts, displs) = recvbuf.parts_mut();
        let mut recv = MpiPartitionMut::new(buf, counts, displs);
        self.world.all_to_all_varcount_into(&send, &mut recv);
        Ok(())
    }

    fn abort_phase(&self) {
        self.world.abort(1)
    }

    fn end_phase(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Split `recvbuf` into the disjoint blocks of the posted receives.
fn receive_blocks<'b, T>(
    receives: &[(usize, Request)],
    recvbuf: &'b mut [T],
) -> Result<Vec<(usize, Request, &'b mut [T])>> {
    let mut sorted: Vec<_> = receives.to_vec();
    sorted.sort_by_key(|(_, r)| r.offset);
    let mut blocks = Vec::with_capacity(sorted.len());
    let mut rest = recvbuf;
    let mut consumed = 0;
    for (index, request) in sorted {
        if request.offset < consumed {
            return Err(Error::transport(
                ErrorKind::Buffer,
                format!("receive from rank {} overlaps another receive", request.peer),
            ));
        }
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(request.offset - consumed);
        let (block, tail) = tail.split_at_mut(request.count);
        blocks.push((index, request, block));
        rest = tail;
        consumed = request.offset + request.count;
    }
    Ok(blocks)
}

impl CommunicatorPointToPoint for MpiCommunicator {
    fn wait_all<T: Element>(
        &self,
        requests: &mut RequestSet,
        sendbuf: &[T],
        recvbuf: &mut [T],
    ) -> Result<()> {
        for request in requests.requests() {
            let len = if request.operation.is_send() {
                sendbuf.len()
            } else {
                recvbuf.len()
            };
            request.check_bounds(len)?;
        }
        let receives: Vec<(usize, Request)> = requests.receives().map(|(i, r)| (i, *r)).collect();
        let sends: Vec<(usize, Request)> = requests.sends().map(|(i, r)| (i, *r)).collect();
        let blocks = receive_blocks(&receives, recvbuf)?;

        let mut statuses = vec![Status::default(); requests.len()];
        mpi::request::multiple_scope(requests.len(), |scope, coll| {
            // position in the collection -> index and request in the set
            let mut order = Vec::with_capacity(requests.len());
            for (index, request, block) in blocks {
                let process = self.world.process_at_rank(request.peer);
                coll.add(process.immediate_receive_into_with_tag(scope, block, request.tag));
                order.push((index, request));
            }
            for (index, request) in &sends {
                let process = self.world.process_at_rank(request.peer);
                let data = &sendbuf[request.range()];
                coll.add(match request.operation {
                    Operation::SynchronousSend => {
                        process.immediate_synchronous_send_with_tag(scope, data, request.tag)
                    }
                    _ => process.immediate_send_with_tag(scope, data, request.tag),
                });
                order.push((*index, *request));
            }
            let mut completed = Vec::with_capacity(order.len());
            coll.wait_all(&mut completed);
            for (slot, status, _) in completed {
                let (index, request) = order[slot];
                statuses[index] = if request.operation.is_send() {
                    let count = count_of(request.count).unwrap_or(Count::MAX);
                    Status::new(request.peer, request.tag, count)
                } else {
                    Status::new(
                        status.source_rank(),
                        status.tag(),
                        status.count(T::equivalent_datatype()),
                    )
                };
            }
        });
        requests.complete_all(statuses);
        Ok(())
    }
}
