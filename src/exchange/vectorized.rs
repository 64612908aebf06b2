//! Vectorized exchange
//!
//! Every iteration is a single `all_to_all_varcount_into()` over dense per-peer count and
//! displacement tables. The tables are projected from the sparse descriptors; for a static
//! pattern they are built once and kept for the whole run.

use once_cell::unsync::OnceCell;
use tracing::trace;

use crate::buffer::BlockLayout;
use crate::collective::CommunicatorCollectives;
use crate::datatype::{count_of, Element, Partition, PartitionMut};
use crate::error::Result;
use crate::pattern::{Direction, PatternDescriptor, PatternSource};
use crate::topology::Rank;
use crate::Count;

/// Counts and displacements for every rank of the group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseCountTable {
    counts: Vec<Count>,
    displs: Vec<Count>,
}

impl DenseCountTable {
    /// Project `descriptor` placed by `layout` onto a group of `size`.
    ///
    /// Peers that are absent, outside the group or equal to `rank` get a zero count.
    pub fn project(
        descriptor: &PatternDescriptor,
        layout: &BlockLayout,
        size: Rank,
        rank: Rank,
    ) -> Result<Self> {
        let mut counts = vec![0; size as usize];
        let mut displs = vec![0; size as usize];
        for (entry, &offset) in descriptor.entries().iter().zip(layout.offsets()) {
            if entry.peer == rank || entry.peer >= size {
                continue;
            }
            counts[entry.peer as usize] = count_of(entry.amount)?;
            displs[entry.peer as usize] = count_of(offset)?;
        }
        Ok(DenseCountTable { counts, displs })
    }

    /// Elements per peer
    pub fn counts(&self) -> &[Count] {
        &self.counts
    }

    /// Offset of every peer's block
    pub fn displs(&self) -> &[Count] {
        &self.displs
    }
}

#[derive(Debug)]
struct Tables {
    send: DenseCountTable,
    recv: DenseCountTable,
}

impl Tables {
    fn build<S: PatternSource>(source: &S, iteration: usize, size: Rank) -> Result<Self> {
        let rank = source.rank();
        let pattern = source.pattern(iteration);
        Ok(Tables {
            send: DenseCountTable::project(
                pattern.send,
                &source.layout(iteration, Direction::Send)?,
                size,
                rank,
            )?,
            recv: DenseCountTable::project(
                pattern.recv,
                &source.layout(iteration, Direction::Receive)?,
                size,
                rank,
            )?,
        })
    }
}

/// The vectorized strategy
///
/// An instance serves one pattern source; the tables of a static source are cached after the
/// first iteration.
#[derive(Debug, Default)]
pub struct VectorizedExchange {
    cached: OnceCell<Tables>,
}

impl VectorizedExchange {
    /// A strategy with no cached tables
    pub fn new() -> Self {
        VectorizedExchange {
            cached: OnceCell::new(),
        }
    }

    /// Exchange the data of `iteration`.
    pub fn exchange<C, S, T>(
        &mut self,
        comm: &C,
        source: &S,
        iteration: usize,
        send: &[T],
        recv: &mut [T],
    ) -> Result<()>
    where
        C: CommunicatorCollectives,
        S: PatternSource,
        T: Element,
    {
        let size = comm.size();
        let scratch;
        let tables = if source.is_static() {
            self.cached
                .get_or_try_init(|| Tables::build(source, iteration, size))?
        } else {
            scratch = Tables::build(source, iteration, size)?;
            &scratch
        };

        let sendbuf = Partition::new(send, tables.send.counts(), tables.send.displs())?;
        let mut recvbuf = PartitionMut::new(recv, tables.recv.counts(), tables.recv.displs())?;
        comm.all_to_all_varcount_into(&sendbuf, &mut recvbuf)?;
        trace!(rank = comm.rank(), iteration, "vectorized exchange done");
        Ok(())
    }
}
