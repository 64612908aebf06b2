//! Send and receive buffers
//!
//! A run owns one send buffer holding the data of every iteration back to back and one receive
//! buffer that every iteration overwrites. Where the block for a peer lives inside an iteration's
//! region is computed by a [`BlockLayout`] from the iteration's descriptor.

use std::fmt;

use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::pattern::synthetic::SyntheticPattern;
use crate::pattern::{Direction, PatternDescriptor, PatternSource};
use crate::topology::Rank;

/// How the blocks of a descriptor are placed in a buffer region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Spacing {
    /// Blocks follow each other without padding, in list order.
    Packed,
    /// Peer `p` owns the fixed slot `p / divisor`, slots are `stride` elements apart.
    Strided {
        /// Distance between two slots
        stride: usize,
        /// Maps a peer rank to its slot
        divisor: Rank,
        /// Number of slots in the region
        slots: usize,
    },
}

/// Element offsets of the blocks of one descriptor, in list order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockLayout {
    offsets: Vec<usize>,
    extent: usize,
}

impl BlockLayout {
    /// Place the blocks of `descriptor`.
    pub fn new(descriptor: &PatternDescriptor, spacing: Spacing) -> Result<Self> {
        match spacing {
            Spacing::Packed => {
                let mut offsets = Vec::with_capacity(descriptor.len());
                let mut cursor = 0;
                for entry in descriptor.entries() {
                    offsets.push(cursor);
                    cursor += entry.amount;
                }
                Ok(BlockLayout {
                    offsets,
                    extent: cursor,
                })
            }
            Spacing::Strided {
                stride,
                divisor,
                slots,
            } => {
                if divisor < 1 {
                    return Err(Error::Pattern(format!("slot divisor {}", divisor)));
                }
                let offsets = descriptor
                    .entries()
                    .iter()
                    .map(|entry| {
                        let slot = (entry.peer / divisor) as usize;
                        if slot >= slots || entry.amount > stride {
                            Err(Error::Pattern(format!(
                                "block of {} elements for peer {} does not fit slot {} of {}",
                                entry.amount, entry.peer, slot, slots
                            )))
                        } else {
                            Ok(slot * stride)
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(BlockLayout {
                    offsets,
                    extent: slots * stride,
                })
            }
        }
    }

    /// Offset of every block, indexed like the descriptor's entries
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Length of the region the blocks live in
    pub fn extent(&self) -> usize {
        self.extent
    }
}

/// Values used to initialize buffers
pub trait Fill: Element + PartialEq + fmt::Debug {
    /// Send buffer elements that belong to no block
    fn unset() -> Self;
    /// Receive buffer elements before an exchange
    fn sentinel() -> Self;
    /// Content of a synthetic block sent by `rank`
    fn identity(rank: Rank) -> Self;
    /// Element `index` of a replayed iteration's send region on `rank`
    fn pattern_byte(rank: Rank, index: usize) -> Self;
}

impl Fill for i32 {
    fn unset() -> Self {
        -2
    }
    fn sentinel() -> Self {
        -3
    }
    fn identity(rank: Rank) -> Self {
        rank
    }
    fn pattern_byte(rank: Rank, index: usize) -> Self {
        ((rank as usize + index) % 128) as i32
    }
}

impl Fill for u8 {
    fn unset() -> Self {
        0xfe
    }
    fn sentinel() -> Self {
        0xfd
    }
    fn identity(rank: Rank) -> Self {
        (rank % 251) as u8
    }
    fn pattern_byte(rank: Rank, index: usize) -> Self {
        ((rank as usize + index) % 128) as u8
    }
}

/// The send data of every iteration
#[derive(Clone, Debug)]
pub struct SendBuffer<T> {
    data: Vec<T>,
    starts: Vec<usize>,
}

impl<T: Element> SendBuffer<T> {
    /// The region of `iteration`
    pub fn iteration(&self, iteration: usize) -> &[T] {
        &self.data[self.starts[iteration]..self.starts[iteration + 1]]
    }

    /// Number of iterations
    pub fn iterations(&self) -> usize {
        self.starts.len() - 1
    }

    /// The whole buffer
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// The buffer every iteration receives into
#[derive(Clone, Debug)]
pub struct RecvBuffer<T> {
    data: Vec<T>,
    sentinel: T,
}

impl<T: Element> RecvBuffer<T> {
    /// A buffer of `len` sentinel elements
    pub fn new(len: usize, sentinel: T) -> Self {
        RecvBuffer {
            data: vec![sentinel; len],
            sentinel,
        }
    }

    /// Overwrite everything with the sentinel.
    pub fn reset(&mut self) {
        let sentinel = self.sentinel;
        self.data.fill(sentinel);
    }

    /// The received data
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The buffer for the next exchange
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Both buffers of a run
#[derive(Clone, Debug)]
pub struct Buffers<T> {
    /// Send data of every iteration
    pub send: SendBuffer<T>,
    /// The reused receive region
    pub recv: RecvBuffer<T>,
}

impl<T: Fill> Buffers<T> {
    /// Buffers for a synthetic run: every block a rank sends holds its identity, the rest of the
    /// send buffer is marked unset.
    pub fn for_synthetic(pattern: &SyntheticPattern) -> Result<Self> {
        let iterations = pattern.iterations();
        let layout = pattern.layout(0, Direction::Send)?;
        let region = layout.extent();
        let me = T::identity(pattern.rank());

        let mut data = vec![T::unset(); region * iterations];
        let send = pattern.pattern(0).send;
        for i in 0..iterations {
            let base = i * region;
            for (entry, &offset) in send.entries().iter().zip(layout.offsets()) {
                let start = base + offset;
                data[start..start + entry.amount].fill(me);
            }
        }
        let starts = (0..=iterations).map(|i| i * region).collect();

        let recv_len = pattern.layout(0, Direction::Receive)?.extent();
        Ok(Buffers {
            send: SendBuffer { data, starts },
            recv: RecvBuffer::new(recv_len, T::sentinel()),
        })
    }

    /// Buffers for a replayed run: each iteration's region is filled with the rank dependent
    /// byte pattern, the receive buffer fits the largest iteration.
    pub fn for_trace<S: PatternSource>(source: &S) -> Result<Self> {
        let rank = source.rank();
        let mut starts = Vec::with_capacity(source.iterations() + 1);
        let mut data = Vec::new();
        let mut recv_len = 0;
        starts.push(0);
        for i in 0..source.iterations() {
            let extent = source.layout(i, Direction::Send)?.extent();
            data.extend((0..extent).map(|j| T::pattern_byte(rank, j)));
            starts.push(data.len());
            recv_len = recv_len.max(source.layout(i, Direction::Receive)?.extent());
        }
        Ok(Buffers {
            send: SendBuffer { data, starts },
            recv: RecvBuffer::new(recv_len, T::sentinel()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;

    #[test]
    fn packed_layout_follows_list_order() {
        let d = PatternDescriptor::new(vec![(5, 3), (1, 2), (2, 4)]).unwrap();
        let layout = BlockLayout::new(&d, Spacing::Packed).unwrap();
        assert_eq!(layout.offsets(), [0, 3, 5]);
        assert_eq!(layout.extent(), 9);
    }

    #[test]
    fn strided_layout_rejects_blocks_outside_their_slot() {
        let d = PatternDescriptor::new(vec![(3, 2)]).unwrap();
        let spacing = Spacing::Strided {
            stride: 2,
            divisor: 1,
            slots: 3,
        };
        assert!(BlockLayout::new(&d, spacing).is_err());
        let wide = PatternDescriptor::new(vec![(1, 3)]).unwrap();
        assert!(BlockLayout::new(&wide, spacing).is_err());
    }

    #[test]
    fn synthetic_send_buffer() {
        let config = BenchConfig {
            ntimes: 2,
            ratio: 2,
            len: 2,
            gap: 1,
            ..BenchConfig::default()
        };
        let pattern = SyntheticPattern::new(4, 1, &config).unwrap();
        let buffers = Buffers::<i32>::for_synthetic(&pattern).unwrap();
        assert_eq!(buffers.send.iterations(), 2);
        assert_eq!(buffers.send.iteration(1), [1, 1, -2, 1, 1, -2]);
        assert_eq!(buffers.send.as_slice().len(), 12);
        // rank 1 does not receive
        assert!(buffers.recv.as_slice().is_empty());
    }

    #[test]
    fn receive_buffer_reset() {
        let mut recv = RecvBuffer::new(4, -3);
        recv.as_mut_slice()[2] = 7;
        recv.reset();
        assert_eq!(recv.as_slice(), [-3; 4]);
    }
}
