//! Ratio driven all-to-many pattern
//!
//! Ranks `0, R, 2R, ...` receive, every rank sends `L` elements to every receiver other than
//! itself. The pattern is the same in every iteration.

use conv::ConvUtil;
use smallvec::SmallVec;
use tracing::debug;

use super::{Direction, IterationPattern, PatternDescriptor, PatternSource};
use crate::buffer::Spacing;
use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::topology::Rank;

/// The synthetic pattern of one rank
#[derive(Clone, Debug)]
pub struct SyntheticPattern {
    size: Rank,
    rank: Rank,
    ratio: Rank,
    len: usize,
    gap: usize,
    ntimes: usize,
    receivers: SmallVec<[Rank; 16]>,
    send: PatternDescriptor,
    recv: PatternDescriptor,
}

/// The ratio actually used in a group of `size`: out of range ratios fall back to 1.
pub fn effective_ratio(ratio: i32, size: Rank) -> Rank {
    if ratio <= 0 || ratio > size {
        1
    } else {
        ratio
    }
}

impl SyntheticPattern {
    /// Derive the pattern of `rank` in a group of `size` from `config`.
    pub fn new(size: Rank, rank: Rank, config: &BenchConfig) -> Result<Self> {
        config.validate()?;
        if !(0..size).contains(&rank) {
            return Err(Error::Config(format!(
                "rank {} outside of a group of {}",
                rank, size
            )));
        }
        let ratio = effective_ratio(config.ratio, size);
        let mut count = size / ratio;
        if let Some(cap) = config.max_receivers {
            let cap = cap.value_as::<Rank>().unwrap_or(Rank::MAX);
            count = count.min(cap);
        }
        let receivers: SmallVec<[Rank; 16]> = (0..count).map(|i| i * ratio).collect();

        let send = PatternDescriptor::new(
            receivers
                .iter()
                .filter(|&&r| r != rank)
                .map(|&r| (r, config.len)),
        )?;
        let recv = if receivers.contains(&rank) {
            PatternDescriptor::new((0..size).filter(|&p| p != rank).map(|p| (p, config.len)))?
        } else {
            PatternDescriptor::default()
        };

        if config.verbose {
            if rank == 0 {
                debug!(?receivers, "receiver ranks");
            }
            for e in send.entries() {
                debug!("rank {} send to {} of {}", rank, e.peer, e.amount);
            }
            for e in recv.entries() {
                debug!("rank {} recv from {} of {}", rank, e.peer, e.amount);
            }
        }

        Ok(SyntheticPattern {
            size,
            rank,
            ratio,
            len: config.len,
            gap: config.gap,
            ntimes: config.ntimes,
            receivers,
            send,
            recv,
        })
    }

    /// Size of the group
    pub fn size(&self) -> Rank {
        self.size
    }

    /// The ratio after range correction
    pub fn ratio(&self) -> Rank {
        self.ratio
    }

    /// The receiving ranks, in ascending order
    pub fn receivers(&self) -> &[Rank] {
        &self.receivers
    }

    /// Whether this rank receives data.
    pub fn is_receiver(&self) -> bool {
        self.receivers.contains(&self.rank)
    }

    /// Elements per message
    pub fn message_len(&self) -> usize {
        self.len
    }

    /// Padding between consecutive blocks
    pub fn gap(&self) -> usize {
        self.gap
    }

    /// Distance between the starts of consecutive blocks
    pub fn stride(&self) -> usize {
        self.len + self.gap
    }
}

impl PatternSource for SyntheticPattern {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn iterations(&self) -> usize {
        self.ntimes
    }

    fn is_static(&self) -> bool {
        true
    }

    fn pattern(&self, _iteration: usize) -> IterationPattern<'_> {
        IterationPattern {
            send: &self.send,
            recv: &self.recv,
        }
    }

    // A block keeps its slot even where the pair does not communicate, so every slot of a buffer
    // can be checked against the rank that owns it.
    fn spacing(&self, direction: Direction) -> Spacing {
        match direction {
            Direction::Send => Spacing::Strided {
                stride: self.stride(),
                divisor: self.ratio,
                slots: self.receivers.len(),
            },
            Direction::Receive => Spacing::Strided {
                stride: self.stride(),
                divisor: 1,
                slots: if self.is_receiver() {
                    self.size as usize
                } else {
                    0
                },
            },
        }
    }
}
