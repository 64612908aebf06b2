//! Sparse communication patterns
//!
//! A [`PatternDescriptor`] lists, for one iteration and one direction, the peers this rank
//! exchanges data with and how many elements move per peer. Peers absent from a descriptor do not
//! take part; in particular a rank never appears in its own descriptors.
//!
//! Descriptors are produced by a [`PatternSource`]: either the ratio driven generator in
//! [`synthetic`] or a replayed trace in [`trace`].

use smallvec::SmallVec;

use crate::buffer::{BlockLayout, Spacing};
use crate::error::{Error, Result};
use crate::topology::Rank;

pub mod synthetic;
pub mod trace;

/// One peer of a descriptor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PatternEntry {
    /// The peer rank
    pub peer: Rank,
    /// Elements moved to or from `peer`
    pub amount: usize,
}

/// The peers of one direction of one iteration, in list order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatternDescriptor {
    entries: SmallVec<[PatternEntry; 8]>,
}

impl PatternDescriptor {
    /// Build a descriptor from `(peer, amount)` pairs.
    ///
    /// Entries with a zero amount are dropped. Negative peers and peers listed twice are
    /// rejected.
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Rank, usize)>,
    {
        let mut descriptor = PatternDescriptor::default();
        for (peer, amount) in entries {
            if peer < 0 {
                return Err(Error::Pattern(format!("negative peer rank {}", peer)));
            }
            if descriptor.entries.iter().any(|e| e.peer == peer) {
                return Err(Error::Pattern(format!("peer {} listed twice", peer)));
            }
            if amount > 0 {
                descriptor.entries.push(PatternEntry { peer, amount });
            }
        }
        Ok(descriptor)
    }

    /// The entries in list order
    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    /// Number of participating peers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no peer participates
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Elements moved over all peers
    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.amount).sum()
    }

    /// The amount for `peer`, zero if it does not participate.
    pub fn amount_for(&self, peer: Rank) -> usize {
        self.entries
            .iter()
            .find(|e| e.peer == peer)
            .map_or(0, |e| e.amount)
    }

    /// Drop `peer` from the descriptor.
    pub fn without_peer(mut self, peer: Rank) -> Self {
        self.entries.retain(|e| e.peer != peer);
        self
    }

    /// Drop every peer outside a group of `size` ranks.
    pub fn restricted_to(mut self, size: Rank) -> Self {
        self.entries.retain(|e| e.peer < size);
        self
    }
}

/// Which side of an exchange a descriptor describes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// What this rank sends
    Send,
    /// What this rank receives
    Receive,
}

/// Both descriptors of one iteration
#[derive(Copy, Clone, Debug)]
pub struct IterationPattern<'a> {
    /// What this rank sends
    pub send: &'a PatternDescriptor,
    /// What this rank receives
    pub recv: &'a PatternDescriptor,
}

impl<'a> IterationPattern<'a> {
    /// The descriptor of `direction`
    pub fn get(&self, direction: Direction) -> &'a PatternDescriptor {
        match direction {
            Direction::Send => self.send,
            Direction::Receive => self.recv,
        }
    }
}

/// Produces the descriptors of every iteration of a run for one rank
pub trait PatternSource {
    /// The rank the descriptors belong to
    fn rank(&self) -> Rank;

    /// Number of iterations
    fn iterations(&self) -> usize;

    /// Whether every iteration has the same descriptors.
    fn is_static(&self) -> bool;

    /// Descriptors of `iteration`
    fn pattern(&self, iteration: usize) -> IterationPattern<'_>;

    /// How the blocks of `direction` are placed in their buffer
    fn spacing(&self, direction: Direction) -> Spacing;

    /// Elements the captured run moved in `direction` during `iteration`, before any peers were
    /// dropped. For generated patterns this is what the descriptor moves.
    fn captured_amount(&self, iteration: usize, direction: Direction) -> usize {
        self.pattern(iteration).get(direction).total()
    }

    /// Buffer offsets of the blocks of `direction` in `iteration`
    fn layout(&self, iteration: usize, direction: Direction) -> Result<BlockLayout> {
        BlockLayout::new(
            self.pattern(iteration).get(direction),
            self.spacing(direction),
        )
    }
}
