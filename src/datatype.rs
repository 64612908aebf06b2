//! Element types and partitioned buffers
//!
//! Messages are slices of an [`Element`] type. Operations that address several peers at once
//! take a buffer together with a per-peer partitioning: a count and a displacement (both in
//! elements) for every rank of the group.

use conv::ConvUtil;

use crate::error::{Error, ErrorKind, Result};
use crate::Count;

/// Datatype traits
pub mod traits {
    pub use super::{Element, Partitioned};
}

/// A plain value type that can be moved between processes.
#[cfg(not(feature = "mpi"))]
pub trait Element: Copy + Send + Sync + 'static {}

/// A plain value type that can be moved between processes.
#[cfg(feature = "mpi")]
pub trait Element: Copy + Send + Sync + 'static + mpi::datatype::Equivalence {}

macro_rules! element_impls {
    ($($t:ty),*) => {
        $(impl Element for $t {})*
    }
}

element_impls!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Convert a buffer length or offset into a `Count`.
#[track_caller]
pub fn count_of(n: usize) -> Result<Count> {
    match n.value_as::<Count>() {
        Ok(count) => Ok(count),
        Err(_) => Err(Error::transport(
            ErrorKind::Count,
            format!("{} exceeds the range of a count", n),
        )),
    }
}

/// Convert a `Count` into a buffer length or offset.
#[track_caller]
pub fn len_of(count: Count) -> Result<usize> {
    match count.value_as::<usize>() {
        Ok(len) => Ok(len),
        Err(_) => Err(Error::transport(
            ErrorKind::Count,
            format!("negative count {}", count),
        )),
    }
}

/// Something that has a per-peer partitioning
pub trait Partitioned {
    /// The count of elements in each partition.
    fn counts(&self) -> &[Count];
    /// The displacement from the start of the buffer for each partition.
    fn displs(&self) -> &[Count];

    /// Sum of all counts.
    fn total(&self) -> usize {
        self.counts().iter().map(|&c| c.max(0) as usize).sum()
    }
}

fn check_partitioning(len: usize, counts: &[Count], displs: &[Count]) -> Result<()> {
    if counts.len() != displs.len() {
        return Err(Error::transport(
            ErrorKind::Count,
            format!(
                "{} counts but {} displacements",
                counts.len(),
                displs.len()
            ),
        ));
    }
    for (peer, (&c, &d)) in counts.iter().zip(displs.iter()).enumerate() {
        let end = len_of(c)? + len_of(d)?;
        if end > len {
            return Err(Error::transport(
                ErrorKind::Buffer,
                format!(
                    "block of peer {} ends at {} beyond a buffer of {}",
                    peer, end, len
                ),
            ));
        }
    }
    Ok(())
}

/// Adds a partitioning to an existing buffer
#[derive(Debug)]
pub struct Partition<'b, T> {
    buf: &'b [T],
    counts: &'b [Count],
    displs: &'b [Count],
}

impl<'b, T: Element> Partition<'b, T> {
    /// Partition `buf` using `counts` and `displs`
    pub fn new(buf: &'b [T], counts: &'b [Count], displs: &'b [Count]) -> Result<Self> {
        check_partitioning(buf.len(), counts, displs)?;
        Ok(Partition {
            buf,
            counts,
            displs,
        })
    }

    /// The whole underlying buffer
    pub fn buffer(&self) -> &'b [T] {
        self.buf
    }

    /// The block addressed to or from `peer`
    pub fn block(&self, peer: usize) -> &'b [T] {
        let start = self.displs[peer] as usize;
        &self.buf[start..start + self.counts[peer] as usize]
    }
}

impl<'b, T> Partitioned for Partition<'b, T> {
    fn counts(&self) -> &[Count] {
        self.counts
    }
    fn displs(&self) -> &[Count] {
        self.displs
    }
}

/// Adds a partitioning to an existing mutable buffer
#[derive(Debug)]
pub struct PartitionMut<'b, T> {
    buf: &'b mut [T],
    counts: &'b [Count],
    displs: &'b [Count],
}

impl<'b, T: Element> PartitionMut<'b, T> {
    /// Partition `buf` using `counts` and `displs`
    pub fn new(buf: &'b mut [T], counts: &'b [Count], displs: &'b [Count]) -> Result<Self> {
        check_partitioning(buf.len(), counts, displs)?;
        Ok(PartitionMut {
            buf,
            counts,
            displs,
        })
    }

    /// The block written by `peer`
    pub fn block_mut(&mut self, peer: usize) -> &mut [T] {
        let start = self.displs[peer] as usize;
        &mut self.buf[start..start + self.counts[peer] as usize]
    }

    /// Split into the underlying buffer and the partitioning.
    pub fn parts_mut(&mut self) -> (&mut [T], &[Count], &[Count]) {
        (&mut *self.buf, self.counts, self.displs)
    }
}

impl<'b, T> Partitioned for PartitionMut<'b, T> {
    fn counts(&self) -> &[Count] {
        self.counts
    }
    fn displs(&self) -> &[Count] {
        self.displs
    }
}
