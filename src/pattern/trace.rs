//! Replay of a captured communication trace
//!
//! A trace file holds little-endian 32 bit integers:
//!
//! ```text
//! nprocs ntimes len[0] .. len[nprocs - 1] segment[0] .. segment[nprocs - 1]
//! ```
//!
//! `len[r]` is the number of integers in the segment of rank `r`. A segment holds a send section
//! followed by a receive section. A section starts with the number of peers of every iteration,
//! `count[0] .. count[ntimes - 1]`, followed for every iteration by `count[i]` peer ranks and
//! then `count[i]` amounts.
//!
//! Every rank reads the header and its own segment only. A group smaller than the captured one
//! replays the trace approximately: peers outside the group are dropped.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use conv::ConvUtil;
use tracing::{debug, info};

use super::{Direction, IterationPattern, PatternDescriptor, PatternSource};
use crate::buffer::Spacing;
use crate::error::{Error, Result};
use crate::topology::Rank;

/// Number of processes of the reference trace
pub const CAPTURED_NPROCS: Rank = 1024;
/// Number of iterations of the reference trace
pub const CAPTURED_NTIMES: usize = 253;

/// The dimensions a trace has to be captured with
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceExpectation {
    /// Number of captured processes
    pub nprocs: Rank,
    /// Number of captured iterations
    pub ntimes: usize,
}

impl Default for TraceExpectation {
    fn default() -> Self {
        TraceExpectation {
            nprocs: CAPTURED_NPROCS,
            ntimes: CAPTURED_NTIMES,
        }
    }
}

/// The decoded segment of one captured rank
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RankTrace {
    /// Send descriptor of every iteration
    pub send: Vec<PatternDescriptor>,
    /// Receive descriptor of every iteration
    pub recv: Vec<PatternDescriptor>,
}

fn format_error(what: impl Into<String>) -> Error {
    Error::TraceFormat(what.into())
}

fn word(n: usize) -> Result<i32> {
    n.value_as::<i32>()
        .map_err(|_| format_error(format!("{} does not fit a trace integer", n)))
}

fn length(w: i32, what: &str) -> Result<usize> {
    w.value_as::<usize>()
        .map_err(|_| format_error(format!("negative {} {}", what, w)))
}

struct Words<'a> {
    words: &'a [i32],
    pos: usize,
}

impl<'a> Words<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [i32]> {
        let end = self.pos + n;
        if end > self.words.len() {
            return Err(format_error(format!(
                "segment of {} integers ends before {} were read",
                self.words.len(),
                end
            )));
        }
        let taken = &self.words[self.pos..end];
        self.pos = end;
        Ok(taken)
    }

    fn section(&mut self, ntimes: usize) -> Result<Vec<PatternDescriptor>> {
        let counts = self.take(ntimes)?;
        counts
            .iter()
            .map(|&count| {
                let count = length(count, "peer count")?;
                let ranks = self.take(count)?;
                let amounts = self.take(count)?;
                let entries = ranks
                    .iter()
                    .zip(amounts)
                    .map(|(&rank, &amount)| Ok((rank, length(amount, "amount")?)))
                    .collect::<Result<Vec<_>>>()?;
                PatternDescriptor::new(entries).map_err(|err| format_error(err.to_string()))
            })
            .collect()
    }
}

impl RankTrace {
    /// Decode a segment of `ntimes` iterations. The segment has to be consumed exactly.
    pub fn decode(words: &[i32], ntimes: usize) -> Result<Self> {
        let mut cursor = Words { words, pos: 0 };
        let send = cursor.section(ntimes)?;
        let recv = cursor.section(ntimes)?;
        if cursor.pos != words.len() {
            return Err(format_error(format!(
                "{} trailing integers in a segment of {}",
                words.len() - cursor.pos,
                words.len()
            )));
        }
        Ok(RankTrace { send, recv })
    }

    /// Encode the segment.
    pub fn encode(&self) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        for section in [&self.send, &self.recv] {
            for d in section.iter() {
                out.push(word(d.len())?);
            }
            for d in section.iter() {
                out.extend(d.entries().iter().map(|e| e.peer));
                for e in d.entries() {
                    out.push(word(e.amount)?);
                }
            }
        }
        Ok(out)
    }

    /// Record every iteration of `source`.
    pub fn capture<S: PatternSource>(source: &S) -> Self {
        let (send, recv) = (0..source.iterations())
            .map(|i| {
                let p = source.pattern(i);
                (p.send.clone(), p.recv.clone())
            })
            .unzip();
        RankTrace { send, recv }
    }
}

/// Write a trace of `ntimes` iterations holding one segment per captured rank.
pub fn write_trace<W: Write>(mut writer: W, ntimes: usize, segments: &[RankTrace]) -> Result<()> {
    let encoded = segments
        .iter()
        .map(|s| {
            if s.send.len() != ntimes || s.recv.len() != ntimes {
                return Err(format_error(format!(
                    "segment of {} and {} iterations in a trace of {}",
                    s.send.len(),
                    s.recv.len(),
                    ntimes
                )));
            }
            s.encode()
        })
        .collect::<Result<Vec<_>>>()?;

    let mut header = vec![word(segments.len())?, word(ntimes)?];
    for segment in &encoded {
        header.push(word(segment.len())?);
    }
    for w in header.iter().chain(encoded.iter().flatten()) {
        writer.write_all(&w.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a trace file at `path`.
pub fn save(path: impl AsRef<Path>, ntimes: usize, segments: &[RankTrace]) -> Result<()> {
    let file = File::create(path)?;
    write_trace(BufWriter::new(file), ntimes, segments)
}

/// Read `n` words. The buffer grows with the data actually read, so a corrupt length cannot
/// allocate more than the file holds.
fn read_words<R: Read>(reader: &mut R, n: usize) -> Result<Vec<i32>> {
    let len = n
        .checked_mul(4)
        .and_then(|len| len.value_as::<u64>().ok())
        .ok_or_else(|| format_error(format!("{} words do not fit in memory", n)))?;
    let mut bytes = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(format_error(format!(
            "file ends after {} of {} words",
            bytes.len() / 4,
            n
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[derive(Clone, Debug)]
struct TraceIteration {
    send: PatternDescriptor,
    recv: PatternDescriptor,
    captured_send: usize,
    captured_recv: usize,
}

/// The replayed pattern of one rank
#[derive(Clone, Debug)]
pub struct TracePattern {
    rank: Rank,
    size: Rank,
    iterations: Vec<TraceIteration>,
}

impl TracePattern {
    /// Load the segment of `rank` for a replay in a group of `size`.
    pub fn load(
        path: impl AsRef<Path>,
        expect: TraceExpectation,
        size: Rank,
        rank: Rank,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let pattern = Self::from_reader(BufReader::new(file), expect, size, rank)?;
        if rank == 0 {
            info!(
                path = %path.as_ref().display(),
                nprocs = expect.nprocs,
                ntimes = expect.ntimes,
                "trace loaded"
            );
        }
        Ok(pattern)
    }

    /// Read the header and the segment of `rank` from `reader`.
    pub fn from_reader<R: Read + Seek>(
        mut reader: R,
        expect: TraceExpectation,
        size: Rank,
        rank: Rank,
    ) -> Result<Self> {
        if size > expect.nprocs {
            return Err(Error::Config(format!(
                "a trace of {} processes cannot be replayed by {}",
                expect.nprocs, size
            )));
        }
        if !(0..size).contains(&rank) {
            return Err(Error::Config(format!(
                "rank {} outside of a group of {}",
                rank, size
            )));
        }

        let header = read_words(&mut reader, 2)?;
        if header[0] != expect.nprocs {
            return Err(Error::TraceMismatch {
                field: "process count",
                expected: expect.nprocs.into(),
                found: header[0].into(),
            });
        }
        if length(header[1], "iteration count")? != expect.ntimes {
            return Err(Error::TraceMismatch {
                field: "iteration count",
                expected: expect.ntimes.value_as::<i64>().unwrap_or(i64::MAX),
                found: header[1].into(),
            });
        }

        let lens = read_words(&mut reader, length(header[0], "process count")?)?;
        let mut skip = 0usize;
        for &len in &lens[..rank as usize] {
            skip = skip
                .checked_add(length(len, "segment length")?)
                .ok_or_else(|| format_error("segment offset out of range"))?;
        }
        let skip = skip
            .checked_mul(4)
            .and_then(|skip| skip.value_as::<i64>().ok())
            .ok_or_else(|| format_error("segment offset out of range"))?;
        reader.seek(SeekFrom::Current(skip))?;
        let words = read_words(&mut reader, length(lens[rank as usize], "segment length")?)?;
        let trace = RankTrace::decode(&words, expect.ntimes)?;

        Ok(Self::replay(trace, size, rank))
    }

    /// Replay a decoded segment in a group of `size`.
    pub fn replay(trace: RankTrace, size: Rank, rank: Rank) -> Self {
        let iterations = trace
            .send
            .into_iter()
            .zip(trace.recv)
            .map(|(send, recv)| TraceIteration {
                captured_send: send.total(),
                captured_recv: recv.total(),
                send: send.restricted_to(size).without_peer(rank),
                recv: recv.restricted_to(size).without_peer(rank),
            })
            .collect();
        TracePattern {
            rank,
            size,
            iterations,
        }
    }

    /// Size of the replaying group
    pub fn size(&self) -> Rank {
        self.size
    }

    /// Log the replayed descriptors of every iteration.
    pub fn log_pattern(&self) {
        for (i, it) in self.iterations.iter().enumerate() {
            for e in it.send.entries() {
                debug!(iteration = i, "rank {} send to {} of {}", self.rank, e.peer, e.amount);
            }
            for e in it.recv.entries() {
                debug!(iteration = i, "rank {} recv from {} of {}", self.rank, e.peer, e.amount);
            }
        }
    }
}

impl PatternSource for TracePattern {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn iterations(&self) -> usize {
        self.iterations.len()
    }

    fn is_static(&self) -> bool {
        false
    }

    fn pattern(&self, iteration: usize) -> IterationPattern<'_> {
        let it = &self.iterations[iteration];
        IterationPattern {
            send: &it.send,
            recv: &it.recv,
        }
    }

    fn spacing(&self, _direction: Direction) -> Spacing {
        Spacing::Packed
    }

    fn captured_amount(&self, iteration: usize, direction: Direction) -> usize {
        let it = &self.iterations[iteration];
        match direction {
            Direction::Send => it.captured_send,
            Direction::Receive => it.captured_recv,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn descriptor(entries: &[(Rank, usize)]) -> PatternDescriptor {
        PatternDescriptor::new(entries.iter().copied()).unwrap()
    }

    fn two_rank_trace() -> Vec<RankTrace> {
        vec![
            RankTrace {
                send: vec![descriptor(&[(1, 4), (2, 1)]), descriptor(&[])],
                recv: vec![descriptor(&[(1, 2)]), descriptor(&[(1, 3)])],
            },
            RankTrace {
                send: vec![descriptor(&[(0, 2)]), descriptor(&[(0, 3)])],
                recv: vec![descriptor(&[(0, 4)]), descriptor(&[])],
            },
        ]
    }

    fn expectation() -> TraceExpectation {
        TraceExpectation {
            nprocs: 2,
            ntimes: 2,
        }
    }

    #[test]
    fn segment_layout() {
        let words = two_rank_trace()[0].encode().unwrap();
        assert_eq!(words, [2, 0, 1, 2, 4, 1, 1, 1, 1, 2, 1, 3]);
        assert_eq!(RankTrace::decode(&words, 2).unwrap(), two_rank_trace()[0]);
    }

    #[test]
    fn every_rank_reads_its_own_segment() {
        let mut file = Vec::new();
        write_trace(&mut file, 2, &two_rank_trace()).unwrap();
        let one = TracePattern::from_reader(Cursor::new(&file), expectation(), 2, 1).unwrap();
        assert_eq!(one.iterations(), 2);
        assert_eq!(one.size(), 2);
        assert_eq!(one.pattern(0).send.entries()[0].peer, 0);
        assert!(one.pattern(1).recv.is_empty());
        assert!(!one.is_static());

        let zero = TracePattern::from_reader(Cursor::new(&file), expectation(), 2, 0).unwrap();
        // peer 2 lies outside the captured group of 2 and is dropped on replay
        assert_eq!(zero.pattern(0).send.total(), 4);
        assert_eq!(zero.captured_amount(0, Direction::Send), 5);
    }

    #[test]
    fn header_mismatch() {
        let mut file = Vec::new();
        write_trace(&mut file, 2, &two_rank_trace()).unwrap();
        let err = TracePattern::from_reader(
            Cursor::new(&file),
            TraceExpectation {
                nprocs: 4,
                ntimes: 2,
            },
            2,
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::TraceMismatch {
                field: "process count",
                expected: 4,
                found: 2
            }
        ));
        assert!(err.is_fatal());

        let err = TracePattern::from_reader(
            Cursor::new(&file),
            TraceExpectation {
                nprocs: 2,
                ntimes: 3,
            },
            2,
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::TraceMismatch {
                field: "iteration count",
                ..
            }
        ));
    }

    #[test]
    fn group_larger_than_trace() {
        let mut file = Vec::new();
        write_trace(&mut file, 2, &two_rank_trace()).unwrap();
        let err = TracePattern::from_reader(Cursor::new(&file), expectation(), 3, 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_segments() {
        // one peer announced, two listed
        assert!(matches!(
            RankTrace::decode(&[1, 3, 4, 5, 6, 0], 1),
            Err(Error::TraceFormat(_))
        ));
        // duplicate peer
        assert!(RankTrace::decode(&[2, 3, 3, 1, 1, 0], 1).is_err());
        // negative amount
        assert!(RankTrace::decode(&[1, 3, -1, 0], 1).is_err());
        // truncated
        assert!(RankTrace::decode(&[1, 3], 1).is_err());
    }

    #[test]
    fn segment_length_beyond_the_file() {
        // header and lengths of a two rank trace, rank 0 claims a segment of 2^30 words
        let mut file = Vec::new();
        for w in [2i32, 2, 1 << 30, 0] {
            file.extend_from_slice(&w.to_le_bytes());
        }
        file.extend_from_slice(&[0u8; 12]);
        let err = TracePattern::from_reader(Cursor::new(&file), expectation(), 2, 0).unwrap_err();
        assert!(matches!(err, Error::TraceFormat(_)), "{}", err);
        assert!(err.is_fatal());
    }
}
