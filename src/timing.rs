//! Timing of a benchmark phase
//!
//! Besides the end-to-end time, the iterations of a phase are split into [`BUCKETS`] ranges of
//! equal width so that a change of speed during a long run becomes visible. Samples of all ranks
//! are reduced to their maximum on the root, byte totals to their sum.

use std::fmt;

use crate::collective::{CommunicatorCollectives, SystemOperation};
use crate::error::Result;
use crate::topology::ROOT_RANK;

/// Number of time buckets
pub const BUCKETS: usize = 10;

const MIB: f64 = 1_048_576.0;

/// Iterations per bucket for a run of `ntimes`
pub fn bucket_width(ntimes: usize) -> usize {
    ((ntimes + BUCKETS - 1) / BUCKETS).max(1)
}

/// Times of one rank for one phase, in seconds
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TimingSample {
    /// Time of the whole phase
    pub end_to_end: f64,
    /// Time of every range of iterations
    pub buckets: [f64; BUCKETS],
}

impl TimingSample {
    fn to_array(self) -> [f64; BUCKETS + 1] {
        let mut out = [0.0; BUCKETS + 1];
        out[0] = self.end_to_end;
        out[1..].copy_from_slice(&self.buckets);
        out
    }

    fn from_slice(values: &[f64]) -> Self {
        let mut buckets = [0.0; BUCKETS];
        buckets.copy_from_slice(&values[1..=BUCKETS]);
        TimingSample {
            end_to_end: values[0],
            buckets,
        }
    }
}

/// Records the times of a phase as its iterations complete
#[derive(Clone, Debug)]
pub struct TimingCollector {
    ntimes: usize,
    width: usize,
    start: f64,
    mark: f64,
    completed: usize,
    buckets: [f64; BUCKETS],
}

impl TimingCollector {
    /// Start timing a phase of `ntimes` iterations at time `now`.
    pub fn start(ntimes: usize, now: f64) -> Self {
        TimingCollector {
            ntimes,
            width: bucket_width(ntimes),
            start: now,
            mark: now,
            completed: 0,
            buckets: [0.0; BUCKETS],
        }
    }

    /// Note that another iteration completed at time `now`.
    pub fn iteration_done(&mut self, now: f64) {
        self.completed += 1;
        let c = self.completed;
        if c % self.width == 0 && c < self.ntimes {
            let bucket = (c / self.width - 1).min(BUCKETS - 1);
            self.buckets[bucket] += now - self.mark;
            self.mark = now;
        }
    }

    /// Number of completed iterations
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Stop timing at `now`. The iterations after the last boundary go into the last bucket.
    pub fn finish(mut self, now: f64) -> TimingSample {
        self.buckets[BUCKETS - 1] += now - self.mark;
        TimingSample {
            end_to_end: now - self.start,
            buckets: self.buckets,
        }
    }
}

/// The group wide result of a phase
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseReport {
    /// What ran
    pub label: String,
    /// Maximum over all ranks, per field
    pub times: TimingSample,
    /// Bytes moved, summed over all ranks
    pub bytes: u64,
}

impl PhaseReport {
    /// Amount of data in MiB
    pub fn mebibytes(&self) -> f64 {
        self.bytes as f64 / MIB
    }

    /// MiB per second over the slowest rank's end-to-end time
    pub fn bandwidth(&self) -> f64 {
        if self.times.end_to_end > 0.0 {
            self.mebibytes() / self.times.end_to_end
        } else {
            0.0
        }
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Comm amount using {:<20} = {:.2} MiB",
            self.label,
            self.mebibytes()
        )?;
        writeln!(
            f,
            "Time for using {:<23} = {:.2} sec",
            self.label, self.times.end_to_end
        )?;
        for (i, t) in self.times.buckets.iter().enumerate() {
            writeln!(f, "\tTime bucket[{}] = {:.4} sec", i, t)?;
        }
        write!(f, "Comm bandwidth = {:.2} MiB/sec", self.bandwidth())
    }
}

/// Reduce `sample` and `bytes` over the group. The root receives the report.
pub fn reduce<C: CommunicatorCollectives>(
    comm: &C,
    label: &str,
    sample: TimingSample,
    bytes: u64,
) -> Result<Option<PhaseReport>> {
    let times = comm.reduce_into_root(&sample.to_array(), SystemOperation::Max, ROOT_RANK)?;
    let total = comm.reduce_into_root(&[bytes], SystemOperation::Sum, ROOT_RANK)?;
    Ok(match (times, total) {
        (Some(times), Some(total)) => Some(PhaseReport {
            label: label.to_owned(),
            times: TimingSample::from_slice(&times),
            bytes: total[0],
        }),
        _ => None,
    })
}
