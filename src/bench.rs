//! Benchmark phases
//!
//! A phase runs one strategy over every iteration of a pattern source, timed from a barrier to
//! the end of the last iteration, and reduces the timing over the group.

use std::mem;

use conv::ConvUtil;
use tracing::{debug, error, warn};

use crate::buffer::{Buffers, Fill};
use crate::check::ReceiveChecker;
use crate::collective::CommunicatorCollectives;
use crate::config::{BenchConfig, ByteCount};
use crate::error::{Error, Result};
use crate::exchange::Exchanger;
use crate::pattern::{Direction, PatternSource};
use crate::point_to_point::CommunicatorPointToPoint;
use crate::timing::{self, PhaseReport, TimingCollector};

/// How a phase runs and what it reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhaseConfig {
    /// Label of the report, defaults to the strategy
    pub label: Option<String>,
    /// Check the receive buffer after every iteration
    pub debug: bool,
    /// Which byte total to report
    pub byte_count: ByteCount,
}

impl PhaseConfig {
    /// The phase settings of a synthetic run
    pub fn from_bench(config: &BenchConfig) -> Self {
        PhaseConfig {
            label: None,
            debug: config.debug,
            byte_count: ByteCount::Replayed,
        }
    }
}

/// What a phase produced on one rank
#[derive(Debug)]
pub struct PhaseOutcome {
    /// The group wide report, on the root only
    pub report: Option<PhaseReport>,
    /// Iterations that completed on this rank
    pub completed: usize,
    /// Receive buffer elements that differed from the expected content
    pub mismatches: usize,
    /// The error that ended the phase early
    pub failure: Option<Error>,
}

impl PhaseOutcome {
    /// Whether every iteration completed with the expected data.
    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.mismatches == 0
    }

    /// Turn failures into an error.
    pub fn into_result(self) -> Result<Self> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        if self.mismatches > 0 {
            return Err(Error::Integrity {
                mismatches: self.mismatches,
            });
        }
        Ok(self)
    }
}

/// Collects the outcomes of the phases of a program run
#[derive(Debug, Default)]
pub struct RunSummary {
    phases: usize,
    mismatches: usize,
    failure: Option<Error>,
}

impl RunSummary {
    /// Print the report of `outcome`, if this rank holds one, and remember its failures.
    pub fn record(&mut self, outcome: PhaseOutcome) {
        if let Some(report) = &outcome.report {
            println!("{}", report);
        }
        self.phases += 1;
        self.mismatches += outcome.mismatches;
        if self.failure.is_none() {
            self.failure = outcome.failure;
        }
    }

    /// Number of recorded phases
    pub fn phases(&self) -> usize {
        self.phases
    }

    /// The first failure of any phase, or the number of differing elements over all phases.
    pub fn finish(self) -> Result<()> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        if self.mismatches > 0 {
            return Err(Error::Integrity {
                mismatches: self.mismatches,
            });
        }
        Ok(())
    }
}

/// Run all iterations of `source` with `exchanger`.
///
/// With a checker, the receive buffer is reset before and verified after every iteration. A
/// failing exchange ends the loop on this rank and aborts the phase on the others; it is logged
/// and returned in the outcome, while the timing of the completed iterations is still reduced and
/// reported. Errors of the barrier or of the reductions are returned directly.
pub fn run_phase<C, S, T>(
    comm: &C,
    exchanger: &mut Exchanger,
    source: &S,
    buffers: &mut Buffers<T>,
    checker: Option<&ReceiveChecker>,
    phase: &PhaseConfig,
) -> Result<PhaseOutcome>
where
    C: CommunicatorCollectives + CommunicatorPointToPoint,
    S: PatternSource,
    T: Fill,
{
    let label = phase
        .label
        .clone()
        .unwrap_or_else(|| exchanger.strategy().to_string());
    let checker = checker.filter(|_| phase.debug);
    let element = mem::size_of::<T>();

    comm.barrier()?;
    let mut collector = TimingCollector::start(source.iterations(), comm.time());
    let mut bytes = 0usize;
    let mut mismatches = 0;
    let mut failure = None;

    for i in 0..source.iterations() {
        if checker.is_some() {
            buffers.recv.reset();
        }
        let send = buffers.send.iteration(i);
        if let Err(err) = exchanger.exchange(comm, source, i, send, buffers.recv.as_mut_slice()) {
            error!(rank = comm.rank(), iteration = i, "{}: {}", label, err);
            comm.abort_phase();
            failure = Some(err);
            break;
        }
        if let Some(checker) = checker {
            mismatches += checker.check(&label, buffers.recv.as_slice());
        }
        bytes += element
            * match phase.byte_count {
                ByteCount::Replayed => source.pattern(i).recv.total(),
                ByteCount::Captured => source.captured_amount(i, Direction::Receive),
            };
        collector.iteration_done(comm.time());
    }
    let completed = collector.completed();
    let sample = collector.finish(comm.time());
    debug!(
        rank = comm.rank(),
        completed,
        elapsed = sample.end_to_end,
        "{} finished",
        label
    );

    if comm.end_phase()? && comm.is_root() {
        warn!("{} aborted, timing covers the completed iterations only", label);
    }

    let bytes = bytes.value_as::<u64>().unwrap_or(u64::MAX);
    let report = timing::reduce(comm, &label, sample, bytes)?;
    Ok(PhaseOutcome {
        report,
        completed,
        mismatches,
        failure,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::buffer::Spacing;
    use crate::config::BenchConfig;
    use crate::environment::initialize_local;
    use crate::error::ErrorKind;
    use crate::exchange::Strategy;
    use crate::pattern::synthetic::SyntheticPattern;
    use crate::pattern::{IterationPattern, PatternDescriptor};
    use crate::topology::{Communicator, Rank};

    /// The same descriptors in every iteration, whether or not the peers agree on them
    struct Fixed {
        rank: Rank,
        iterations: usize,
        send: PatternDescriptor,
        recv: PatternDescriptor,
    }

    impl PatternSource for Fixed {
        fn rank(&self) -> Rank {
            self.rank
        }

        fn iterations(&self) -> usize {
            self.iterations
        }

        fn is_static(&self) -> bool {
            false
        }

        fn pattern(&self, _iteration: usize) -> IterationPattern<'_> {
            IterationPattern {
                send: &self.send,
                recv: &self.recv,
            }
        }

        fn spacing(&self, _direction: Direction) -> Spacing {
            Spacing::Packed
        }
    }

    fn bench_config(ntimes: usize, len: usize) -> BenchConfig {
        BenchConfig {
            ntimes,
            ratio: 1,
            len,
            gap: 0,
            debug: true,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn failing_rank_ends_the_phase_everywhere() {
        let universe = initialize_local(2)
            .unwrap()
            .with_timeout(Duration::from_secs(20));
        let results = universe.run(|world| {
            // rank 1 sends 3 elements where rank 0 expects 2
            let (send, recv) = if world.rank() == 0 {
                (vec![(1, 2)], vec![(1, 2)])
            } else {
                (vec![(0, 3)], vec![(0, 2)])
            };
            let source = Fixed {
                rank: world.rank(),
                iterations: 3,
                send: PatternDescriptor::new(send).unwrap(),
                recv: PatternDescriptor::new(recv).unwrap(),
            };
            let mut buffers = Buffers::<i32>::for_trace(&source).unwrap();
            let mut exchanger = Exchanger::new(Strategy::Vectorized, world.size());
            let outcome = run_phase(
                &world,
                &mut exchanger,
                &source,
                &mut buffers,
                None,
                &PhaseConfig::default(),
            )
            .unwrap();
            assert!(!outcome.passed());
            let completed = outcome.completed;
            let bytes = outcome.report.as_ref().map(|r| r.bytes);
            let kind = outcome.into_result().unwrap_err().kind();

            // the group recovers for the next phase
            let config = bench_config(2, 2);
            let pattern = SyntheticPattern::new(world.size(), world.rank(), &config).unwrap();
            let mut buffers = Buffers::<i32>::for_synthetic(&pattern).unwrap();
            let checker = ReceiveChecker::for_synthetic(&pattern);
            let mut exchanger = Exchanger::new(Strategy::Vectorized, world.size());
            let next = run_phase(
                &world,
                &mut exchanger,
                &pattern,
                &mut buffers,
                Some(&checker),
                &PhaseConfig::from_bench(&config),
            )
            .unwrap();
            assert_eq!(next.completed, 2);
            next.into_result().unwrap();

            (kind, completed, bytes)
        });
        assert_eq!(results[0], (Some(ErrorKind::Truncate), 0, Some(8)));
        assert_eq!(results[1], (Some(ErrorKind::ProcAborted), 1, None));
    }

    #[test]
    fn wrong_content_fails_the_run() {
        let universe = initialize_local(2)
            .unwrap()
            .with_timeout(Duration::from_secs(20));
        let results = universe.run(|world| {
            let config = bench_config(2, 2);
            let pattern = SyntheticPattern::new(world.size(), world.rank(), &config).unwrap();
            let mut buffers = Buffers::<i32>::for_synthetic(&pattern).unwrap();
            // expects blocks of 3 elements where 2 arrive
            let other =
                SyntheticPattern::new(world.size(), world.rank(), &bench_config(2, 3)).unwrap();
            let checker = ReceiveChecker::for_synthetic(&other);
            let mut exchanger = Exchanger::new(Strategy::Immediate(config.send_mode), world.size());
            let outcome = run_phase(
                &world,
                &mut exchanger,
                &pattern,
                &mut buffers,
                Some(&checker),
                &PhaseConfig::from_bench(&config),
            )
            .unwrap();
            assert!(outcome.failure.is_none());
            assert_eq!(outcome.completed, 2);
            assert!(outcome.mismatches > 0);

            let mut summary = RunSummary::default();
            summary.record(outcome);
            assert_eq!(summary.phases(), 1);
            summary.finish().unwrap_err()
        });
        for err in results {
            assert!(matches!(err, Error::Integrity { mismatches } if mismatches > 0));
        }
    }
}
