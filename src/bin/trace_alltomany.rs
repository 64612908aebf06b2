//! Replay of a captured all-to-many communication trace.
//!
//! Every repetition times the trace once with immediate synchronous sends and receives and once
//! with a vectorized exchange. A group smaller than the captured one replays the trace without
//! the peers that do not exist.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use alltomany::config::TraceConfig;
use alltomany::launch::{self, LaunchArgs, Program};
use alltomany::pattern::trace::{CAPTURED_NPROCS, CAPTURED_NTIMES};
use alltomany::prelude::*;
use alltomany::Result;

#[derive(Parser, Debug)]
#[command(name = "trace_alltomany")]
#[command(about = "Replay a captured all-to-many communication trace")]
struct Args {
    /// The trace file
    trace: PathBuf,

    /// Number of processes the trace was captured with
    #[arg(long, default_value_t = CAPTURED_NPROCS)]
    expect_nprocs: i32,

    /// Number of iterations the trace was captured with
    #[arg(long, default_value_t = CAPTURED_NTIMES)]
    expect_ntimes: usize,

    /// How often both methods run
    #[arg(long, default_value_t = 3)]
    repeat: usize,

    /// Report the bytes of this run or those of the captured run
    #[arg(long, value_enum, default_value_t = ByteCount::Replayed)]
    count_bytes: ByteCount,

    /// Log the replayed pattern of every rank
    #[arg(short = 'v')]
    verbose: bool,

    #[command(flatten)]
    launch: LaunchArgs,
}

struct TraceReplay {
    config: TraceConfig,
}

impl Program for TraceReplay {
    fn run<C>(&self, comm: &C) -> Result<()>
    where
        C: CommunicatorCollectives + CommunicatorPointToPoint,
    {
        let config = &self.config;
        let pattern = TracePattern::load(&config.path, config.expect, comm.size(), comm.rank())?;
        if config.verbose {
            pattern.log_pattern();
        }
        if comm.is_root() {
            println!("number of processes             = {}", pattern.size());
            println!("number of iterations            = {}", pattern.iterations());
        }

        let mut buffers = Buffers::<u8>::for_trace(&pattern)?;
        let phase = PhaseConfig {
            label: None,
            debug: false,
            byte_count: config.byte_count,
        };
        let mut summary = RunSummary::default();
        for _ in 0..config.repeat {
            for strategy in [Strategy::Immediate(SendMode::Synchronous), Strategy::Vectorized] {
                let mut exchanger = Exchanger::new(strategy, comm.size());
                let outcome =
                    bench::run_phase(comm, &mut exchanger, &pattern, &mut buffers, None, &phase)?;
                summary.record(outcome);
            }
        }
        summary.finish()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    launch::init_logging(args.verbose);
    let program = TraceReplay {
        config: TraceConfig {
            path: args.trace,
            expect: TraceExpectation {
                nprocs: args.expect_nprocs,
                ntimes: args.expect_ntimes,
            },
            repeat: args.repeat,
            byte_count: args.count_bytes,
            verbose: args.verbose,
        },
    };
    launch::launch(&args.launch, &program)
}
