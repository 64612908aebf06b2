//! All-to-many communication with one of three methods: a vectorized exchange (`-a`),
//! immediate synchronous sends (`-s`) or immediate standard sends (default).
//!
//! `-r 128` with 128 ranks per node picks one receiver per node.

use std::process::ExitCode;

use clap::Parser;

use alltomany::launch::{self, LaunchArgs, Program};
use alltomany::prelude::*;
use alltomany::Result;

#[derive(Parser, Debug)]
#[command(name = "alltomany")]
#[command(about = "All-to-many personalized communication benchmark")]
struct Args {
    /// Number of iterations
    #[arg(short = 'n', default_value_t = 1)]
    ntimes: usize,

    /// Every ratio-th rank receives
    #[arg(short = 'r', default_value_t = 1)]
    ratio: i32,

    /// Maximum number of receivers
    #[arg(short = 'm')]
    max_receivers: Option<usize>,

    /// Message size in bytes
    #[arg(short = 'l', default_value_t = 48)]
    len: usize,

    /// Use the vectorized exchange
    #[arg(short = 'a', conflicts_with = "issend")]
    alltoall: bool,

    /// Use synchronous sends
    #[arg(short = 's')]
    issend: bool,

    /// Log the pattern of every rank
    #[arg(short = 'v')]
    verbose: bool,

    #[command(flatten)]
    launch: LaunchArgs,
}

struct Alltomany {
    config: BenchConfig,
    strategy: Strategy,
}

impl Program for Alltomany {
    fn run<C>(&self, comm: &C) -> Result<()>
    where
        C: CommunicatorCollectives + CommunicatorPointToPoint,
    {
        let pattern = SyntheticPattern::new(comm.size(), comm.rank(), &self.config)?;
        if comm.is_root() {
            println!("---- Using {}", self.strategy);
            println!("nprocs      = {}", comm.size());
            println!("len         = {}", self.config.len);
            println!("ntimes      = {}", self.config.ntimes);
            println!("ratio       = {}", pattern.ratio());
            println!("num_recvers = {}", pattern.receivers().len());
        }

        let mut buffers = Buffers::<u8>::for_synthetic(&pattern)?;
        let mut exchanger = Exchanger::new(self.strategy, comm.size());
        let outcome = bench::run_phase(
            comm,
            &mut exchanger,
            &pattern,
            &mut buffers,
            None,
            &PhaseConfig::from_bench(&self.config),
        )?;
        let mut summary = RunSummary::default();
        summary.record(outcome);
        summary.finish()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    launch::init_logging(args.verbose);
    let send_mode = if args.issend {
        SendMode::Synchronous
    } else {
        SendMode::Standard
    };
    let program = Alltomany {
        config: BenchConfig {
            ntimes: args.ntimes,
            ratio: args.ratio,
            max_receivers: args.max_receivers,
            len: args.len,
            verbose: args.verbose,
            send_mode,
            ..BenchConfig::default()
        },
        strategy: if args.alltoall {
            Strategy::Vectorized
        } else {
            Strategy::Immediate(send_mode)
        },
    };
    launch::launch(&args.launch, &program)
}
