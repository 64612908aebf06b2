//! All-to-many communication of a synthetic pattern, timed once with a vectorized exchange and
//! once with immediate synchronous sends and receives.
//!
//! ```text
//! alltoallw --np 8 -n 100 -r 4 -l 1048576 -g 4 -d
//! ```

use std::mem;
use std::process::ExitCode;

use clap::Parser;

use alltomany::launch::{self, LaunchArgs, Program};
use alltomany::prelude::*;
use alltomany::Result;

#[derive(Parser, Debug)]
#[command(name = "alltoallw")]
#[command(about = "All-to-many personalized communication of a synthetic pattern")]
struct Args {
    /// Number of iterations
    #[arg(short = 'n', default_value_t = 1)]
    ntimes: usize,

    /// Every ratio-th rank receives
    #[arg(short = 'r', default_value_t = 1)]
    ratio: i32,

    /// Bytes a receiver receives per iteration
    #[arg(short = 'l', default_value_t = 8 * 1024 * 1024)]
    block_len: usize,

    /// Unused ints between two consecutive blocks of a buffer
    #[arg(short = 'g', default_value_t = 4)]
    gap: usize,

    /// Log the pattern of every rank
    #[arg(short = 'v')]
    verbose: bool,

    /// Verify the received data after every iteration
    #[arg(short = 'd')]
    debug: bool,

    #[command(flatten)]
    launch: LaunchArgs,
}

struct Alltoallw {
    ntimes: usize,
    ratio: i32,
    block_len: usize,
    gap: usize,
    verbose: bool,
    debug: bool,
}

impl Program for Alltoallw {
    fn run<C>(&self, comm: &C) -> Result<()>
    where
        C: CommunicatorCollectives + CommunicatorPointToPoint,
    {
        let size = comm.size();
        let config = BenchConfig {
            ntimes: self.ntimes,
            ratio: self.ratio,
            len: self.block_len / mem::size_of::<i32>() / size as usize,
            gap: self.gap,
            verbose: self.verbose,
            debug: self.debug,
            ..BenchConfig::default()
        };
        let pattern = SyntheticPattern::new(size, comm.rank(), &config)?;

        if comm.is_root() {
            println!("number of processes             = {}", size);
            println!("number of iterations            = {}", config.ntimes);
            println!("number of receivers             = {}", pattern.receivers().len());
            println!(
                "individual message length       = {} bytes",
                config.len * mem::size_of::<i32>()
            );
            println!("send/recv buffer gap            = {} int(s)", pattern.gap());
            println!("Recv amount per iteration       = {} bytes", self.block_len);
        }

        let mut buffers = Buffers::<i32>::for_synthetic(&pattern)?;
        let checker = ReceiveChecker::for_synthetic(&pattern);
        let phase = PhaseConfig::from_bench(&config);
        let mut summary = RunSummary::default();
        for strategy in [Strategy::Vectorized, Strategy::Immediate(SendMode::Synchronous)] {
            let mut exchanger = Exchanger::new(strategy, size);
            let outcome = bench::run_phase(
                comm,
                &mut exchanger,
                &pattern,
                &mut buffers,
                Some(&checker),
                &phase,
            )?;
            summary.record(outcome);
        }
        summary.finish()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    launch::init_logging(args.verbose);
    let program = Alltoallw {
        ntimes: args.ntimes,
        ratio: args.ratio,
        block_len: args.block_len,
        gap: args.gap,
        verbose: args.verbose,
        debug: args.debug,
    };
    launch::launch(&args.launch, &program)
}
