//! Start-up shared by the benchmark programs
//!
//! A program implements [`Program`]; [`launch`] runs it on every rank of either a local universe
//! or, with the `mpi` feature, the MPI world, and turns the per-rank results into an exit code.

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::collective::CommunicatorCollectives;
use crate::environment::initialize_local;
use crate::error::{Error, Result};
use crate::point_to_point::CommunicatorPointToPoint;
use crate::topology::{Rank, ROOT_RANK};

/// Options that select the process group
#[derive(clap::Args, Clone, Debug)]
pub struct LaunchArgs {
    /// Number of ranks of the in-process universe
    #[arg(long = "np", default_value_t = 4)]
    pub np: usize,

    /// Run on the MPI world communicator (start with mpiexec)
    #[cfg(feature = "mpi")]
    #[arg(long)]
    pub mpi: bool,
}

/// Install the log subscriber: `info`, `debug` when verbose, `RUST_LOG` overrides both.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // a second call keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

/// A benchmark program run by every rank of a group
pub trait Program: Sync {
    /// Run on the rank `comm` belongs to.
    fn run<C>(&self, comm: &C) -> Result<()>
    where
        C: CommunicatorCollectives + CommunicatorPointToPoint;
}

/// Run `program` on the group selected by `args`.
pub fn launch<P: Program>(args: &LaunchArgs, program: &P) -> ExitCode {
    ExitCode::from(run_group(args, program))
}

fn run_group<P: Program>(args: &LaunchArgs, program: &P) -> u8 {
    #[cfg(feature = "mpi")]
    {
        if args.mpi {
            let result = crate::mpi_world::run(|world| program.run(world));
            return exit_status(&[result]);
        }
    }

    let results = match initialize_local(args.np) {
        Ok(universe) => universe.run(|world| program.run(&world)),
        Err(err) => vec![Err(err)],
    };
    exit_status(&results)
}

/// Log the failures of `results`, indexed by rank, and summarize them.
///
/// Configuration errors are the same on every rank and only logged once. They end the program
/// with status 2, an unusable trace with status 3 and any other failure with status 1.
fn exit_status(results: &[Result<()>]) -> u8 {
    let mut code = 0;
    for (rank, result) in results.iter().enumerate() {
        let Err(err) = result else { continue };
        let rank = rank as Rank;
        match err {
            Error::Config(_) => {
                if rank == ROOT_RANK {
                    error!("{}", err);
                }
                code = code.max(2);
            }
            _ if err.is_fatal() => {
                error!(rank, "{}", err);
                code = code.max(3);
            }
            _ => {
                error!(rank, "{}", err);
                code = code.max(1);
            }
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        launch: LaunchArgs,
    }

    struct FailOnOddRanks;

    impl Program for FailOnOddRanks {
        fn run<C>(&self, comm: &C) -> Result<()>
        where
            C: CommunicatorCollectives + CommunicatorPointToPoint,
        {
            comm.barrier()?;
            if comm.rank() % 2 == 1 {
                Err(Error::Integrity { mismatches: 1 })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn group_size_from_the_command_line() {
        let cli = Cli::parse_from(["prog", "--np", "3"]);
        assert_eq!(cli.launch.np, 3);
        let cli = Cli::parse_from(["prog"]);
        assert_eq!(cli.launch.np, 4);
    }

    #[test]
    fn failures_set_the_exit_code() {
        let args = LaunchArgs {
            np: 2,
            #[cfg(feature = "mpi")]
            mpi: false,
        };
        assert_eq!(run_group(&args, &FailOnOddRanks), 1);
        let args = LaunchArgs {
            np: 1,
            #[cfg(feature = "mpi")]
            mpi: false,
        };
        assert_eq!(run_group(&args, &FailOnOddRanks), 0);
    }

    #[test]
    fn configuration_errors_take_precedence() {
        let results = [
            Err(Error::Config("bad ratio".into())),
            Err(Error::Integrity { mismatches: 3 }),
            Ok(()),
        ];
        assert_eq!(exit_status(&results), 2);
        assert_eq!(exit_status(&[Ok(()), Ok(())]), 0);
    }

    #[test]
    fn unusable_trace_has_its_own_status() {
        let results = [
            Err(Error::TraceFormat("file ends after 3 of 8 words".into())),
            Err(Error::Integrity { mismatches: 3 }),
        ];
        assert_eq!(exit_status(&results), 3);
        assert_eq!(exit_status(&[Err(Error::Integrity { mismatches: 1 })]), 1);
    }
}
