//! confine-ctl: run programs under a confined execution spec

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use commands::{check_requirements, list_syscall_groups};
use console::style;
use runner::{run_direct, run_spec_file};

/// Exit status when no process could be launched
const EXIT_LAUNCH_ERROR: i32 = 1;

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let outcome = match cli.command {
        Some(Commands::Run { spec }) => run_spec_file(&spec, cli.timeout),
        Some(Commands::Check) => {
            check_requirements();
            return;
        }
        Some(Commands::Groups) => {
            list_syscall_groups();
            return;
        }
        None => {
            let mut direct = cli.direct;
            let Some(program) = direct.program.take() else {
                eprintln!("{} No program specified", style("error:").red().bold());
                eprintln!(
                    "Try {} for more information",
                    style("confine-ctl --help").cyan()
                );
                std::process::exit(EXIT_LAUNCH_ERROR);
            };
            run_direct(program, direct, cli.timeout)
        }
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(EXIT_LAUNCH_ERROR);
        }
    }
}
