use std::process;

use clap::Parser;

mod cli;
mod commands;
mod context;
mod exit_codes;
mod logging;
mod output;

fn main() {
    logging::init_tracing();

    let cli = cli::Cli::parse();

    let exit_code = match cli.command {
        cli::Command::Dump(args) => {
            let mut out = output::make_for_dump(&args);
            let code = commands::dump::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Probe(args) => {
            let mut out = output::make_for_probe(&args);
            let code = commands::probe::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::List(args) => {
            let mut out = output::make_simple(args.json);
            let code = commands::list::run(args, &mut *out);
            out.finish();
            code
        }
        cli::Command::Chips(args) => {
            let mut out = output::make_simple(args.json);
            let code = commands::chips::run(&mut *out);
            out.finish();
            code
        }
    };

    process::exit(exit_code);
}
