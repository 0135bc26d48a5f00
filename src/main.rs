use clap::Parser;
use polltrader::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
