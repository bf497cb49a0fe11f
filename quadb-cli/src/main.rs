use clap::Parser;
use quadb_cli::Cli;

fn main() -> miette::Result<()> {
    quadb_cli::init_logging();
    Cli::parse().run()
}
