use anyhow::Result;
use clap::Parser;

mod app;
mod args;

fn main() -> Result<()> {
    let args = args::Args::parse();
    app::run(args)
}
