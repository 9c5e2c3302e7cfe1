mod dump_events;
use dump_events::dump_events;
mod dump_header;
use dump_header::dump_header;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Parse EXI streams and dump their contents
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input filename to parse
    #[arg(short, long)]
    input: PathBuf,
    // operation to execute
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Decode and print the EXI header, including in-band options
    DumpHeader,
    /// Decode the body and print the event stream
    DumpEvents,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let input = BufReader::new(File::open(&args.input)?);
    match args.operation {
        Operation::DumpHeader => dump_header(input),
        Operation::DumpEvents => dump_events(input),
    }
}
