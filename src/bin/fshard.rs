use std::path::PathBuf;
use std::process;

use clap::Parser;

use shard_rs::common::reset_sigpipe;
use shard_rs::shard::{self, PlanMode, ShardConfig};

#[derive(Parser)]
#[command(
    name = "fshard",
    version,
    about = "Split a line-oriented file into chunk files, cutting only at line boundaries"
)]
struct Cli {
    /// Approximate bytes per chunk (accepts K/M/G/T suffixes; default 1G)
    #[arg(short = 'b', long = "size", value_name = "SIZE", conflicts_with = "count")]
    size: Option<String>,

    /// Approximate number of chunks to produce instead of a size
    #[arg(short = 'n', long = "count", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,

    /// Skip N leading lines of the first chunk
    #[arg(long = "skip-lines", value_name = "N", default_value_t = 0)]
    skip_lines: u64,

    /// Concurrent chunk writers (default: all available cores)
    #[arg(short = 'w', long = "workers", value_name = "N", default_value_t = 0)]
    workers: usize,

    /// Output filename prefix
    #[arg(short = 'p', long = "prefix", value_name = "PREFIX", default_value = "part")]
    prefix: String,

    /// Read with plain positional I/O instead of a memory map
    #[arg(long = "no-mmap")]
    no_mmap: bool,

    /// Print each planned section and output file
    #[arg(long = "verbose")]
    verbose: bool,

    /// Source file
    input: PathBuf,

    /// Destination directory (created if absent)
    dest: PathBuf,
}

fn main() {
    reset_sigpipe();

    let cli = Cli::parse();

    let mode = match (&cli.size, cli.count) {
        (_, Some(n)) => PlanMode::ByCount(n),
        (Some(s), None) => match shard::parse_size(s) {
            Ok(0) => {
                eprintln!("fshard: invalid chunk size: '0'");
                process::exit(1);
            }
            Ok(bytes) => PlanMode::BySize(bytes),
            Err(e) => {
                eprintln!("fshard: {}", e);
                process::exit(1);
            }
        },
        (None, None) => PlanMode::BySize(1 << 30),
    };

    let config = ShardConfig {
        mode,
        skip_lines: cli.skip_lines,
        workers: cli.workers,
        prefix: cli.prefix,
        mapped: !cli.no_mmap,
        verbose: cli.verbose,
    };

    match shard::shard_file(&cli.input, &cli.dest, &config) {
        Ok(summary) => {
            // Chunk write failures were already reported per file; they
            // warn but do not change the exit status.
            if summary.failed > 0 {
                eprintln!(
                    "fshard: warning: {} of {} chunks failed",
                    summary.failed, summary.planned
                );
            }
        }
        Err(e) => {
            eprintln!("fshard: {}", e);
            process::exit(1);
        }
    }
}
