//! Simulator driver: loads an image and ticks the processor until halt.
//! MMIO bridges the process stdin/stdout.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use wordlisp::Processor;

#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Run a memory image on the pipelined processor model")]
struct Args {
    /// Image file
    image: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(ticks) => {
            tracing::info!(ticks, "halted");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> wordlisp::Result<u64> {
    let bytes = std::fs::read(&args.image)?;
    let words = wordlisp::words_from_bytes(&bytes)?;

    let ticks = {
        let stdin = std::io::stdin().lock();
        let stdout = std::io::stdout().lock();
        let mut processor = Processor::new(&words, stdin, stdout);
        processor.run()?
    };

    std::io::stdout().flush()?;
    Ok(ticks)
}
