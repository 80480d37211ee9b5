//! Standalone disassembler: prints one line per image word.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use wordlisp::disasm;

#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Disassemble a memory image")]
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
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> wordlisp::Result<()> {
    let bytes = std::fs::read(&args.image)?;
    let words = wordlisp::words_from_bytes(&bytes)?;
    print!("{}", disasm::disasm_words(&words));
    Ok(())
}
