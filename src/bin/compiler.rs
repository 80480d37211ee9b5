//! Compiler driver: source file in, binary image out.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use wordlisp::disasm;

#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Compile a wordlisp source file to a memory image")]
struct Args {
    /// Source file
    input: PathBuf,

    /// Output image file
    output: PathBuf,

    /// Also print a disassembly of the produced image to stdout
    #[arg(long, default_value_t = false)]
    emit_asm: bool,
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
    let source = std::fs::read_to_string(&args.input)?;
    let image = wordlisp::compile(&source)?;

    if args.emit_asm {
        print!("{}", disasm::disasm_image(&image));
    }

    std::fs::write(&args.output, image.to_bytes())?;
    Ok(())
}
