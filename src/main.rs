//! BX compiler CLI

use std::path::PathBuf;

use clap::Parser;

use bx::build::{build_from_file, BuildConfig};

#[derive(Parser)]
#[command(name = "bx", version, about = "BX compiler back-end: RTL to SSA to LLVM")]
struct Cli {
    /// BX source file; the front-end hand-off `<stem>.rtl.json` must sit
    /// beside it
    file: PathBuf,

    /// Stop after writing the .ll file (do not invoke clang)
    #[arg(long)]
    emit_ir: bool,

    /// Print progress between stages
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = BuildConfig::new(cli.file)
        .emit_ir(cli.emit_ir)
        .verbose(cli.verbose);

    if let Err(e) = build_from_file(&config) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
