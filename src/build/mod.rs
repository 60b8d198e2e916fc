//! Build pipeline
//!
//! Orchestrates the back-end stages for one compilation unit:
//!
//! ```text
//! RTL → SSA (CFG + φ) → minimized SSA → LLVM IR text → executable
//!        └── <stem>.rtl   └── <stem>.ssa   └── <stem>.ll    (via clang)
//! ```
//!
//! Each stage writes its text artifact before the next stage runs, so a
//! failure still leaves the earlier dumps on disk for inspection. The
//! front end is a separate program; `build_from_file` picks up its
//! hand-off (`<stem>.rtl.json`, the serialized `RtlProgram`) from beside
//! the source file, while `build` accepts the program value directly.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::codegen::{CodeGenError, LlvmTextGen};
use crate::rtl::{format_rtl, RtlProgram};
use crate::ssa::{format_ssa, lower_program, minimize_program, SsaError};

/// Build configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Input source file (`<name>.bx`)
    pub input: PathBuf,
    /// Stop after writing the `.ll` file
    pub emit_ir: bool,
    /// Print progress between stages
    pub verbose: bool,
}

impl BuildConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            emit_ir: false,
            verbose: false,
        }
    }

    pub fn emit_ir(mut self, emit: bool) -> Self {
        self.emit_ir = emit;
        self
    }

    pub fn verbose(mut self, v: bool) -> Self {
        self.verbose = v;
        self
    }
}

/// Build error
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("bad file name: {0} (expected a .bx source file)")]
    BadFileName(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed front-end hand-off: {0}")]
    Frontend(#[from] serde_json::Error),

    #[error("SSA construction error: {0}")]
    Ssa(#[from] SsaError),

    #[error("code generation error: {0}")]
    CodeGen(#[from] CodeGenError),

    #[error("assembler failure: {0}")]
    Assembler(String),
}

impl BuildError {
    /// The process exit code the driver reports for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::BadFileName(_) => 1,
            BuildError::Assembler(_) => 2,
            _ => 1,
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Validate the source filename, read the front-end hand-off beside it and
/// build the unit
pub fn build_from_file(config: &BuildConfig) -> BuildResult<()> {
    if config.input.extension().and_then(|e| e.to_str()) != Some("bx") {
        return Err(BuildError::BadFileName(config.input.clone()));
    }
    let handoff = config.input.with_extension("rtl.json");
    let text = std::fs::read_to_string(&handoff)?;
    let program: RtlProgram = serde_json::from_str(&text)?;
    build(config, &program)
}

/// Run the staged pipeline on an in-memory RTL program
pub fn build(config: &BuildConfig, program: &RtlProgram) -> BuildResult<()> {
    let rtl_path = config.input.with_extension("rtl");
    std::fs::write(&rtl_path, format_rtl(program))?;
    if config.verbose {
        println!("  Wrote RTL dump: {}", rtl_path.display());
    }

    let mut ssa = lower_program(program)?;
    let stats = minimize_program(&mut ssa);
    if config.verbose {
        println!(
            "  SSA construction: {} φ removed in {} pass(es)",
            stats.phis_removed, stats.passes
        );
    }

    let ssa_path = config.input.with_extension("ssa");
    std::fs::write(&ssa_path, format_ssa(&ssa))?;
    if config.verbose {
        println!("  Wrote SSA dump: {}", ssa_path.display());
    }

    let ir = LlvmTextGen::new().generate(&ssa)?;
    let ll_path = config.input.with_extension("ll");
    std::fs::write(&ll_path, &ir)?;
    if config.verbose {
        println!("  Wrote LLVM IR: {}", ll_path.display());
    }

    if config.emit_ir {
        return Ok(());
    }

    let clang = find_clang().map_err(BuildError::Assembler)?;
    let runtime = find_runtime_c().map_err(BuildError::Assembler)?;
    let exe_path = config.input.with_extension("");

    let mut cmd = Command::new(&clang);
    cmd.args([
        "-O2",
        ll_path.to_str().unwrap_or_default(),
        runtime.to_str().unwrap_or_default(),
        "-o",
        exe_path.to_str().unwrap_or_default(),
    ]);
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BuildError::Assembler(format!(
            "clang failed: {}",
            stderr.trim()
        )));
    }
    if config.verbose {
        println!("  Created executable: {}", exe_path.display());
    }

    Ok(())
}

/// Find a clang to assemble the emitted IR
fn find_clang() -> Result<String, String> {
    let candidates = ["clang", "clang-18", "clang-17", "clang-16", "clang-15"];
    for candidate in candidates {
        if Command::new(candidate).arg("--version").output().is_ok() {
            return Ok(candidate.to_string());
        }
    }
    Err("clang not found; please install LLVM/clang".to_string())
}

/// Find runtime.c, the C runtime the emitted code links against
fn find_runtime_c() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("BX_RUNTIME_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
    }

    // relative to the executable (target/release/bx -> runtime/runtime.c)
    if let Ok(exe) = std::env::current_exe() {
        let mut dir: Option<&Path> = exe.parent();
        while let Some(d) = dir {
            let runtime = d.join("runtime").join("runtime.c");
            if runtime.exists() {
                return Ok(runtime);
            }
            dir = d.parent();
        }
    }

    for pattern in ["runtime/runtime.c", "../runtime/runtime.c"] {
        let p = PathBuf::from(pattern);
        if p.exists() {
            return Ok(p);
        }
    }

    Err("runtime.c not found; set the BX_RUNTIME_PATH environment variable".to_string())
}
