//! BX compiler back-end
//!
//! Lowers the typed linear IR (RTL) of the BX language into static single
//! assignment form organized as a control-flow graph, then emits LLVM-style
//! textual assembly for a 64-bit target. The pipeline is strictly staged:
//!
//! 1. `rtl` — the linear IR handed over by the front end,
//! 2. `ssa::lower` — basic-block construction and SSA renaming with
//!    conservative φ placement,
//! 3. `ssa::minimize` — iterative φ elimination to a fixpoint,
//! 4. `codegen` — LLVM textual emission,
//! 5. `build` — the driver tying the stages together and invoking clang.
//!
//! Everything runs single-threaded within one compilation unit; the unit
//! owns its label and symbolic-name counters.

pub mod build;
pub mod codegen;
pub mod rtl;
pub mod source;
pub mod ssa;

pub use build::{build, build_from_file, BuildConfig, BuildError, BuildResult};
