//! Code generation
//!
//! `llvm` defines the textual instruction templates; `llvm_text` lowers an
//! SSA program onto them.

pub mod llvm;
pub mod llvm_text;

pub use llvm::{LlvmLine, Value};
pub use llvm_text::{CodeGenError, CodeGenResult, LlvmTextGen};
