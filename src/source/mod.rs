//! Source-level interface types
//!
//! The front end (parser, name resolution, type checking, AST-to-RTL
//! lowering) lives outside this crate. What it hands over is a table of
//! global variables plus the linear-IR routines in `crate::rtl`. The types
//! here are the shared vocabulary of that hand-off.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source type of a global variable or routine result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Int64,
    Bool,
    /// Result type of procedures (no global may have this type)
    Unit,
}

impl Type {
    /// LLVM spelling. Both integers and booleans are 64-bit at the IR level.
    pub fn to_llvm(self) -> &'static str {
        match self {
            Type::Int64 | Type::Bool => "i64",
            Type::Unit => "void",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Int64 => "int64",
            Type::Bool => "bool",
            Type::Unit => "unit",
        };
        write!(f, "{s}")
    }
}

/// Compile-time initializer of a global variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitValue {
    Int(i64),
    Bool(bool),
}

impl InitValue {
    /// The 64-bit image of the initializer (booleans are canonical 0/1)
    pub fn as_i64(self) -> i64 {
        match self {
            InitValue::Int(n) => n,
            InitValue::Bool(b) => b as i64,
        }
    }
}

impl fmt::Display for InitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitValue::Int(n) => write!(f, "{n}"),
            InitValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A global variable declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVar {
    pub ty: Type,
    pub init: InitValue,
}
