//! LLVM assembly lines
//!
//! The concrete target of the pipeline is LLVM textual assembly. Each line
//! is a literal template carrying `` `d `` (destination), `` `t `` (type)
//! and `` `a0 ``, `` `a1 ``, … (positional argument) markers that are
//! substituted when the line is displayed. Only the constructors below can
//! build lines, so every opcode the emitter needs has exactly one spelling.

use std::fmt;

use crate::rtl::Label;

/// An operand of an LLVM instruction: a named register or an immediate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Reg(String),
    Imm(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reg(name) => write!(f, "%{name}"),
            Value::Imm(imm) => write!(f, "{imm}"),
        }
    }
}

/// One line of LLVM assembly
#[derive(Debug, Clone)]
pub struct LlvmLine {
    dest: String,
    ty: String,
    args: Vec<String>,
    template: String,
}

impl LlvmLine {
    fn new(dest: &str, ty: &str, args: Vec<String>, template: String) -> Self {
        Self {
            dest: dest.to_string(),
            ty: ty.to_string(),
            args,
            template,
        }
    }

    /// A verbatim line (module headers, define/close braces, declares)
    pub fn directive(text: &str) -> Self {
        Self::new("", "", vec![], text.to_string())
    }

    /// A block label line, `L<id>:`
    pub fn set_label(label: Label) -> Self {
        Self::new("", "", vec![], format!("{label}:"))
    }
}

macro_rules! arith_nsw {
    ($($name:ident)*) => {$(
        impl LlvmLine {
            pub fn $name(dest: &str, ty: &str, a: Value, b: Value) -> Self {
                Self::new(
                    dest,
                    ty,
                    vec![a.to_string(), b.to_string()],
                    concat!("  %`d = ", stringify!($name), " nsw `t `a0, `a1").to_string(),
                )
            }
        }
    )*};
}
arith_nsw!(add sub mul);

macro_rules! arith_plain {
    ($($name:ident)*) => {$(
        impl LlvmLine {
            pub fn $name(dest: &str, ty: &str, a: Value, b: Value) -> Self {
                Self::new(
                    dest,
                    ty,
                    vec![a.to_string(), b.to_string()],
                    concat!("  %`d = ", stringify!($name), " `t `a0, `a1").to_string(),
                )
            }
        }
    )*};
}
arith_plain!(udiv srem shl ashr and or xor);

macro_rules! icmp {
    ($($name:ident)*) => {$(
        impl LlvmLine {
            pub fn $name(dest: &str, ty: &str, a: Value, b: Value) -> Self {
                Self::new(
                    dest,
                    ty,
                    vec![a.to_string(), b.to_string()],
                    concat!("  %`d = icmp ", stringify!($name), " `t `a0, `a1").to_string(),
                )
            }
        }
    )*};
}
icmp!(eq ne sgt sge slt sle);

impl LlvmLine {
    /// Typed load from a named global
    pub fn load(dest: &str, ty: &str, global: &str) -> Self {
        Self::new(
            dest,
            ty,
            vec![global.to_string()],
            "  %`d = load `t, ptr @`a0, align 8".to_string(),
        )
    }

    /// Typed store of a value to a named global
    pub fn store(ty: &str, source: Value, global: &str) -> Self {
        Self::new(
            "",
            ty,
            vec![source.to_string(), global.to_string()],
            "  store `t `a0, ptr @`a1, align 8".to_string(),
        )
    }

    /// Conditional branch on an i1 register; both targets are block labels
    pub fn br_cond(cond: &str, then_label: Label, else_label: Label) -> Self {
        Self::new(
            "",
            "",
            vec![cond.to_string()],
            format!("  br i1 %`a0, label %{then_label}, label %{else_label}"),
        )
    }

    pub fn br_uncond(target: Label) -> Self {
        Self::new("", "", vec![], format!("  br label %{target}"))
    }

    /// Function call. `dest` binds the result; pass `None` when the result
    /// is discarded or the callee returns void.
    pub fn call(dest: Option<&str>, func: &str, ty: &str, args: &[Value]) -> Self {
        let rendered: Vec<String> = args.iter().map(|a| format!("i64 {a}")).collect();
        let arg_list = rendered.join(", ");
        match dest {
            Some(d) => Self::new(d, ty, vec![], format!("  %`d = call `t @{func}({arg_list})")),
            None => Self::new("", ty, vec![], format!("  call `t @{func}({arg_list})")),
        }
    }

    /// Function definition header, `define <ty> @<name>(<params>) {`;
    /// the body lines and the closing brace follow as separate lines
    pub fn define(name: &str, ty: &str, params: &[String]) -> Self {
        Self::new(
            name,
            ty,
            vec![],
            format!("define `t @`d({}) {{", params.join(", ")),
        )
    }

    pub fn ret_void() -> Self {
        Self::new("", "", vec![], "  ret void".to_string())
    }

    pub fn ret_ty(ty: &str, arg: Value) -> Self {
        Self::new("", ty, vec![arg.to_string()], "  ret `t `a0".to_string())
    }

    /// φ-node: one `[ value, predecessor ]` bracket per incoming edge
    pub fn phi(dest: &str, ty: &str, incoming: &[(String, Label)]) -> Self {
        let brackets: Vec<String> = incoming
            .iter()
            .map(|(value, pred)| format!("[ %{value}, %{pred} ]"))
            .collect();
        Self::new(
            dest,
            ty,
            vec![],
            format!("  %`d = phi `t {}", brackets.join(", ")),
        )
    }

    pub fn global_with_value(name: &str, ty: &str, imm: i64) -> Self {
        Self::new(name, ty, vec![], format!("@`d = global `t {imm}, align 8"))
    }

    pub fn global_no_value(name: &str, ty: &str) -> Self {
        Self::new(name, ty, vec![], "@`d = global `t, align 8".to_string())
    }
}

impl fmt::Display for LlvmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = self.template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '`' {
                write!(f, "{c}")?;
                continue;
            }
            match chars.next() {
                Some('d') => write!(f, "{}", self.dest)?,
                Some('t') => write!(f, "{}", self.ty)?,
                Some('a') => {
                    let mut index = 0usize;
                    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                        index = index * 10 + d as usize;
                        chars.next();
                    }
                    write!(f, "{}", self.args[index])?;
                }
                other => panic!("bad template marker `{other:?}"),
            }
        }
        Ok(())
    }
}
