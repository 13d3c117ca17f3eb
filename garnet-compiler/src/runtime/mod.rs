//! Reference evaluator for the typed IR.

mod eval;
mod intrinsics;
mod value;

use thiserror::Error;

pub use eval::Evaluator;
pub use value::{ObjectValue, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("external function '{lib}.{name}' cannot be called by the evaluator")]
    ExternCall { lib: String, name: String },
    #[error("no dispatch arm matches runtime classes ({classes})")]
    NoMatchingArm { classes: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid operands for {op}: {operands}")]
    InvalidOperands { op: String, operands: String },
    #[error("'{keyword}' escaped the frame it targets")]
    EscapedUnwind { keyword: &'static str },
    #[error("unknown method instance {0}")]
    UnknownMethod(u32),
}
