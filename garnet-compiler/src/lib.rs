mod analyzer;
mod ast;
mod closure;
mod compiler;
mod completion;
mod diagnostics;
mod dispatch;
mod error;
mod exits;
mod ir;
mod lexer;
mod parser;
mod program;
mod source;
mod stdlib;
mod types;

pub mod runtime;

pub use crate::analyzer::{Analyzer, AnalyzerOptions};
pub use crate::ast::{
    AssignTarget, AssignmentExpression, Block, BlockParameter, Body, BreakExpression,
    CallExpression, ClassDefinition, ConditionalExpression, ConditionalKind, Expression,
    ExpressionKind, ExternFunction, FunctionDefinition, FunctionParameter, LibDefinition, Literal,
    LogicalExpression, LogicalOperator, Module, NodeId, ReturnExpression, SourceSpan,
    WhileExpression, YieldExpression,
};
pub use crate::closure::{bind_closures, Capture, CaptureDescriptor, ClosureInfo};
pub use crate::compiler::{Compilation, CompileOptions, Compiler};
pub use crate::completion::{BreakTarget, CallSiteId, Completion, CompletionSet, FrameId, LoopId};
pub use crate::diagnostics::{Diagnostic, DiagnosticLevel, Diagnostics};
pub use crate::dispatch::{expand_arms, lookup, CallShape, Callee};
pub use crate::error::AnalysisError;
pub use crate::exits::{
    exit_method, exit_through_call, exit_through_loop, resolve_exit_targets, ExitTargets,
    LexicalTarget,
};
pub use crate::ir::{
    DispatchArm, InlineCall, LocalId, LocalSlot, TypedExpr, TypedExprKind, TypedMethod,
    TypedMethodId, TypedProgram,
};
pub use crate::lexer::{Keyword, Lexer, Token, TokenKind};
pub use crate::parser::Parser;
pub use crate::program::{ClassInfo, ExternInfo, MethodId, MethodInfo, ProgramIndex};
pub use crate::source::{SourceFile, SourceId};
pub use crate::stdlib::{Intrinsic, PRELUDE};
pub use crate::types::{merge, merge_optional, ObjectType, SimpleType, Type, UnionType};
