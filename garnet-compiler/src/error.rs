use thiserror::Error;

use crate::ast::SourceSpan;

/// Failures raised by exit resolution and the fixed-point analyzer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("'{keyword}' has no enclosing target it could exit to")]
    UnresolvedExitTarget {
        keyword: &'static str,
        span: SourceSpan,
    },
    #[error("'yield' can only appear inside a method definition")]
    YieldOutsideMethod { span: SourceSpan },
    #[error("type inference did not reach a fixed point after {passes} passes")]
    NonTerminatingFixedPoint { passes: usize },
    #[error("inlining '{name}' exceeded the nesting limit of {limit}")]
    InlineDepthExceeded {
        name: String,
        limit: usize,
        span: SourceSpan,
    },
    #[error("undefined method '{name}' for {receiver} with {arity} argument(s)")]
    UndefinedMethod {
        receiver: String,
        name: String,
        arity: usize,
        span: SourceSpan,
    },
    #[error("'{name}' yields but was called without a block")]
    MissingBlock { name: String, span: SourceSpan },
    #[error("undefined constant '{name}'")]
    UndefinedConstant { name: String, span: SourceSpan },
    #[error("instance variable '{name}' used outside of an object")]
    InstanceVariableOutsideObject { name: String, span: SourceSpan },
    #[error("call to '{name}' expands into {arms} dispatch arms (limit {limit})")]
    TooManyDispatchArms {
        name: String,
        arms: usize,
        limit: usize,
        span: SourceSpan,
    },
    #[error("class '{class}' inherits from unknown class '{superclass}'")]
    UnknownSuperclass {
        class: String,
        superclass: String,
        span: SourceSpan,
    },
}

impl AnalysisError {
    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            AnalysisError::NonTerminatingFixedPoint { .. } => None,
            AnalysisError::UnresolvedExitTarget { span, .. }
            | AnalysisError::YieldOutsideMethod { span }
            | AnalysisError::InlineDepthExceeded { span, .. }
            | AnalysisError::UndefinedMethod { span, .. }
            | AnalysisError::MissingBlock { span, .. }
            | AnalysisError::UndefinedConstant { span, .. }
            | AnalysisError::InstanceVariableOutsideObject { span, .. }
            | AnalysisError::TooManyDispatchArms { span, .. }
            | AnalysisError::UnknownSuperclass { span, .. } => Some(*span),
        }
    }
}
