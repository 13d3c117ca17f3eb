use std::fmt;

use crate::ast::SourceSpan;
use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub level: DiagnosticLevel,
    pub span: Option<SourceSpan>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Error => "error",
        };
        match self.span {
            Some(span) => write!(
                f,
                "{level} at line {}, column {}: {}",
                span.line, span.column, self.message
            ),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push_error_with_span<S: Into<String>>(&mut self, message: S, span: Option<SourceSpan>) {
        self.entries.push(Diagnostic {
            message: message.into(),
            level: DiagnosticLevel::Error,
            span,
        });
    }

    pub fn push_analysis_error(&mut self, error: &AnalysisError) {
        self.push_error_with_span(error.to_string(), error.span());
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.level == DiagnosticLevel::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn messages(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|diagnostic| diagnostic.message.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_errors_keep_their_span() {
        let span = SourceSpan {
            line: 3,
            column: 5,
            end_line: 3,
            end_column: 10,
        };
        let mut diagnostics = Diagnostics::new();
        diagnostics.push_analysis_error(&AnalysisError::UndefinedConstant {
            name: "Foo".to_string(),
            span,
        });
        diagnostics.push_error_with_span("Parsing failed", None);

        assert!(diagnostics.has_errors());
        let rendered: Vec<String> = diagnostics
            .entries()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "error at line 3, column 5: undefined constant 'Foo'".to_string(),
                "error: Parsing failed".to_string(),
            ]
        );
    }
}
