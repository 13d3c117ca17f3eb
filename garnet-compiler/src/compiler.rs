use anyhow::{bail, Context, Result};

use crate::analyzer::{Analyzer, AnalyzerOptions};
use crate::ast::{Module, NodeId};
use crate::closure::{bind_closures, ClosureInfo};
use crate::diagnostics::Diagnostics;
use crate::exits::{resolve_exit_targets, ExitTargets};
use crate::ir::TypedProgram;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::program::ProgramIndex;
use crate::runtime::{Evaluator, RuntimeError, Value};
use crate::source::{SourceFile, SourceId};
use crate::stdlib::PRELUDE;
use crate::types::Type;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Analyze the prelude (`Int#times`, `Int#upto`) ahead of the program.
    pub include_prelude: bool,
    pub max_passes: usize,
    pub max_inline_depth: usize,
    pub max_dispatch_arms: usize,
    pub dump_tokens: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        let analyzer = AnalyzerOptions::default();
        Self {
            include_prelude: true,
            max_passes: analyzer.max_passes,
            max_inline_depth: analyzer.max_inline_depth,
            max_dispatch_arms: analyzer.max_dispatch_arms,
            dump_tokens: false,
        }
    }
}

impl CompileOptions {
    fn analyzer(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            max_passes: self.max_passes,
            max_inline_depth: self.max_inline_depth,
            max_dispatch_arms: self.max_dispatch_arms,
        }
    }
}

pub struct Compilation {
    pub program: TypedProgram,
    pub exit_targets: ExitTargets,
    pub closures: ClosureInfo,
}

impl Compilation {
    /// Static type of the whole program; `None` when it never completes.
    pub fn result_type(&self) -> Option<&Type> {
        self.program.result_type()
    }

    pub fn evaluate(&self) -> Result<Value, RuntimeError> {
        Evaluator::new(&self.program).run()
    }

    pub fn ir_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.program).context("failed to serialize typed IR")
    }
}

pub struct Compiler {
    diagnostics: Diagnostics,
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            diagnostics: Diagnostics::new(),
            options,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    #[tracing::instrument(skip_all, fields(source = %source.display_name()))]
    pub fn compile(&mut self, source: &SourceFile) -> Result<Compilation> {
        let mut modules = Vec::new();
        let mut next_id = NodeId(0);
        if self.options.include_prelude {
            let prelude = SourceFile::named(SourceId(u32::MAX), "<prelude>", PRELUDE);
            let (module, after) = self.parse(&prelude, next_id)?;
            modules.push(module);
            next_id = after;
        }
        let (module, _) = self.parse(source, next_id)?;
        modules.push(module);
        let bodies: Vec<_> = modules.iter().map(|module| &module.body).collect();
        tracing::debug!(modules = bodies.len(), "parsed");

        let index = match ProgramIndex::build(bodies.iter().copied()) {
            Ok(index) => index,
            Err(errors) => {
                for error in &errors {
                    self.diagnostics.push_analysis_error(error);
                }
                bail!("Type inference failed");
            }
        };

        let exit_targets = match resolve_exit_targets(bodies.iter().copied()) {
            Ok(targets) => targets,
            Err(errors) => {
                for error in &errors {
                    self.diagnostics.push_analysis_error(error);
                }
                bail!("Exit target resolution failed");
            }
        };
        let closures = bind_closures(bodies.iter().copied());
        tracing::debug!(
            exits = exit_targets.len(),
            blocks = closures.len(),
            "exits and closures resolved"
        );

        let analyzer = Analyzer::new(&index, &exit_targets, &closures, self.options.analyzer());
        let program = match analyzer.analyze(&bodies) {
            Ok(program) => program,
            Err(errors) => {
                for error in &errors {
                    self.diagnostics.push_analysis_error(error);
                }
                bail!("Type inference failed");
            }
        };
        tracing::debug!(
            methods = program.methods.len(),
            result = ?program.result_type().map(ToString::to_string),
            "analysis finished"
        );

        Ok(Compilation {
            program,
            exit_targets,
            closures,
        })
    }

    fn parse(&mut self, source: &SourceFile, first: NodeId) -> Result<(Module, NodeId)> {
        let mut lexer = Lexer::new(source)?;
        let tokens = match lexer.tokenize() {
            Ok(tokens) => tokens,
            Err(err) => {
                self.diagnostics.push_error_with_span(err.to_string(), None);
                bail!("Lexing failed");
            }
        };

        if self.options.dump_tokens {
            for token in &tokens {
                println!("{token:?}");
            }
        }

        let mut parser = Parser::new(source, tokens).starting_at(first);
        let parsed = parser.parse();
        let next = parser.next_node_id();
        self.diagnostics.extend(parser.into_diagnostics());
        match parsed {
            Ok(module) if !self.diagnostics.has_errors() => Ok((module, next)),
            Ok(_) => bail!("Parsing failed"),
            Err(err) => {
                self.diagnostics.push_error_with_span(err.to_string(), None);
                bail!("Parsing failed")
            }
        }
    }
}
