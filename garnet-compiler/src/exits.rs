//! Non-local exits: which construct every `return`, `break` and `yield` leaves,
//! and how their completions are lifted back into normal flow.

use std::collections::HashMap;

use serde::Serialize;

use crate::ast::{Body, Expression, ExpressionKind, FunctionDefinition, NodeId};
use crate::completion::{BreakTarget, CallSiteId, CompletionSet, FrameId, LoopId};
use crate::error::AnalysisError;
use crate::types::{merge_optional, Type};

/// Lexical construct an exit leaves. Resolved to runtime frames and call sites
/// per expansion by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LexicalTarget {
    Program,
    Method(NodeId),
    Block(NodeId),
    Loop(NodeId),
}

#[derive(Debug, Default)]
pub struct ExitTargets {
    targets: HashMap<NodeId, LexicalTarget>,
}

impl ExitTargets {
    pub fn target_of(&self, node: NodeId) -> Option<LexicalTarget> {
        self.targets.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Classify every exit in the given bodies. All errors are collected.
pub fn resolve_exit_targets<'a>(
    bodies: impl IntoIterator<Item = &'a Body>,
) -> Result<ExitTargets, Vec<AnalysisError>> {
    let mut resolver = ExitResolver {
        stack: vec![LexicalTarget::Program],
        targets: HashMap::new(),
        errors: Vec::new(),
    };
    for body in bodies {
        resolver.visit_body(body);
    }

    if resolver.errors.is_empty() {
        Ok(ExitTargets {
            targets: resolver.targets,
        })
    } else {
        Err(resolver.errors)
    }
}

struct ExitResolver {
    stack: Vec<LexicalTarget>,
    targets: HashMap<NodeId, LexicalTarget>,
    errors: Vec<AnalysisError>,
}

impl ExitResolver {
    fn visit_body(&mut self, body: &Body) {
        for expression in &body.expressions {
            self.visit_expression(expression);
        }
    }

    fn visit_function(&mut self, function: &FunctionDefinition) {
        self.stack.push(LexicalTarget::Method(function.id));
        self.visit_body(&function.body);
        self.stack.pop();
    }

    fn visit_expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Return(_) => {
                // Blocks and loops are transparent to `return`.
                let target = self
                    .stack
                    .iter()
                    .rev()
                    .find(|target| {
                        matches!(target, LexicalTarget::Method(_) | LexicalTarget::Program)
                    })
                    .copied();
                self.record(expression, target, "return");
            }
            ExpressionKind::Break(_) => {
                // The innermost block or loop wins; a method boundary stops the search.
                let target = match self.stack.last() {
                    Some(target @ (LexicalTarget::Block(_) | LexicalTarget::Loop(_))) => {
                        Some(*target)
                    }
                    _ => None,
                };
                self.record(expression, target, "break");
            }
            ExpressionKind::Yield(_) => {
                let method = self
                    .stack
                    .iter()
                    .rev()
                    .find(|target| {
                        matches!(target, LexicalTarget::Method(_) | LexicalTarget::Program)
                    })
                    .copied();
                match method {
                    Some(target @ LexicalTarget::Method(_)) => {
                        self.targets.insert(expression.id, target);
                    }
                    _ => self.errors.push(AnalysisError::YieldOutsideMethod {
                        span: expression.span,
                    }),
                }
            }
            _ => {}
        }

        match &expression.kind {
            ExpressionKind::Function(function) => self.visit_function(function),
            ExpressionKind::Class(class) => {
                for method in &class.methods {
                    self.visit_function(method);
                }
            }
            ExpressionKind::While(while_expr) => {
                self.visit_expression(&while_expr.condition);
                self.stack.push(LexicalTarget::Loop(expression.id));
                self.visit_body(&while_expr.body);
                self.stack.pop();
            }
            ExpressionKind::Call(call) => {
                if let Some(receiver) = &call.receiver {
                    self.visit_expression(receiver);
                }
                for argument in &call.arguments {
                    self.visit_expression(argument);
                }
                if let Some(block) = &call.block {
                    self.stack.push(LexicalTarget::Block(block.id));
                    self.visit_body(&block.body);
                    self.stack.pop();
                }
            }
            _ => {
                for child in expression.children() {
                    self.visit_expression(child);
                }
            }
        }
    }

    fn record(
        &mut self,
        expression: &Expression,
        target: Option<LexicalTarget>,
        keyword: &'static str,
    ) {
        match target {
            Some(target) => {
                self.targets.insert(expression.id, target);
            }
            None => self.errors.push(AnalysisError::UnresolvedExitTarget {
                keyword,
                span: expression.span,
            }),
        }
    }
}

/// Completions of an expanded yielding call as its caller sees them: returns
/// from the callee's own frame and breaks aimed at this call site become the
/// call's value, everything else keeps propagating outward.
pub fn exit_through_call(body: CompletionSet, site: CallSiteId, frame: FrameId) -> CompletionSet {
    let mut body = body;
    let returned = body.take_return(frame);
    let broke = body.take_break(BreakTarget::Call(site));
    body.merge_normal(merge_optional(returned, broke));
    body
}

/// Completions of a loop given the completions of one iteration of its body.
pub fn exit_through_loop(body: CompletionSet, id: LoopId, terminates: bool) -> CompletionSet {
    let mut lifted = body.without_normal();
    let broke = lifted.take_break(BreakTarget::Loop(id));
    lifted.merge_normal(broke);
    if terminates {
        lifted.merge_normal(Some(Type::nil()));
    }
    lifted
}

/// Result type of a method invocation; `None` when it never returns.
pub fn exit_method(body: CompletionSet, frame: FrameId) -> Option<Type> {
    let mut body = body;
    let returned = body.take_return(frame);
    let result = merge_optional(body.normal_type().cloned(), returned);
    let leftover = body.without_normal();
    if !leftover.is_never() {
        tracing::warn!(?frame, ?leftover, "exits escaped their method frame");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{SourceFile, SourceId};

    fn parse(source: &str) -> crate::ast::Module {
        let file = SourceFile::named(SourceId(0), "exits.gt", source);
        let tokens = Lexer::new(&file).unwrap().tokenize().unwrap();
        Parser::new(&file, tokens).parse().unwrap()
    }

    fn collect<'a>(expression: &'a Expression, out: &mut Vec<&'a Expression>) {
        out.push(expression);
        match &expression.kind {
            ExpressionKind::Function(function) => {
                for child in &function.body.expressions {
                    collect(child, out);
                }
            }
            _ => {
                for child in expression.children() {
                    collect(child, out);
                }
            }
        }
    }

    fn targets_of(source: &str, pick: fn(&ExpressionKind) -> bool) -> Vec<LexicalTarget> {
        let module = parse(source);
        let targets = resolve_exit_targets([&module.body]).expect("targets");
        let mut all = Vec::new();
        for expression in &module.body.expressions {
            collect(expression, &mut all);
        }
        all.into_iter()
            .filter(|expression| pick(&expression.kind))
            .map(|expression| targets.target_of(expression.id).expect("resolved"))
            .collect()
    }

    #[test]
    fn return_skips_blocks_and_targets_the_method() {
        let targets = targets_of(
            "def z\n foo { bar { return 2 } }\nend",
            |kind| matches!(kind, ExpressionKind::Return(_)),
        );
        assert_eq!(targets.len(), 1);
        assert!(matches!(targets[0], LexicalTarget::Method(_)));
    }

    #[test]
    fn break_binds_to_the_innermost_block_or_loop() {
        let block_inside_loop = targets_of(
            "while true\n foo { break }\nend",
            |kind| matches!(kind, ExpressionKind::Break(_)),
        );
        assert!(matches!(block_inside_loop[0], LexicalTarget::Block(_)));

        let loop_inside_block = targets_of(
            "foo do\n while true\n break\n end\nend",
            |kind| matches!(kind, ExpressionKind::Break(_)),
        );
        assert!(matches!(loop_inside_block[0], LexicalTarget::Loop(_)));
    }

    #[test]
    fn top_level_return_targets_the_program() {
        let targets = targets_of("return 1", |kind| matches!(kind, ExpressionKind::Return(_)));
        assert_eq!(targets, vec![LexicalTarget::Program]);
    }

    #[test]
    fn break_outside_any_block_is_unresolved() {
        let module = parse("def foo\n break 1\nend");
        let errors = resolve_exit_targets([&module.body]).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [AnalysisError::UnresolvedExitTarget { keyword: "break", .. }]
        ));
    }

    #[test]
    fn yield_at_top_level_is_rejected() {
        let module = parse("foo { yield }");
        let errors = resolve_exit_targets([&module.body]).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [AnalysisError::YieldOutsideMethod { .. }]
        ));
    }

    #[test]
    fn call_absorbs_its_own_breaks_and_callee_returns() {
        let site = CallSiteId(3);
        let frame = FrameId(9);
        let outer = FrameId(1);
        let mut body = CompletionSet::breaking(BreakTarget::Call(site), Type::int());
        body.add(Completion::Return {
            target: frame,
            ty: Type::float(),
        });
        body.add(Completion::Return {
            target: outer,
            ty: Type::char(),
        });

        let lifted = exit_through_call(body, site, frame);
        assert_eq!(
            lifted.normal_type(),
            Some(&Type::int().union_with(&Type::float()))
        );
        assert_eq!(lifted.return_type(outer), Some(&Type::char()));
    }

    #[test]
    fn endless_loop_only_completes_through_break() {
        let id = LoopId(0);
        let breaking = CompletionSet::breaking(BreakTarget::Loop(id), Type::string());
        let body = CompletionSet::normal(Type::int()).join(breaking);
        let endless = exit_through_loop(body.clone(), id, false);
        assert_eq!(endless.normal_type(), Some(&Type::string()));

        let bounded = exit_through_loop(body, id, true);
        assert_eq!(
            bounded.normal_type(),
            Some(&Type::string().union_with(&Type::nil()))
        );

        let never = exit_through_loop(CompletionSet::normal(Type::int()), id, false);
        assert!(never.is_never());
    }

    #[test]
    fn method_result_merges_fall_through_and_returns() {
        let frame = FrameId(2);
        let body = CompletionSet::normal(Type::nil())
            .join(CompletionSet::returning(frame, Type::int()));
        assert_eq!(
            exit_method(body, frame),
            Some(Type::nil().union_with(&Type::int()))
        );
        assert_eq!(exit_method(CompletionSet::never(), frame), None);
    }
}
