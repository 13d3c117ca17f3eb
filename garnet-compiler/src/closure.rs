//! Capture analysis for block literals.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::ast::{
    AssignTarget, Block, Body, Expression, ExpressionKind, FunctionDefinition, NodeId, SourceSpan,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capture {
    pub name: String,
    pub mutated_inside: bool,
    pub mutated_after: bool,
}

impl Capture {
    /// The variable must live in storage that outlives the block's own frame.
    pub fn requires_cell(&self) -> bool {
        self.mutated_inside || self.mutated_after
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureDescriptor {
    pub block: NodeId,
    pub span: SourceSpan,
    pub parameters: Vec<String>,
    pub block_locals: Vec<String>,
    pub captures: Vec<Capture>,
    pub captures_self: bool,
}

impl CaptureDescriptor {
    pub fn capture(&self, name: &str) -> Option<&Capture> {
        self.captures.iter().find(|capture| capture.name == name)
    }
}

#[derive(Debug, Default)]
pub struct ClosureInfo {
    descriptors: HashMap<NodeId, CaptureDescriptor>,
}

impl ClosureInfo {
    pub fn descriptor(&self, block: NodeId) -> Option<&CaptureDescriptor> {
        self.descriptors.get(&block)
    }

    /// Descriptors ordered by block id.
    pub fn descriptors(&self) -> Vec<&CaptureDescriptor> {
        let mut descriptors: Vec<_> = self.descriptors.values().collect();
        descriptors.sort_by_key(|descriptor| descriptor.block);
        descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

pub fn bind_closures<'a>(bodies: impl IntoIterator<Item = &'a Body>) -> ClosureInfo {
    let mut binder = Binder::default();
    binder.enter_definition(&[]);
    for body in bodies {
        binder.visit_body(body);
    }
    binder.leave_definition();
    ClosureInfo {
        descriptors: binder.finished,
    }
}

struct Scope {
    block: Option<NodeId>,
    names: HashSet<String>,
}

/// Per method-body bookkeeping for `mutated_after`.
#[derive(Default)]
struct DefinitionState {
    loops: Vec<SourceSpan>,
    assignments: Vec<(String, SourceSpan)>,
    pending: Vec<(CaptureDescriptor, Vec<SourceSpan>)>,
}

#[derive(Default)]
struct Binder {
    scopes: Vec<Scope>,
    definitions: Vec<DefinitionState>,
    active: HashMap<NodeId, CaptureDescriptor>,
    finished: HashMap<NodeId, CaptureDescriptor>,
}

impl Binder {
    fn enter_definition(&mut self, parameters: &[String]) {
        self.scopes.push(Scope {
            block: None,
            names: parameters.iter().cloned().collect(),
        });
        self.definitions.push(DefinitionState::default());
    }

    fn leave_definition(&mut self) {
        self.scopes.pop();
        let Some(state) = self.definitions.pop() else {
            return;
        };

        for (mut descriptor, loops) in state.pending {
            for capture in &mut descriptor.captures {
                capture.mutated_after = state.assignments.iter().any(|(name, span)| {
                    *name == capture.name
                        && (span.starts_after(&descriptor.span)
                            || loops.iter().any(|body| body.contains(span)))
                });
            }
            self.finished.insert(descriptor.block, descriptor);
        }
    }

    fn visit_function(&mut self, function: &FunctionDefinition) {
        let parameters: Vec<String> = function
            .parameters
            .iter()
            .map(|parameter| parameter.name.clone())
            .collect();
        self.enter_definition(&parameters);
        self.visit_body(&function.body);
        self.leave_definition();
    }

    fn visit_body(&mut self, body: &Body) {
        for expression in &body.expressions {
            self.visit_expression(expression);
        }
    }

    fn visit_expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExpressionKind::Function(function) => self.visit_function(function),
            ExpressionKind::Class(class) => {
                for method in &class.methods {
                    self.visit_function(method);
                }
            }
            ExpressionKind::Lib(_) => {}
            ExpressionKind::Local(name) => self.note_use(name, false),
            ExpressionKind::SelfRef | ExpressionKind::InstanceVar(_) => self.note_self(),
            ExpressionKind::Assignment(assignment) => {
                self.visit_expression(&assignment.value);
                match &assignment.target {
                    AssignTarget::Local(name) => {
                        if let Some(state) = self.definitions.last_mut() {
                            let assigned = (name.clone(), assignment.target_span);
                            state.assignments.push(assigned);
                        }
                        if self.resolve(name).is_some() {
                            self.note_use(name, true);
                        } else if let Some(scope) = self.scopes.last_mut() {
                            scope.names.insert(name.clone());
                        }
                    }
                    AssignTarget::InstanceVar(_) => self.note_self(),
                    AssignTarget::Global(_) | AssignTarget::Constant(_) => {}
                }
            }
            ExpressionKind::Call(call) => {
                match &call.receiver {
                    Some(receiver) => self.visit_expression(receiver),
                    None => self.note_self(),
                }
                for argument in &call.arguments {
                    self.visit_expression(argument);
                }
                if let Some(block) = &call.block {
                    self.visit_block(block);
                }
            }
            ExpressionKind::While(while_expr) => {
                self.visit_expression(&while_expr.condition);
                if let Some(state) = self.definitions.last_mut() {
                    state.loops.push(expression.span);
                }
                self.visit_body(&while_expr.body);
                if let Some(state) = self.definitions.last_mut() {
                    state.loops.pop();
                }
            }
            _ => {
                for child in expression.children() {
                    self.visit_expression(child);
                }
            }
        }
    }

    fn visit_block(&mut self, block: &Block) {
        let parameters: Vec<String> = block
            .parameters
            .iter()
            .map(|parameter| parameter.name.clone())
            .collect();
        self.active.insert(
            block.id,
            CaptureDescriptor {
                block: block.id,
                span: block.span,
                parameters: parameters.clone(),
                block_locals: Vec::new(),
                captures: Vec::new(),
                captures_self: false,
            },
        );
        self.scopes.push(Scope {
            block: Some(block.id),
            names: parameters.iter().cloned().collect(),
        });

        self.visit_body(&block.body);

        let scope = self.scopes.pop();
        let Some(mut descriptor) = self.active.remove(&block.id) else {
            return;
        };
        if let Some(scope) = scope {
            let mut locals: Vec<String> = scope
                .names
                .into_iter()
                .filter(|name| !parameters.contains(name))
                .collect();
            locals.sort();
            descriptor.block_locals = locals;
        }
        if let Some(state) = self.definitions.last_mut() {
            let loops = state.loops.clone();
            state.pending.push((descriptor, loops));
        }
    }

    /// Index of the scope declaring `name`, searching out to the enclosing method body.
    fn resolve(&self, name: &str) -> Option<usize> {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            if scope.names.contains(name) {
                return Some(index);
            }
            if scope.block.is_none() {
                break;
            }
        }
        None
    }

    fn note_use(&mut self, name: &str, mutated: bool) {
        let Some(declared_at) = self.resolve(name) else {
            return;
        };
        let blocks: Vec<NodeId> = self.scopes[declared_at + 1..]
            .iter()
            .filter_map(|scope| scope.block)
            .collect();
        for block in blocks {
            let Some(descriptor) = self.active.get_mut(&block) else {
                continue;
            };
            match descriptor
                .captures
                .iter_mut()
                .find(|capture| capture.name == name)
            {
                Some(capture) => capture.mutated_inside |= mutated,
                None => descriptor.captures.push(Capture {
                    name: name.to_string(),
                    mutated_inside: mutated,
                    mutated_after: false,
                }),
            }
        }
    }

    fn note_self(&mut self) {
        for scope in self.scopes.iter().rev() {
            let Some(block) = scope.block else {
                break;
            };
            if let Some(descriptor) = self.active.get_mut(&block) {
                descriptor.captures_self = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{SourceFile, SourceId};

    fn bind(source: &str) -> ClosureInfo {
        let file = SourceFile::named(SourceId(0), "closure.gt", source);
        let tokens = Lexer::new(&file).unwrap().tokenize().unwrap();
        let module = Parser::new(&file, tokens).parse().unwrap();
        bind_closures([&module.body])
    }

    fn only(info: &ClosureInfo) -> &CaptureDescriptor {
        let descriptors = info.descriptors();
        assert_eq!(descriptors.len(), 1);
        descriptors[0]
    }

    #[test]
    fn reassigned_parameter_is_not_a_capture() {
        let info = bind("a = 1\nfoo { |x| x = 2; x }");
        let descriptor = only(&info);
        assert_eq!(descriptor.parameters, vec!["x".to_string()]);
        assert!(descriptor.captures.is_empty());
    }

    #[test]
    fn parameter_shadows_outer_variable() {
        let info = bind("x = 1\nfoo { |x| x = 2 }");
        assert!(only(&info).capture("x").is_none());
    }

    #[test]
    fn mutation_inside_block_requires_a_cell() {
        let info = bind("a = 0\nfoo { a += 1; break }\na");
        let capture = only(&info).capture("a").expect("captured");
        assert!(capture.mutated_inside);
        assert!(capture.requires_cell());
    }

    #[test]
    fn read_only_capture_stays_in_place() {
        let info = bind("x = 1\nfoo { x + 1 }");
        let capture = only(&info).capture("x").expect("captured");
        assert!(!capture.requires_cell());
    }

    #[test]
    fn assignment_after_the_block_is_detected() {
        let info = bind("x = 1\nfoo { x }\nx = 2");
        assert!(only(&info).capture("x").expect("captured").mutated_after);
    }

    #[test]
    fn assignment_in_an_enclosing_loop_counts_as_after() {
        let info = bind("x = 0\nwhile x < 3\n x = x + 1\n foo { x }\nend");
        assert!(only(&info).capture("x").expect("captured").mutated_after);
    }

    #[test]
    fn nested_blocks_both_capture() {
        let info = bind("a = 1\nfoo { bar { a = 2 } }");
        let descriptors = info.descriptors();
        assert_eq!(descriptors.len(), 2);
        for descriptor in descriptors {
            assert!(descriptor.capture("a").expect("captured").mutated_inside);
        }
    }

    #[test]
    fn block_locals_and_self() {
        let info = bind("foo { y = 1; y }\nbar { @x }\nbaz { qux }");
        let descriptors = info.descriptors();
        assert_eq!(descriptors[0].block_locals, vec!["y".to_string()]);
        assert!(descriptors[0].captures.is_empty());
        assert!(!descriptors[0].captures_self);
        assert!(descriptors[1].captures_self);
        assert!(descriptors[2].captures_self);
    }

    #[test]
    fn method_parameters_are_captured_from_blocks() {
        let info = bind("def foo(key, default)\n foo(key) { default }\nend");
        let descriptor = only(&info);
        assert!(descriptor.capture("default").is_some());
        assert!(!descriptor.captures_self);

        let info = bind("def foo(key, default)\n foo(key) { bar(default) }\nend");
        let descriptor = only(&info);
        assert!(descriptor.capture("default").is_some());
        assert!(descriptor.captures_self);
    }
}
