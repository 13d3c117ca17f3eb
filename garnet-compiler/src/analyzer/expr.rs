use crate::ast::{
    AssignTarget, AssignmentExpression, Body, ConditionalExpression, ConditionalKind, Expression,
    ExpressionKind, Literal, LogicalExpression, LogicalOperator, WhileExpression,
};
use crate::completion::{BreakTarget, Completion, CompletionSet};
use crate::error::AnalysisError;
use crate::exits::{exit_through_loop, LexicalTarget};
use crate::ir::{TypedExpr, TypedExprKind};
use crate::types::Type;

use super::{assigned_on_all_paths, finish, merge_into, Analyzer, Lowered, RuntimeTarget};

impl<'a> Analyzer<'a> {
    pub(super) fn lower_body(&mut self, body: &'a Body) -> Lowered {
        let statements: Vec<&'a Expression> = body.expressions.iter().collect();
        self.lower_statements(&statements)
    }

    /// Lower a statement sequence, dropping everything after a statement that
    /// cannot fall through.
    pub(super) fn lower_statements(&mut self, statements: &[&'a Expression]) -> Lowered {
        if statements.is_empty() {
            return (TypedExpr::nil(), CompletionSet::normal(Type::nil()));
        }

        let mut parts = Vec::with_capacity(statements.len());
        let mut completions = CompletionSet::normal(Type::nil());
        for (position, statement) in statements.iter().enumerate() {
            let (typed, statement_completions) = self.lower_expression(statement);
            completions = completions.then(statement_completions);
            parts.push(typed);

            if !completions.can_complete_normally() {
                let pruned = statements.len() - position - 1;
                if pruned > 0 {
                    tracing::trace!(
                        pruned,
                        line = statement.span.line,
                        "unreachable statements pruned"
                    );
                }
                break;
            }
        }

        let ty = completions.normal_type().cloned();
        (TypedExpr::sequence(parts, ty), completions)
    }

    pub(super) fn lower_expression(&mut self, expression: &'a Expression) -> Lowered {
        match &expression.kind {
            ExpressionKind::Literal(literal) => finish(
                TypedExprKind::Literal(literal.clone()),
                CompletionSet::normal(literal_type(literal)),
            ),
            ExpressionKind::Local(name) => {
                let (id, key) = self.resolve_local(name);
                // A read that may run before any assignment can observe nil.
                if !self.assigned.contains(&key) {
                    merge_into(&mut self.tables.vars, key.clone(), &Type::nil());
                }
                let ty = self
                    .tables
                    .vars
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(Type::nil);
                finish(TypedExprKind::Local(id), CompletionSet::normal(ty))
            }
            ExpressionKind::InstanceVar(name) => self.lower_instance_var(expression, name),
            ExpressionKind::Global(name) => {
                let ty = self
                    .tables
                    .globals
                    .get(name)
                    .cloned()
                    .unwrap_or_else(Type::nil);
                finish(
                    TypedExprKind::Global(name.clone()),
                    CompletionSet::normal(ty),
                )
            }
            ExpressionKind::Constant(name) => self.lower_constant(expression, name),
            ExpressionKind::SelfRef => {
                let activation = self.activation();
                let ty = activation.self_type.clone();
                finish(
                    TypedExprKind::Local(activation.self_local),
                    CompletionSet::normal(ty),
                )
            }
            ExpressionKind::Assignment(assignment) => {
                self.lower_assignment(expression, assignment)
            }
            ExpressionKind::Call(call) => self.lower_call(expression, call),
            ExpressionKind::Yield(yield_expr) => self.lower_yield(expression, yield_expr),
            ExpressionKind::Return(return_expr) => {
                self.lower_exit(expression, return_expr.value.as_deref(), "return")
            }
            ExpressionKind::Break(break_expr) => {
                self.lower_exit(expression, break_expr.value.as_deref(), "break")
            }
            ExpressionKind::Conditional(conditional) => self.lower_conditional(conditional),
            ExpressionKind::While(while_expr) => self.lower_while(expression, while_expr),
            ExpressionKind::Logical(logical) => self.lower_logical(logical),
            ExpressionKind::Not(operand) => {
                let (operand, operand_completions) = self.lower_expression(operand);
                if !operand_completions.can_complete_normally() {
                    return (operand, operand_completions);
                }
                let mut completions = operand_completions.without_normal();
                completions.add(Completion::Normal(Type::bool()));
                finish(TypedExprKind::Not(Box::new(operand)), completions)
            }
            // Definitions are collected into the program index up front.
            ExpressionKind::Function(_) | ExpressionKind::Class(_) | ExpressionKind::Lib(_) => {
                (TypedExpr::nil(), CompletionSet::normal(Type::nil()))
            }
        }
    }

    fn lower_instance_var(&mut self, expression: &Expression, name: &str) -> Lowered {
        let Some(class) = self.self_class() else {
            return self.failed(AnalysisError::InstanceVariableOutsideObject {
                name: name.to_string(),
                span: expression.span,
            });
        };
        let ty = match self
            .tables
            .layouts
            .get(&class)
            .and_then(|layout| layout.var(name))
        {
            Some(ty) => self.expand(ty),
            None => Type::nil(),
        };
        finish(
            TypedExprKind::InstanceVar {
                object: self.activation().self_local,
                name: name.to_string(),
            },
            CompletionSet::normal(ty),
        )
    }

    fn lower_constant(&mut self, expression: &Expression, name: &str) -> Lowered {
        if self.program.has_class(name) || self.program.is_lib(name) {
            return finish(
                TypedExprKind::ClassRef(name.to_string()),
                CompletionSet::normal(Type::class(name)),
            );
        }
        if self.program.is_constant(name) {
            let ty = self
                .tables
                .constants
                .get(name)
                .cloned()
                .unwrap_or_else(Type::nil);
            return finish(
                TypedExprKind::Constant(name.to_string()),
                CompletionSet::normal(ty),
            );
        }
        self.failed(AnalysisError::UndefinedConstant {
            name: name.to_string(),
            span: expression.span,
        })
    }

    fn lower_assignment(
        &mut self,
        expression: &'a Expression,
        assignment: &'a AssignmentExpression,
    ) -> Lowered {
        let (value, completions) = self.lower_expression(&assignment.value);
        let Some(ty) = completions.normal_type().cloned() else {
            return (value, completions);
        };
        let value = Box::new(value);

        let kind = match &assignment.target {
            AssignTarget::Local(name) => {
                let (local, key) = self.resolve_local(name);
                merge_into(&mut self.tables.vars, key.clone(), &ty);
                self.assigned.insert(key);
                TypedExprKind::Assign { local, value }
            }
            AssignTarget::InstanceVar(name) => {
                let Some(class) = self.self_class() else {
                    return self.failed(AnalysisError::InstanceVariableOutsideObject {
                        name: name.clone(),
                        span: expression.span,
                    });
                };
                self.merge_layout(&class, name, &ty);
                TypedExprKind::AssignInstanceVar {
                    object: self.activation().self_local,
                    name: name.clone(),
                    value,
                }
            }
            AssignTarget::Global(name) => {
                merge_into(&mut self.tables.globals, name.clone(), &ty);
                TypedExprKind::AssignGlobal {
                    name: name.clone(),
                    value,
                }
            }
            AssignTarget::Constant(name) => {
                merge_into(&mut self.tables.constants, name.clone(), &ty);
                TypedExprKind::AssignConstant {
                    name: name.clone(),
                    value,
                }
            }
        };
        finish(kind, completions)
    }

    fn lower_exit(
        &mut self,
        expression: &'a Expression,
        value: Option<&'a Expression>,
        keyword: &'static str,
    ) -> Lowered {
        let (value, value_completions) = match value {
            Some(value) => self.lower_expression(value),
            None => (TypedExpr::nil(), CompletionSet::normal(Type::nil())),
        };
        let Some(ty) = value_completions.normal_type().cloned() else {
            return (value, value_completions);
        };

        let target = self
            .exits
            .target_of(expression.id)
            .and_then(|lexical| self.runtime_target(lexical));
        let mut completions = value_completions.without_normal();
        let value = Box::new(value);
        let kind = match target {
            Some(RuntimeTarget::Frame(frame)) => {
                completions.add(Completion::Return { target: frame, ty });
                TypedExprKind::Return {
                    target: frame,
                    value,
                }
            }
            Some(RuntimeTarget::Break(target)) => {
                completions.add(Completion::Break { target, ty });
                TypedExprKind::Break { target, value }
            }
            None => {
                return self.failed(AnalysisError::UnresolvedExitTarget {
                    keyword,
                    span: expression.span,
                })
            }
        };
        finish(kind, completions)
    }

    fn lower_conditional(&mut self, conditional: &'a ConditionalExpression) -> Lowered {
        let (condition, condition_completions) = self.lower_expression(&conditional.condition);
        if !condition_completions.can_complete_normally() {
            return (condition, condition_completions);
        }

        let before = self.assigned.clone();
        let consequent = self.lower_body(&conditional.consequent);
        let after_consequent = std::mem::replace(&mut self.assigned, before.clone());
        let alternative = match &conditional.alternative {
            Some(body) => self.lower_body(body),
            None => (TypedExpr::nil(), CompletionSet::normal(Type::nil())),
        };
        let after_alternative = std::mem::take(&mut self.assigned);
        self.assigned = assigned_on_all_paths(
            before,
            vec![
                (consequent.1.can_complete_normally(), after_consequent),
                (alternative.1.can_complete_normally(), after_alternative),
            ],
        );
        let ((then_branch, then_completions), (else_branch, else_completions)) =
            match conditional.kind {
                ConditionalKind::If => (consequent, alternative),
                ConditionalKind::Unless => (alternative, consequent),
            };

        let completions = condition_completions
            .without_normal()
            .join(then_completions)
            .join(else_completions);
        finish(
            TypedExprKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            completions,
        )
    }

    fn lower_while(
        &mut self,
        expression: &'a Expression,
        while_expr: &'a WhileExpression,
    ) -> Lowered {
        let (condition, condition_completions) = self.lower_expression(&while_expr.condition);
        if !condition_completions.can_complete_normally() {
            return (condition, condition_completions);
        }

        // The body may run zero times, and breaks leave it from anywhere.
        let before = self.assigned.clone();
        let id = self.fresh_loop();
        self.push_binding(
            LexicalTarget::Loop(expression.id),
            RuntimeTarget::Break(BreakTarget::Loop(id)),
        );
        let (body, body_completions) = self.lower_body(&while_expr.body);
        self.pop_binding();
        self.assigned = before;

        let terminates = !while_expr.condition.is_true_literal();
        let completions = condition_completions
            .without_normal()
            .join(exit_through_loop(body_completions, id, terminates));
        finish(
            TypedExprKind::While {
                id,
                condition: Box::new(condition),
                body: Box::new(body),
            },
            completions,
        )
    }

    fn lower_logical(&mut self, logical: &'a LogicalExpression) -> Lowered {
        let (left, left_completions) = self.lower_expression(&logical.left);
        let Some(left_type) = left_completions.normal_type().cloned() else {
            return (left, left_completions);
        };
        let before = self.assigned.clone();
        let (right, right_completions) = self.lower_expression(&logical.right);
        self.assigned = before;

        // Short-circuiting yields the left value itself.
        let mut completions = left_completions.without_normal().join(right_completions);
        completions.merge_normal(Some(left_type));

        let (left, right) = (Box::new(left), Box::new(right));
        let kind = match logical.operator {
            LogicalOperator::And => TypedExprKind::And { left, right },
            LogicalOperator::Or => TypedExprKind::Or { left, right },
        };
        finish(kind, completions)
    }

    /// Class of `self` when it is an object that can hold instance variables.
    fn self_class(&self) -> Option<String> {
        match self.activation().self_type.single() {
            Some(Type::Object(object)) => Some(object.name.clone()),
            _ => None,
        }
    }
}

fn literal_type(literal: &Literal) -> Type {
    match literal {
        Literal::Integer(_) => Type::int(),
        Literal::Float(_) => Type::float(),
        Literal::String(_) => Type::string(),
        Literal::Char(_) => Type::char(),
        Literal::Boolean(_) => Type::bool(),
        Literal::Nil => Type::nil(),
    }
}
