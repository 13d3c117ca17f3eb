use crate::ast::{Block, CallExpression, Expression, YieldExpression};
use crate::completion::{BreakTarget, CompletionSet};
use crate::dispatch::{self, expand_arms, CallShape, Callee};
use crate::error::AnalysisError;
use crate::exits::{exit_through_call, LexicalTarget};
use crate::ir::{DispatchArm, InlineCall, LocalId, TypedExpr, TypedExprKind};
use crate::program::{ExternInfo, MethodInfo};
use crate::types::Type;

use super::{
    assigned_on_all_paths, finish, merge_into, Activation, Analyzer, BlockRef, InstanceKey,
    Lowered, RuntimeTarget, ScopeStep,
};

#[derive(Clone, Copy)]
struct CallContext<'a> {
    expression: &'a Expression,
    call: &'a CallExpression,
    implicit: bool,
}

impl<'a> Analyzer<'a> {
    pub(super) fn lower_call(
        &mut self,
        expression: &'a Expression,
        call: &'a CallExpression,
    ) -> Lowered {
        let operands: Vec<&'a Expression> = call
            .receiver
            .as_deref()
            .into_iter()
            .chain(call.arguments.iter())
            .collect();
        let (mut parts, completions) = match self.lower_operands(&operands) {
            Ok(lowered) => lowered,
            Err(pruned) => return pruned,
        };

        let implicit = call.receiver.is_none();
        if implicit {
            let activation = self.activation();
            let receiver =
                TypedExpr::local(activation.self_local, Some(activation.self_type.clone()));
            parts.insert(0, receiver);
        }
        let types: Vec<Type> = parts.iter().filter_map(|part| part.ty.clone()).collect();

        let context = CallContext {
            expression,
            call,
            implicit,
        };
        let (typed, call_completions) = self.lower_dispatch(context, parts, types);
        (typed, completions.then(call_completions))
    }

    /// Lower `operands` left to right. When one of them cannot complete, the
    /// evaluated prefix is returned as the whole expression instead.
    fn lower_operands(
        &mut self,
        operands: &[&'a Expression],
    ) -> Result<(Vec<TypedExpr>, CompletionSet), Lowered> {
        let mut parts = Vec::with_capacity(operands.len() + 1);
        let mut completions = CompletionSet::normal(Type::nil());
        for (position, operand) in operands.iter().enumerate() {
            let (typed, operand_completions) = self.lower_expression(operand);
            completions = completions.then(operand_completions);
            parts.push(typed);
            if !completions.can_complete_normally() {
                tracing::trace!(
                    pruned = operands.len() - position - 1,
                    line = operand.span.line,
                    "call abandoned after a diverging operand"
                );
                return Err((TypedExpr::sequence(parts, None), completions));
            }
        }
        Ok((parts, completions))
    }

    fn lower_dispatch(
        &mut self,
        context: CallContext<'a>,
        operands: Vec<TypedExpr>,
        types: Vec<Type>,
    ) -> Lowered {
        if !types.iter().any(Type::is_union) {
            return self.lower_call_arm(context, operands, types);
        }

        let call = context.call;
        let arms = match expand_arms(&types, self.options.max_dispatch_arms) {
            Ok(arms) => arms,
            Err(arms) => {
                return self.failed(AnalysisError::TooManyDispatchArms {
                    name: call.name.clone(),
                    arms,
                    limit: self.options.max_dispatch_arms,
                    span: call.name_span,
                })
            }
        };
        tracing::trace!(
            name = %call.name,
            arms = arms.len(),
            "union call split into dispatch arms"
        );

        let temps: Vec<LocalId> = types
            .iter()
            .map(|ty| self.builder().temp(ty.clone()))
            .collect();
        let before = self.assigned.clone();
        let mut outcomes = Vec::with_capacity(arms.len());
        let mut completions = CompletionSet::never();
        let mut lowered = Vec::with_capacity(arms.len());
        for arm in arms {
            self.assigned = before.clone();
            let arm_operands = temps
                .iter()
                .zip(&arm)
                .map(|(temp, ty)| TypedExpr::local(*temp, Some(ty.clone())))
                .collect();
            let (body, arm_completions) = self.lower_call_arm(context, arm_operands, arm.clone());
            outcomes.push((
                arm_completions.can_complete_normally(),
                std::mem::take(&mut self.assigned),
            ));
            completions = completions.join(arm_completions);
            lowered.push(DispatchArm { types: arm, body });
        }
        self.assigned = assigned_on_all_paths(before, outcomes);

        finish(
            TypedExprKind::Dispatch {
                scrutinees: operands,
                temps,
                arms: lowered,
            },
            completions,
        )
    }

    /// Lower a call whose receiver and argument types are all single types.
    fn lower_call_arm(
        &mut self,
        context: CallContext<'a>,
        operands: Vec<TypedExpr>,
        types: Vec<Type>,
    ) -> Lowered {
        let call = context.call;
        let Some((receiver_type, argument_types)) = types.split_first() else {
            return self.failed(AnalysisError::UndefinedMethod {
                receiver: Type::nil().to_string(),
                name: call.name.clone(),
                arity: 0,
                span: call.name_span,
            });
        };
        let shape = CallShape {
            receiver: receiver_type,
            name: &call.name,
            arguments: argument_types,
            has_block: call.block.is_some(),
            implicit_receiver: context.implicit,
        };
        let program = self.program;
        let undefined = || AnalysisError::UndefinedMethod {
            receiver: receiver_type.to_string(),
            name: call.name.clone(),
            arity: argument_types.len(),
            span: call.name_span,
        };
        let Some(callee) = dispatch::lookup(program, shape) else {
            return self.failed(undefined());
        };

        let mut operands = operands.into_iter();
        let receiver = operands.next().unwrap_or_else(TypedExpr::nil);
        let arguments: Vec<TypedExpr> = operands.collect();

        match callee {
            Callee::Intrinsic(op) => {
                let ty = op.result_type(receiver_type, argument_types);
                finish(
                    TypedExprKind::Intrinsic {
                        op,
                        receiver: Box::new(receiver),
                        arguments,
                    },
                    CompletionSet::normal(ty),
                )
            }
            Callee::New { class } => self.lower_new(context, class, arguments, argument_types),
            Callee::Extern { lib, name } => {
                let completions = program
                    .extern_function(&lib, &name)
                    .and_then(ExternInfo::result_type)
                    .map_or_else(CompletionSet::never, CompletionSet::normal);
                finish(
                    TypedExprKind::Extern {
                        lib,
                        name,
                        arguments,
                    },
                    completions,
                )
            }
            Callee::Method(id) => {
                let Some(method) = program.method(id) else {
                    return self.failed(undefined());
                };
                // Top-level functions always run with the main object as `self`.
                let (self_type, receiver) = match method.owner {
                    Some(_) => (receiver_type.clone(), receiver),
                    None => (
                        Type::main(),
                        TypedExpr::new(TypedExprKind::MainObject, Some(Type::main())),
                    ),
                };
                let key = InstanceKey {
                    method: id,
                    self_type,
                    arguments: argument_types.to_vec(),
                };
                if method.yields {
                    return match &call.block {
                        Some(block) => {
                            self.inline_call(context, method, key, block, receiver, arguments)
                        }
                        None => self.failed(AnalysisError::MissingBlock {
                            name: method.qualified_name(),
                            span: call.name_span,
                        }),
                    };
                }

                let typed = self.instantiate(key.clone());
                let completions = self
                    .instance_type(&key)
                    .map_or_else(CompletionSet::never, CompletionSet::normal);
                finish(
                    TypedExprKind::Call {
                        method: typed,
                        receiver: Box::new(receiver),
                        arguments,
                    },
                    completions,
                )
            }
        }
    }

    /// `Class.new(args)`: allocate and run the non-yielding `initialize` that
    /// matches the arguments. The result reflects the layout after it ran.
    fn lower_new(
        &mut self,
        context: CallContext<'a>,
        class: String,
        arguments: Vec<TypedExpr>,
        argument_types: &[Type],
    ) -> Lowered {
        let object = self.object_type(&class);
        let shape = CallShape {
            receiver: &object,
            name: "initialize",
            arguments: argument_types,
            has_block: false,
            implicit_receiver: false,
        };
        let program = self.program;
        let initializer = match dispatch::lookup(program, shape) {
            Some(Callee::Method(id)) if program.method(id).is_some_and(|method| !method.yields) => {
                Some(id)
            }
            _ => None,
        };

        let initializer = match initializer {
            Some(id) => {
                let key = InstanceKey {
                    method: id,
                    self_type: object.clone(),
                    arguments: argument_types.to_vec(),
                };
                let typed = self.instantiate(key.clone());
                if self.instance_type(&key).is_none() {
                    return finish(
                        TypedExprKind::New {
                            class,
                            initializer: Some(typed),
                            arguments,
                        },
                        CompletionSet::never(),
                    );
                }
                Some(typed)
            }
            None if !arguments.is_empty() => {
                return self.failed(AnalysisError::UndefinedMethod {
                    receiver: object.to_string(),
                    name: "initialize".to_string(),
                    arity: arguments.len(),
                    span: context.call.name_span,
                })
            }
            None => None,
        };

        let ty = self.object_type(&class);
        finish(
            TypedExprKind::New {
                class,
                initializer,
                arguments,
            },
            CompletionSet::normal(ty),
        )
    }

    /// Expand a yielding method at its call site. The expansion shares the
    /// caller's frame; its own `return`s and the block's `break`s end the call.
    fn inline_call(
        &mut self,
        context: CallContext<'a>,
        method: &'a MethodInfo,
        key: InstanceKey,
        block: &'a Block,
        receiver: TypedExpr,
        arguments: Vec<TypedExpr>,
    ) -> Lowered {
        let name = method.qualified_name();
        if self.inline_depth >= self.options.max_inline_depth {
            return self.failed(AnalysisError::InlineDepthExceeded {
                name,
                limit: self.options.max_inline_depth,
                span: context.call.name_span,
            });
        }

        let site = self.fresh_site();
        let frame = self.fresh_frame();
        let definer = self.current();
        let mut path = self.activation().path.clone();
        path.push(ScopeStep::Inline {
            site: context.expression.id,
            key: key.clone(),
        });
        let inline_path = path.clone();
        let before = self.assigned.clone();
        self.forget_assigned(&inline_path);
        let self_local = self.declare_self(&path, key.self_type.clone());
        let parameters = self.bind_parameters(&path, &method.definition, &key.arguments);
        self.activations.push(Activation {
            path,
            method_name: name.clone(),
            self_type: key.self_type.clone(),
            self_local,
            block: Some(BlockRef {
                block,
                site,
                definer,
            }),
            lexical_block: None,
            parent: None,
            bindings: vec![(
                LexicalTarget::Method(method.definition.id),
                RuntimeTarget::Frame(frame),
            )],
        });

        self.inline_depth += 1;
        let (body, body_completions) = self.lower_body(&method.definition.body);
        self.inline_depth -= 1;
        self.activations.pop();
        let locals = self.builder().slots_under(&inline_path);

        tracing::trace!(
            method = %name,
            site = site.0,
            depth = self.inline_depth,
            "yielding call inlined"
        );
        let break_type = body_completions.break_type(BreakTarget::Call(site)).cloned();
        let return_type = body_completions.return_type(frame).cloned();
        // Leaving early through a break or return skips assignments further on.
        if break_type.is_some() || return_type.is_some() {
            self.assigned = before;
        }
        let completions = exit_through_call(body_completions, site, frame);

        finish(
            TypedExprKind::Inline(Box::new(InlineCall {
                site,
                frame,
                name,
                self_local,
                receiver,
                parameters,
                locals,
                arguments,
                body,
                break_type,
                return_type,
            })),
            completions,
        )
    }

    /// Run the block of the innermost expanded method. The block body is
    /// lowered in the scope it was written in.
    pub(super) fn lower_yield(
        &mut self,
        expression: &'a Expression,
        yield_expr: &'a YieldExpression,
    ) -> Lowered {
        let operands: Vec<&'a Expression> = yield_expr.arguments.iter().collect();
        let (arguments, completions) = match self.lower_operands(&operands) {
            Ok(lowered) => lowered,
            Err(pruned) => return pruned,
        };

        // Blocks written inside the method body yield to the method's own block.
        let mut index = self.current();
        while let Some(activation) = self.activations.get(index) {
            match (activation.lexical_block, activation.parent) {
                (Some(_), Some(parent)) => index = parent,
                _ => break,
            }
        }
        let Some(owner) = self.activations.get(index) else {
            return self.failed(AnalysisError::YieldOutsideMethod {
                span: expression.span,
            });
        };
        let Some(BlockRef {
            block,
            site,
            definer,
        }) = owner.block
        else {
            let name = owner.method_name.clone();
            return self.failed(AnalysisError::MissingBlock {
                name,
                span: expression.span,
            });
        };

        let definer_activation = &self.activations[definer];
        let method_name = definer_activation.method_name.clone();
        let self_type = definer_activation.self_type.clone();
        let self_local = definer_activation.self_local;
        let mut path = definer_activation.path.clone();
        path.push(ScopeStep::Block(block.id));
        self.forget_assigned(&path);

        // Missing arguments bind nil; extra ones are evaluated and dropped.
        let parameters: Vec<LocalId> = block
            .parameters
            .iter()
            .enumerate()
            .map(|(position, parameter)| {
                let ty = arguments
                    .get(position)
                    .and_then(|argument| argument.ty.clone())
                    .unwrap_or_else(Type::nil);
                let key = (path.clone(), parameter.name.clone());
                merge_into(&mut self.tables.vars, key.clone(), &ty);
                self.assigned.insert(key.clone());
                self.builder().slot(key)
            })
            .collect();

        let block_path = path.clone();
        self.activations.push(Activation {
            path,
            method_name,
            self_type,
            self_local,
            block: None,
            lexical_block: Some(block.id),
            parent: Some(definer),
            bindings: vec![(
                LexicalTarget::Block(block.id),
                RuntimeTarget::Break(BreakTarget::Call(site)),
            )],
        });
        let (body, body_completions) = self.lower_body(&block.body);
        self.activations.pop();
        let locals = self.builder().slots_under(&block_path);

        finish(
            TypedExprKind::Yield {
                parameters,
                locals,
                arguments,
                body: Box::new(body),
            },
            completions.then(body_completions),
        )
    }
}
