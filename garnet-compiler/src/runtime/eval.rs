use std::collections::HashMap;

use super::intrinsics;
use super::value::Value;
use super::RuntimeError;
use crate::ast::Literal;
use crate::completion::{BreakTarget, FrameId};
use crate::ir::{LocalId, TypedExpr, TypedExprKind, TypedMethod, TypedMethodId, TypedProgram};
use crate::types::{SimpleType, Type};

/// Non-local control transfer while evaluating.
enum Unwind {
    Return { frame: FrameId, value: Value },
    Break { target: BreakTarget, value: Value },
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error)
    }
}

type Flow<T> = Result<T, Unwind>;

/// Slots of one method invocation. Inline expansions and blocks run in the
/// frame of the method they were expanded into.
struct Frame {
    slots: Vec<Value>,
}

impl Frame {
    fn for_method(method: &TypedMethod) -> Self {
        Self {
            slots: vec![Value::Nil; method.locals.len()],
        }
    }

    fn get(&self, id: LocalId) -> Value {
        self.slots
            .get(id.0 as usize)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    fn set(&mut self, id: LocalId, value: Value) {
        let index = id.0 as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Value::Nil);
        }
        self.slots[index] = value;
    }
}

pub struct Evaluator<'p> {
    program: &'p TypedProgram,
    globals: HashMap<String, Value>,
    constants: HashMap<String, Value>,
}

impl<'p> Evaluator<'p> {
    pub fn new(program: &'p TypedProgram) -> Self {
        Self {
            program,
            globals: HashMap::new(),
            constants: HashMap::new(),
        }
    }

    /// Run the top-level body and return its value.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let program = self.program;
        match self.invoke(&program.main, Value::Main, Vec::new()) {
            Ok(value) => Ok(value),
            Err(Unwind::Error(error)) => Err(error),
            Err(Unwind::Return { .. }) => Err(RuntimeError::EscapedUnwind { keyword: "return" }),
            Err(Unwind::Break { .. }) => Err(RuntimeError::EscapedUnwind { keyword: "break" }),
        }
    }

    fn invoke(
        &mut self,
        method: &'p TypedMethod,
        receiver: Value,
        arguments: Vec<Value>,
    ) -> Flow<Value> {
        let mut frame = Frame::for_method(method);
        frame.set(method.self_local, receiver);
        for (parameter, argument) in method.parameters.iter().zip(arguments) {
            frame.set(*parameter, argument);
        }
        match self.eval(&mut frame, &method.body) {
            Err(Unwind::Return {
                frame: target,
                value,
            }) if target == method.frame => Ok(value),
            other => other,
        }
    }

    fn method(&self, id: TypedMethodId) -> Flow<&'p TypedMethod> {
        self.program
            .method(id)
            .ok_or(Unwind::Error(RuntimeError::UnknownMethod(id.0)))
    }

    fn eval_all(&mut self, frame: &mut Frame, expressions: &'p [TypedExpr]) -> Flow<Vec<Value>> {
        expressions
            .iter()
            .map(|expression| self.eval(frame, expression))
            .collect()
    }

    fn eval(&mut self, frame: &mut Frame, expression: &'p TypedExpr) -> Flow<Value> {
        match &expression.kind {
            TypedExprKind::Literal(literal) => Ok(literal_value(literal)),
            TypedExprKind::Local(id) => Ok(frame.get(*id)),
            TypedExprKind::Assign { local, value } => {
                let value = self.eval(frame, value)?;
                frame.set(*local, value.clone());
                Ok(value)
            }
            TypedExprKind::InstanceVar { object, name } => {
                Ok(frame.get(*object).ivar(name).unwrap_or(Value::Nil))
            }
            TypedExprKind::AssignInstanceVar {
                object,
                name,
                value,
            } => {
                let value = self.eval(frame, value)?;
                if let Value::Object(target) = frame.get(*object) {
                    let mut object = target.borrow_mut();
                    object.ivars.insert(name.clone(), value.clone());
                }
                Ok(value)
            }
            TypedExprKind::Global(name) => {
                Ok(self.globals.get(name).cloned().unwrap_or(Value::Nil))
            }
            TypedExprKind::AssignGlobal { name, value } => {
                let value = self.eval(frame, value)?;
                self.globals.insert(name.clone(), value.clone());
                Ok(value)
            }
            TypedExprKind::Constant(name) => {
                Ok(self.constants.get(name).cloned().unwrap_or(Value::Nil))
            }
            TypedExprKind::AssignConstant { name, value } => {
                let value = self.eval(frame, value)?;
                self.constants.insert(name.clone(), value.clone());
                Ok(value)
            }
            TypedExprKind::ClassRef(name) => Ok(Value::Class(name.clone())),
            TypedExprKind::MainObject => Ok(Value::Main),
            TypedExprKind::Sequence(parts) => {
                let mut last = Value::Nil;
                for part in parts {
                    last = self.eval(frame, part)?;
                }
                Ok(last)
            }
            TypedExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(frame, condition)?.is_truthy() {
                    self.eval(frame, then_branch)
                } else {
                    self.eval(frame, else_branch)
                }
            }
            TypedExprKind::While {
                id,
                condition,
                body,
            } => {
                while self.eval(frame, condition)?.is_truthy() {
                    match self.eval(frame, body) {
                        Ok(_) => {}
                        Err(Unwind::Break {
                            target: BreakTarget::Loop(target),
                            value,
                        }) if target == *id => return Ok(value),
                        Err(unwind) => return Err(unwind),
                    }
                }
                Ok(Value::Nil)
            }
            TypedExprKind::And { left, right } => {
                let left = self.eval(frame, left)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.eval(frame, right)
            }
            TypedExprKind::Or { left, right } => {
                let left = self.eval(frame, left)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.eval(frame, right)
            }
            TypedExprKind::Not(operand) => {
                Ok(Value::Bool(!self.eval(frame, operand)?.is_truthy()))
            }
            TypedExprKind::Call {
                method,
                receiver,
                arguments,
            } => {
                let receiver = self.eval(frame, receiver)?;
                let arguments = self.eval_all(frame, arguments)?;
                let method = self.method(*method)?;
                self.invoke(method, receiver, arguments)
            }
            TypedExprKind::Intrinsic {
                op,
                receiver,
                arguments,
            } => {
                let receiver = self.eval(frame, receiver)?;
                let arguments = self.eval_all(frame, arguments)?;
                Ok(intrinsics::apply(*op, &receiver, &arguments)?)
            }
            TypedExprKind::New {
                class,
                initializer,
                arguments,
            } => {
                let arguments = self.eval_all(frame, arguments)?;
                let object = Value::object(class.clone());
                if let Some(initializer) = initializer {
                    let method = self.method(*initializer)?;
                    self.invoke(method, object.clone(), arguments)?;
                }
                Ok(object)
            }
            TypedExprKind::Extern {
                lib,
                name,
                arguments,
            } => {
                self.eval_all(frame, arguments)?;
                Err(RuntimeError::ExternCall {
                    lib: lib.clone(),
                    name: name.clone(),
                }
                .into())
            }
            TypedExprKind::Inline(call) => {
                let receiver = self.eval(frame, &call.receiver)?;
                let arguments = self.eval_all(frame, &call.arguments)?;
                for local in &call.locals {
                    frame.set(*local, Value::Nil);
                }
                frame.set(call.self_local, receiver);
                for (parameter, argument) in call.parameters.iter().zip(arguments) {
                    frame.set(*parameter, argument);
                }
                match self.eval(frame, &call.body) {
                    Err(Unwind::Return {
                        frame: target,
                        value,
                    }) if target == call.frame => Ok(value),
                    Err(Unwind::Break {
                        target: BreakTarget::Call(site),
                        value,
                    }) if site == call.site => Ok(value),
                    other => other,
                }
            }
            TypedExprKind::Yield {
                parameters,
                locals,
                arguments,
                body,
            } => {
                let mut arguments = self.eval_all(frame, arguments)?.into_iter();
                for local in locals {
                    frame.set(*local, Value::Nil);
                }
                for parameter in parameters {
                    let argument = arguments.next().unwrap_or(Value::Nil);
                    frame.set(*parameter, argument);
                }
                self.eval(frame, body)
            }
            TypedExprKind::Dispatch {
                scrutinees,
                temps,
                arms,
            } => {
                let values = self.eval_all(frame, scrutinees)?;
                for (temp, value) in temps.iter().zip(&values) {
                    frame.set(*temp, value.clone());
                }
                let arm = arms.iter().find(|arm| {
                    arm.types
                        .iter()
                        .zip(&values)
                        .all(|(ty, value)| matches_type(ty, value))
                });
                match arm {
                    Some(arm) => self.eval(frame, &arm.body),
                    None => {
                        let classes = values
                            .iter()
                            .map(Value::class_name)
                            .collect::<Vec<_>>()
                            .join(", ");
                        Err(RuntimeError::NoMatchingArm { classes }.into())
                    }
                }
            }
            TypedExprKind::Return { target, value } => {
                let value = self.eval(frame, value)?;
                Err(Unwind::Return {
                    frame: *target,
                    value,
                })
            }
            TypedExprKind::Break { target, value } => {
                let value = self.eval(frame, value)?;
                Err(Unwind::Break {
                    target: *target,
                    value,
                })
            }
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Integer(value) => Value::Int(*value),
        Literal::Float(value) => Value::Float(*value),
        Literal::String(value) => Value::String(value.clone()),
        Literal::Char(value) => Value::Char(*value),
        Literal::Boolean(value) => Value::Bool(*value),
        Literal::Nil => Value::Nil,
    }
}

/// Whether `value` is an instance of the single type `ty`.
fn matches_type(ty: &Type, value: &Value) -> bool {
    match (ty, value) {
        (Type::Simple(SimpleType::Class(name)), Value::Class(class)) => name == class,
        (Type::Object(object), Value::Object(instance)) => object.name == instance.borrow().class,
        (Type::Simple(simple), value) => simple.class_name() == value.class_name(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DispatchArm, LocalSlot};
    use crate::stdlib::Intrinsic;

    fn literal(value: i64) -> TypedExpr {
        TypedExpr::new(
            TypedExprKind::Literal(Literal::Integer(value)),
            Some(Type::int()),
        )
    }

    fn main_with(body: TypedExpr, locals: usize) -> TypedProgram {
        TypedProgram {
            main: TypedMethod {
                id: TypedMethodId::MAIN,
                name: "main".into(),
                owner: None,
                self_type: Type::main(),
                self_local: LocalId(0),
                parameters: Vec::new(),
                locals: (0..locals)
                    .map(|index| LocalSlot {
                        id: LocalId(index as u32),
                        name: format!("l{index}"),
                        ty: None,
                        captured: false,
                    })
                    .collect(),
                body,
                return_type: Some(Type::int()),
                frame: FrameId(0),
            },
            methods: Vec::new(),
            captures: Vec::new(),
            layouts: Vec::new(),
        }
    }

    #[test]
    fn loop_break_carries_its_value() {
        let body = TypedExpr::new(
            TypedExprKind::While {
                id: crate::completion::LoopId(0),
                condition: Box::new(TypedExpr::new(
                    TypedExprKind::Literal(Literal::Boolean(true)),
                    Some(Type::bool()),
                )),
                body: Box::new(TypedExpr::new(
                    TypedExprKind::Break {
                        target: BreakTarget::Loop(crate::completion::LoopId(0)),
                        value: Box::new(literal(7)),
                    },
                    None,
                )),
            },
            Some(Type::int()),
        );
        let program = main_with(body, 1);
        assert_eq!(Evaluator::new(&program).run().unwrap(), Value::Int(7));
    }

    #[test]
    fn dispatch_selects_arm_by_runtime_class() {
        let scrutinee = TypedExpr::new(
            TypedExprKind::Literal(Literal::Float(1.5)),
            Some(Type::int().union_with(&Type::float())),
        );
        let arm = |ty: Type, value: i64| DispatchArm {
            types: vec![ty],
            body: literal(value),
        };
        let body = TypedExpr::new(
            TypedExprKind::Dispatch {
                scrutinees: vec![scrutinee],
                temps: vec![LocalId(1)],
                arms: vec![arm(Type::int(), 1), arm(Type::float(), 2)],
            },
            Some(Type::int()),
        );
        let program = main_with(body, 2);
        assert_eq!(Evaluator::new(&program).run().unwrap(), Value::Int(2));
    }

    #[test]
    fn intrinsic_errors_surface() {
        let body = TypedExpr::new(
            TypedExprKind::Intrinsic {
                op: Intrinsic::Div,
                receiver: Box::new(literal(1)),
                arguments: vec![literal(0)],
            },
            Some(Type::int()),
        );
        let program = main_with(body, 1);
        assert_eq!(
            Evaluator::new(&program).run(),
            Err(RuntimeError::DivisionByZero)
        );
    }
}
