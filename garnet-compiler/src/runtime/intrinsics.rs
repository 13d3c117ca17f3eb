use super::value::Value;
use super::RuntimeError;
use crate::stdlib::Intrinsic;

fn invalid(op: Intrinsic, receiver: &Value, arguments: &[Value]) -> RuntimeError {
    let operands = std::iter::once(receiver)
        .chain(arguments)
        .map(Value::class_name)
        .collect::<Vec<_>>()
        .join(", ");
    RuntimeError::InvalidOperands {
        op: format!("{op:?}"),
        operands,
    }
}

pub(super) fn apply(
    op: Intrinsic,
    receiver: &Value,
    arguments: &[Value],
) -> Result<Value, RuntimeError> {
    let argument = arguments.first();
    match op {
        Intrinsic::Add | Intrinsic::Sub | Intrinsic::Mul | Intrinsic::Div | Intrinsic::Mod => {
            let Some(argument) = argument else {
                return Err(invalid(op, receiver, arguments));
            };
            arithmetic(op, receiver, argument).ok_or_else(|| invalid(op, receiver, arguments))?
        }
        Intrinsic::Neg => match receiver {
            Value::Int(value) => Ok(Value::Int(value.wrapping_neg())),
            Value::Float(value) => Ok(Value::Float(-value)),
            _ => Err(invalid(op, receiver, arguments)),
        },
        Intrinsic::Lt | Intrinsic::Le | Intrinsic::Gt | Intrinsic::Ge => {
            let (Some(left), Some(right)) =
                (receiver.as_float(), argument.and_then(Value::as_float))
            else {
                return Err(invalid(op, receiver, arguments));
            };
            let result = match (receiver, argument) {
                (Value::Int(a), Some(Value::Int(b))) => compare(op, a, b),
                _ => compare(op, &left, &right),
            };
            Ok(Value::Bool(result))
        }
        Intrinsic::Eq => Ok(Value::Bool(argument == Some(receiver))),
        Intrinsic::Ne => Ok(Value::Bool(argument != Some(receiver))),
        Intrinsic::IsNil => Ok(Value::Bool(matches!(receiver, Value::Nil))),
        Intrinsic::ToI => match receiver {
            Value::Int(value) => Ok(Value::Int(*value)),
            Value::Float(value) => Ok(Value::Int(*value as i64)),
            Value::Nil => Ok(Value::Int(0)),
            _ => Err(invalid(op, receiver, arguments)),
        },
        Intrinsic::ToF => receiver
            .as_float()
            .map(Value::Float)
            .ok_or_else(|| invalid(op, receiver, arguments)),
        Intrinsic::Concat => match (receiver, argument) {
            (Value::String(left), Some(Value::String(right))) => {
                Ok(Value::String(format!("{left}{right}")))
            }
            _ => Err(invalid(op, receiver, arguments)),
        },
    }
}

fn compare<T: PartialOrd>(op: Intrinsic, left: &T, right: &T) -> bool {
    match op {
        Intrinsic::Lt => left < right,
        Intrinsic::Le => left <= right,
        Intrinsic::Gt => left > right,
        _ => left >= right,
    }
}

/// `None` when the operands are not numbers.
fn arithmetic(op: Intrinsic, left: &Value, right: &Value) -> Option<Result<Value, RuntimeError>> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let result = match op {
            Intrinsic::Add => Ok(a.wrapping_add(b)),
            Intrinsic::Sub => Ok(a.wrapping_sub(b)),
            Intrinsic::Mul => Ok(a.wrapping_mul(b)),
            Intrinsic::Div => a.checked_div(b).ok_or(RuntimeError::DivisionByZero),
            _ => a.checked_rem(b).ok_or(RuntimeError::DivisionByZero),
        };
        return Some(result.map(Value::Int));
    }

    let (a, b) = (left.as_float()?, right.as_float()?);
    let result = match op {
        Intrinsic::Add => a + b,
        Intrinsic::Sub => a - b,
        Intrinsic::Mul => a * b,
        Intrinsic::Div => a / b,
        _ => a % b,
    };
    Some(Ok(Value::Float(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        let sum = apply(Intrinsic::Add, &Value::Int(2), &[Value::Int(3)]).unwrap();
        assert_eq!(sum.as_int(), Some(5));
        let mixed = apply(Intrinsic::Mul, &Value::Int(2), &[Value::Float(1.5)]).unwrap();
        assert!(matches!(mixed, Value::Float(value) if value == 3.0));
    }

    #[test]
    fn integer_division_by_zero_fails() {
        assert_eq!(
            apply(Intrinsic::Div, &Value::Int(1), &[Value::Int(0)]),
            Err(RuntimeError::DivisionByZero)
        );
    }

    #[test]
    fn comparisons_and_conversions() {
        assert_eq!(
            apply(Intrinsic::Lt, &Value::Int(1), &[Value::Float(1.5)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply(Intrinsic::ToI, &Value::Nil, &[]).unwrap(),
            Value::Int(0)
        );
        assert!(apply(Intrinsic::Lt, &Value::Nil, &[Value::Int(1)]).is_err());
    }
}
