mod prelude;

use serde::Serialize;

use crate::types::Type;

pub use prelude::PRELUDE;

/// Primitive operations the backend provides directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Intrinsic {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    ToI,
    ToF,
    IsNil,
    Concat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operand {
    Any,
    Numeric,
    Nil,
    String,
}

impl Operand {
    fn admits(self, ty: &Type) -> bool {
        match self {
            Operand::Any => true,
            Operand::Numeric => matches!(ty.class_name(), Some("Int" | "Float")),
            Operand::Nil => ty.is_nil(),
            Operand::String => ty.class_name() == Some("String"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct IntrinsicSignature {
    name: &'static str,
    intrinsic: Intrinsic,
    receiver: Operand,
    params: &'static [Operand],
}

const fn signature(
    name: &'static str,
    intrinsic: Intrinsic,
    receiver: Operand,
    params: &'static [Operand],
) -> IntrinsicSignature {
    IntrinsicSignature {
        name,
        intrinsic,
        receiver,
        params,
    }
}

const INTRINSICS: &[IntrinsicSignature] = &[
    signature("+", Intrinsic::Add, Operand::Numeric, &[Operand::Numeric]),
    signature("-", Intrinsic::Sub, Operand::Numeric, &[Operand::Numeric]),
    signature("*", Intrinsic::Mul, Operand::Numeric, &[Operand::Numeric]),
    signature("/", Intrinsic::Div, Operand::Numeric, &[Operand::Numeric]),
    signature("%", Intrinsic::Mod, Operand::Numeric, &[Operand::Numeric]),
    signature("-", Intrinsic::Neg, Operand::Numeric, &[]),
    signature("<", Intrinsic::Lt, Operand::Numeric, &[Operand::Numeric]),
    signature("<=", Intrinsic::Le, Operand::Numeric, &[Operand::Numeric]),
    signature(">", Intrinsic::Gt, Operand::Numeric, &[Operand::Numeric]),
    signature(">=", Intrinsic::Ge, Operand::Numeric, &[Operand::Numeric]),
    signature("to_i", Intrinsic::ToI, Operand::Numeric, &[]),
    signature("to_i", Intrinsic::ToI, Operand::Nil, &[]),
    signature("to_f", Intrinsic::ToF, Operand::Numeric, &[]),
    signature("+", Intrinsic::Concat, Operand::String, &[Operand::String]),
    signature("==", Intrinsic::Eq, Operand::Any, &[Operand::Any]),
    signature("!=", Intrinsic::Ne, Operand::Any, &[Operand::Any]),
    signature("nil?", Intrinsic::IsNil, Operand::Any, &[]),
];

impl Intrinsic {
    /// Intrinsic implementing `name` for single (non-union) operand types.
    pub fn resolve(receiver: &Type, name: &str, arguments: &[Type]) -> Option<Self> {
        INTRINSICS
            .iter()
            .find(|signature| {
                signature.name == name
                    && signature.params.len() == arguments.len()
                    && signature.receiver.admits(receiver)
                    && signature
                        .params
                        .iter()
                        .zip(arguments)
                        .all(|(param, argument)| param.admits(argument))
            })
            .map(|signature| signature.intrinsic)
    }

    pub fn result_type(self, receiver: &Type, arguments: &[Type]) -> Type {
        match self {
            Intrinsic::Add
            | Intrinsic::Sub
            | Intrinsic::Mul
            | Intrinsic::Div
            | Intrinsic::Mod
            | Intrinsic::Neg => {
                let float = std::iter::once(receiver)
                    .chain(arguments)
                    .any(|ty| ty.class_name() == Some("Float"));
                if float {
                    Type::float()
                } else {
                    Type::int()
                }
            }
            Intrinsic::Lt
            | Intrinsic::Le
            | Intrinsic::Gt
            | Intrinsic::Ge
            | Intrinsic::Eq
            | Intrinsic::Ne
            | Intrinsic::IsNil => Type::bool(),
            Intrinsic::ToI => Type::int(),
            Intrinsic::ToF => Type::float(),
            Intrinsic::Concat => Type::string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_arithmetic_widens_to_float() {
        let op = Intrinsic::resolve(&Type::int(), "+", &[Type::float()]).unwrap();
        assert_eq!(op, Intrinsic::Add);
        assert_eq!(
            op.result_type(&Type::int(), &[Type::float()]),
            Type::float()
        );
        assert_eq!(op.result_type(&Type::int(), &[Type::int()]), Type::int());
    }

    #[test]
    fn nil_converts_to_int_and_everything_compares() {
        assert_eq!(
            Intrinsic::resolve(&Type::nil(), "to_i", &[]),
            Some(Intrinsic::ToI)
        );
        assert_eq!(Intrinsic::resolve(&Type::nil(), "to_f", &[]), None);
        assert_eq!(
            Intrinsic::resolve(&Type::object("Foo"), "==", &[Type::int()]),
            Some(Intrinsic::Eq)
        );
        assert_eq!(
            Intrinsic::resolve(&Type::string(), "nil?", &[]),
            Some(Intrinsic::IsNil)
        );
    }

    #[test]
    fn operators_are_selected_by_operand_kind() {
        assert_eq!(
            Intrinsic::resolve(&Type::string(), "+", &[Type::string()]),
            Some(Intrinsic::Concat)
        );
        assert_eq!(
            Intrinsic::resolve(&Type::string(), "+", &[Type::int()]),
            None
        );
        assert_eq!(
            Intrinsic::resolve(&Type::float(), "-", &[]),
            Some(Intrinsic::Neg)
        );
    }
}
