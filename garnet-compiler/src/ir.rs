//! Typed, control-flow-resolved program handed to the backend.
//!
//! Every expression carries its static type (`None` when it never completes
//! normally), every `return`/`break` names its resolved target and code after an
//! unconditional exit is absent.

use serde::Serialize;

use crate::ast::Literal;
use crate::closure::CaptureDescriptor;
use crate::completion::{BreakTarget, CallSiteId, FrameId, LoopId};
use crate::stdlib::Intrinsic;
use crate::types::{ObjectType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypedMethodId(pub u32);

impl TypedMethodId {
    /// The program's top-level body, which is not part of `TypedProgram::methods`.
    pub const MAIN: TypedMethodId = TypedMethodId(u32::MAX);
}

/// Index of a slot in the frame of the enclosing [`TypedMethod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocalId(pub u32);

#[derive(Debug, Clone, Serialize)]
pub struct TypedProgram {
    pub main: TypedMethod,
    pub methods: Vec<TypedMethod>,
    pub captures: Vec<CaptureDescriptor>,
    pub layouts: Vec<ObjectType>,
}

impl TypedProgram {
    pub fn method(&self, id: TypedMethodId) -> Option<&TypedMethod> {
        match self.methods.get(id.0 as usize) {
            Some(method) if method.id == id => Some(method),
            _ => self.methods.iter().find(|method| method.id == id),
        }
    }

    pub fn result_type(&self) -> Option<&Type> {
        self.main.return_type.as_ref()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalSlot {
    pub id: LocalId,
    pub name: String,
    pub ty: Option<Type>,
    /// Captured by a block and needing storage that outlives the block.
    pub captured: bool,
}

/// One instantiation of a method for a receiver type and argument types.
/// Inline expansions of yielding calls live inside the caller's body.
#[derive(Debug, Clone, Serialize)]
pub struct TypedMethod {
    pub id: TypedMethodId,
    pub name: String,
    pub owner: Option<String>,
    pub self_type: Type,
    pub self_local: LocalId,
    pub parameters: Vec<LocalId>,
    pub locals: Vec<LocalSlot>,
    pub body: TypedExpr,
    pub return_type: Option<Type>,
    pub frame: FrameId,
}

impl TypedMethod {
    pub fn local(&self, name: &str) -> Option<&LocalSlot> {
        self.locals.iter().find(|slot| slot.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypedExpr {
    pub ty: Option<Type>,
    pub kind: TypedExprKind,
}

impl TypedExpr {
    pub fn new(kind: TypedExprKind, ty: Option<Type>) -> Self {
        Self { ty, kind }
    }

    pub fn nil() -> Self {
        Self::new(TypedExprKind::Literal(Literal::Nil), Some(Type::nil()))
    }

    pub fn local(id: LocalId, ty: Option<Type>) -> Self {
        Self::new(TypedExprKind::Local(id), ty)
    }

    /// Evaluate `parts` in order; a single part stands for itself.
    pub fn sequence(mut parts: Vec<TypedExpr>, ty: Option<Type>) -> Self {
        if parts.len() == 1 {
            if let Some(mut only) = parts.pop() {
                only.ty = ty;
                return only;
            }
        }
        Self::new(TypedExprKind::Sequence(parts), ty)
    }

    pub fn completes_normally(&self) -> bool {
        self.ty.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum TypedExprKind {
    Literal(Literal),
    Local(LocalId),
    Assign {
        local: LocalId,
        value: Box<TypedExpr>,
    },
    InstanceVar {
        object: LocalId,
        name: String,
    },
    AssignInstanceVar {
        object: LocalId,
        name: String,
        value: Box<TypedExpr>,
    },
    Global(String),
    AssignGlobal {
        name: String,
        value: Box<TypedExpr>,
    },
    Constant(String),
    AssignConstant {
        name: String,
        value: Box<TypedExpr>,
    },
    ClassRef(String),
    /// The program's top-level object, `self` of every top-level function.
    MainObject,
    Sequence(Vec<TypedExpr>),
    If {
        condition: Box<TypedExpr>,
        then_branch: Box<TypedExpr>,
        else_branch: Box<TypedExpr>,
    },
    While {
        id: LoopId,
        condition: Box<TypedExpr>,
        body: Box<TypedExpr>,
    },
    And {
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Or {
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Not(Box<TypedExpr>),
    Call {
        method: TypedMethodId,
        receiver: Box<TypedExpr>,
        arguments: Vec<TypedExpr>,
    },
    Intrinsic {
        op: Intrinsic,
        receiver: Box<TypedExpr>,
        arguments: Vec<TypedExpr>,
    },
    New {
        class: String,
        initializer: Option<TypedMethodId>,
        arguments: Vec<TypedExpr>,
    },
    Extern {
        lib: String,
        name: String,
        arguments: Vec<TypedExpr>,
    },
    Inline(Box<InlineCall>),
    /// Run the caller's block: reset `locals` to nil, bind `parameters` from
    /// `arguments` (missing ones to nil, extra ones evaluated and dropped), then
    /// evaluate `body`.
    Yield {
        parameters: Vec<LocalId>,
        locals: Vec<LocalId>,
        arguments: Vec<TypedExpr>,
        body: Box<TypedExpr>,
    },
    /// Evaluate `scrutinees` into `temps`, then run the first arm whose types
    /// match the runtime classes of the temps.
    Dispatch {
        scrutinees: Vec<TypedExpr>,
        temps: Vec<LocalId>,
        arms: Vec<DispatchArm>,
    },
    Return {
        target: FrameId,
        value: Box<TypedExpr>,
    },
    Break {
        target: BreakTarget,
        value: Box<TypedExpr>,
    },
}

/// A yielding call expanded at its call site.
#[derive(Debug, Clone, Serialize)]
pub struct InlineCall {
    pub site: CallSiteId,
    pub frame: FrameId,
    pub name: String,
    pub self_local: LocalId,
    pub receiver: TypedExpr,
    pub parameters: Vec<LocalId>,
    /// Slots of the expansion's own locals, reset to nil on every entry.
    pub locals: Vec<LocalId>,
    pub arguments: Vec<TypedExpr>,
    pub body: TypedExpr,
    /// Merged value of every `break` aimed at this call site.
    pub break_type: Option<Type>,
    /// Merged value of every `return` from the expanded method's own frame.
    pub return_type: Option<Type>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchArm {
    pub types: Vec<Type>,
    pub body: TypedExpr,
}
