use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// Nominal leaf types, compared by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SimpleType {
    Nil,
    Bool,
    Int,
    Float,
    Char,
    String,
    /// The top-level program object that `self` refers to outside any class.
    Main,
    /// The class object itself, as the receiver of `Foo.new`.
    Class(String),
}

impl SimpleType {
    pub fn class_name(&self) -> &str {
        match self {
            SimpleType::Nil => "Nil",
            SimpleType::Bool => "Bool",
            SimpleType::Int => "Int",
            SimpleType::Float => "Float",
            SimpleType::Char => "Char",
            SimpleType::String => "String",
            SimpleType::Main => "Main",
            SimpleType::Class(_) => "Class",
        }
    }
}

/// A nominal type parameterized by the types of its instance variables.
///
/// Equality ignores the order instance variables were added in; display keeps it.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectType {
    pub name: String,
    pub instance_vars: Vec<(String, Type)>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_vars: Vec::new(),
        }
    }

    /// Returns a copy with `name` bound to `ty`, replacing an existing binding.
    pub fn with_var(mut self, name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        match self.instance_vars.iter_mut().find(|(var, _)| *var == name) {
            Some(slot) => slot.1 = ty,
            None => self.instance_vars.push((name, ty)),
        }
        self
    }

    pub fn var(&self, name: &str) -> Option<&Type> {
        self.instance_vars
            .iter()
            .find(|(var, _)| var == name)
            .map(|(_, ty)| ty)
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.instance_vars.len() == other.instance_vars.len()
            && self
                .instance_vars
                .iter()
                .all(|(name, ty)| other.var(name) == Some(ty))
    }
}

impl Eq for ObjectType {}

impl Hash for ObjectType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        let mut vars: Vec<(&str, u64)> = self
            .instance_vars
            .iter()
            .map(|(name, ty)| (name.as_str(), hash_of(ty)))
            .collect();
        vars.sort_unstable();
        vars.hash(state);
    }
}

/// A flattened, duplicate-free set of simple and object types.
#[derive(Debug, Clone, Serialize)]
pub struct UnionType {
    members: Vec<Type>,
}

impl UnionType {
    pub fn new(types: impl IntoIterator<Item = Type>) -> Self {
        let mut members: Vec<Type> = Vec::new();
        for ty in types {
            for member in ty.into_members() {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }
        Self { members }
    }

    pub fn members(&self) -> &[Type] {
        &self.members
    }
}

impl PartialEq for UnionType {
    fn eq(&self, other: &Self) -> bool {
        self.members.len() == other.members.len()
            && self
                .members
                .iter()
                .all(|member| other.members.contains(member))
    }
}

impl Eq for UnionType {}

impl Hash for UnionType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut hashes: Vec<u64> = self.members.iter().map(hash_of).collect();
        hashes.sort_unstable();
        hashes.hash(state);
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum Type {
    Simple(SimpleType),
    Object(ObjectType),
    Union(UnionType),
}

impl Type {
    pub fn nil() -> Self {
        Type::Simple(SimpleType::Nil)
    }

    pub fn bool() -> Self {
        Type::Simple(SimpleType::Bool)
    }

    pub fn int() -> Self {
        Type::Simple(SimpleType::Int)
    }

    pub fn float() -> Self {
        Type::Simple(SimpleType::Float)
    }

    pub fn char() -> Self {
        Type::Simple(SimpleType::Char)
    }

    pub fn string() -> Self {
        Type::Simple(SimpleType::String)
    }

    pub fn main() -> Self {
        Type::Simple(SimpleType::Main)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Type::Simple(SimpleType::Class(name.into()))
    }

    pub fn object(name: impl Into<String>) -> Self {
        Type::Object(ObjectType::new(name))
    }

    /// Non-union members. A union of one member and that member are interchangeable.
    pub fn members(&self) -> Vec<&Type> {
        match self {
            Type::Union(union) => union.members.iter().collect(),
            other => vec![other],
        }
    }

    fn into_members(self) -> Vec<Type> {
        match self {
            Type::Union(union) => union.members,
            other => vec![other],
        }
    }

    pub fn is_union(&self) -> bool {
        self.members().len() > 1
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.single(), Some(Type::Simple(SimpleType::Nil)))
    }

    /// The type itself when it is not a union of two or more members.
    pub fn single(&self) -> Option<&Type> {
        match self {
            Type::Union(union) if union.members.len() == 1 => union.members.first(),
            Type::Union(_) => None,
            other => Some(other),
        }
    }

    /// Class name used by dispatch; `None` for unions.
    pub fn class_name(&self) -> Option<&str> {
        match self.single()? {
            Type::Simple(simple) => Some(simple.class_name()),
            Type::Object(object) => Some(object.name.as_str()),
            Type::Union(_) => None,
        }
    }

    pub fn union_with(&self, other: &Type) -> Type {
        let union = UnionType::new([self.clone(), other.clone()]);
        Type::Union(union).normalized()
    }

    fn normalized(self) -> Type {
        match self {
            Type::Union(mut union) if union.members.len() == 1 => union.members.remove(0),
            other => other,
        }
    }
}

/// Combine types into the smallest union that covers all of them.
///
/// Returns `None` only for an empty input.
pub fn merge<'a, I>(types: I) -> Option<Type>
where
    I: IntoIterator<Item = &'a Type>,
{
    let union = UnionType::new(types.into_iter().cloned());
    match union.members.len() {
        0 => None,
        _ => Some(Type::Union(union).normalized()),
    }
}

/// Merge two optional types where `None` means "no value was produced".
pub fn merge_optional(a: Option<Type>, b: Option<Type>) -> Option<Type> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union_with(&b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self.single(), other.single()) {
            (Some(Type::Simple(a)), Some(Type::Simple(b))) => a == b,
            (Some(Type::Object(a)), Some(Type::Object(b))) => a == b,
            (Some(_), Some(_)) => false,
            (None, None) => {
                let (Type::Union(a), Type::Union(b)) = (self, other) else {
                    return false;
                };
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.single() {
            Some(Type::Simple(simple)) => {
                0u8.hash(state);
                simple.hash(state);
            }
            Some(Type::Object(object)) => {
                1u8.hash(state);
                object.hash(state);
            }
            _ => {
                2u8.hash(state);
                if let Type::Union(union) = self {
                    union.hash(state);
                }
            }
        }
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl fmt::Display for SimpleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimpleType::Class(name) => write!(f, "{name}:Class"),
            other => f.write_str(other.class_name()),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.instance_vars.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (index, (name, ty)) in self.instance_vars.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name} : {ty}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Simple(simple) => simple.fmt(f),
            Type::Object(object) => object.fmt(f),
            Type::Union(union) => {
                for (index, member) in union.members.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" | ")?;
                    }
                    member.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}
