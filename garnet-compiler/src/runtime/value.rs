use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    pub class: String,
    pub ivars: HashMap<String, Value>,
}

impl ObjectValue {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ivars: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    Object(Rc<RefCell<ObjectValue>>),
    /// A class used as a value, e.g. the receiver of `Foo.new`.
    Class(String),
    Main,
}

impl Value {
    pub fn object(class: impl Into<String>) -> Self {
        Value::Object(Rc::new(RefCell::new(ObjectValue::new(class))))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(value) => *value,
            _ => true,
        }
    }

    /// Runtime class, as matched by dispatch arms.
    pub fn class_name(&self) -> String {
        match self {
            Value::Nil => "Nil".into(),
            Value::Int(_) => "Int".into(),
            Value::Float(_) => "Float".into(),
            Value::Bool(_) => "Bool".into(),
            Value::Char(_) => "Char".into(),
            Value::String(_) => "String".into(),
            Value::Object(object) => object.borrow().class.clone(),
            Value::Class(_) => "Class".into(),
            Value::Main => "Main".into(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn ivar(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(object) => object.borrow().ivars.get(name).cloned(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Main, Value::Main) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Char(value) => write!(f, "'{value}'"),
            Value::String(value) => write!(f, "{value}"),
            Value::Object(object) => write!(f, "#<{}>", object.borrow().class),
            Value::Class(name) => write!(f, "{name}"),
            Value::Main => write!(f, "main"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_compare_by_identity() {
        let a = Value::object("Foo");
        let b = Value::object("Foo");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::String("1".into()));
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
    }

    #[test]
    fn only_nil_and_false_are_falsy() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::String(String::new()).is_truthy());
    }
}
