//! Class, method and extern tables collected from the top level of every module.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::ast::{AssignTarget, Body, ExpressionKind, FunctionDefinition, LibDefinition};
use crate::error::AnalysisError;
use crate::types::Type;

const BUILTIN_CLASSES: &[(&str, Option<&str>)] = &[
    ("Object", None),
    ("Value", Some("Object")),
    ("Number", Some("Value")),
    ("Int", Some("Number")),
    ("Float", Some("Number")),
    ("Char", Some("Value")),
    ("Bool", Some("Value")),
    ("Nil", Some("Value")),
    ("Reference", Some("Object")),
    ("String", Some("Reference")),
    ("Main", Some("Object")),
    ("Class", Some("Object")),
];

/// Superclass of a user class declared without `< Super`.
const DEFAULT_SUPERCLASS: &str = "Reference";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MethodId(pub u32);

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub superclass: Option<String>,
    pub methods: Vec<MethodId>,
    pub builtin: bool,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub id: MethodId,
    /// `None` for top-level functions.
    pub owner: Option<String>,
    pub definition: FunctionDefinition,
    pub yields: bool,
}

impl MethodInfo {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn arity(&self) -> usize {
        self.definition.parameters.len()
    }

    pub fn qualified_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner}#{}", self.definition.name),
            None => self.definition.name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExternInfo {
    pub lib: String,
    pub name: String,
    pub arity: usize,
    pub return_type: Option<String>,
}

impl ExternInfo {
    pub fn no_return(&self) -> bool {
        self.return_type.as_deref() == Some("NoReturn")
    }

    /// Static result of a call; `None` for `NoReturn` functions.
    pub fn result_type(&self) -> Option<Type> {
        let ty = match self.return_type.as_deref() {
            None | Some("Nil") | Some("Void") => Type::nil(),
            Some("NoReturn") => return None,
            Some("Int") => Type::int(),
            Some("Float") => Type::float(),
            Some("Bool") => Type::bool(),
            Some("Char") => Type::char(),
            Some("String") => Type::string(),
            Some(other) => Type::object(other),
        };
        Some(ty)
    }
}

#[derive(Debug, Default)]
pub struct ProgramIndex {
    classes: HashMap<String, ClassInfo>,
    methods: Vec<MethodInfo>,
    globals: Vec<MethodId>,
    externs: HashMap<(String, String), ExternInfo>,
    libs: HashSet<String>,
    constants: HashSet<String>,
}

impl ProgramIndex {
    pub fn build<'a>(
        bodies: impl IntoIterator<Item = &'a Body>,
    ) -> Result<Self, Vec<AnalysisError>> {
        let mut index = ProgramIndex::default();
        for (name, superclass) in BUILTIN_CLASSES {
            index.classes.insert(
                name.to_string(),
                ClassInfo {
                    name: name.to_string(),
                    superclass: superclass.map(str::to_string),
                    methods: Vec::new(),
                    builtin: true,
                },
            );
        }

        let mut declared_superclasses = Vec::new();
        for body in bodies {
            for expression in &body.expressions {
                match &expression.kind {
                    ExpressionKind::Function(function) => {
                        let id = index.add_method(None, function);
                        index.globals.push(id);
                    }
                    ExpressionKind::Class(class) => {
                        let info = index
                            .classes
                            .entry(class.name.clone())
                            .or_insert_with(|| ClassInfo {
                                name: class.name.clone(),
                                superclass: None,
                                methods: Vec::new(),
                                builtin: false,
                            });
                        if !info.builtin && info.superclass.is_none() {
                            info.superclass = Some(
                                class
                                    .superclass
                                    .clone()
                                    .unwrap_or_else(|| DEFAULT_SUPERCLASS.to_string()),
                            );
                        }
                        if let Some(superclass) = &class.superclass {
                            declared_superclasses.push((
                                class.name.clone(),
                                superclass.clone(),
                                class.name_span,
                            ));
                        }
                        for method in &class.methods {
                            index.add_method(Some(&class.name), method);
                        }
                    }
                    ExpressionKind::Lib(lib) => index.add_lib(lib),
                    ExpressionKind::Assignment(assignment) => {
                        if let AssignTarget::Constant(name) = &assignment.target {
                            index.constants.insert(name.clone());
                        }
                    }
                    _ => {}
                }
            }
        }

        let errors: Vec<AnalysisError> = declared_superclasses
            .into_iter()
            .filter(|(_, superclass, _)| !index.classes.contains_key(superclass))
            .map(|(class, superclass, span)| AnalysisError::UnknownSuperclass {
                class,
                superclass,
                span,
            })
            .collect();
        if !errors.is_empty() {
            return Err(errors);
        }

        tracing::debug!(
            classes = index.classes.len(),
            methods = index.methods.len(),
            externs = index.externs.len(),
            "program index built"
        );
        Ok(index)
    }

    fn add_method(&mut self, owner: Option<&str>, definition: &FunctionDefinition) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(MethodInfo {
            id,
            owner: owner.map(str::to_string),
            definition: definition.clone(),
            yields: definition.yields(),
        });
        if let Some(class) = owner.and_then(|owner| self.classes.get_mut(owner)) {
            class.methods.push(id);
        }
        id
    }

    fn add_lib(&mut self, lib: &LibDefinition) {
        self.libs.insert(lib.name.clone());
        for function in &lib.functions {
            self.externs.insert(
                (lib.name.clone(), function.name.clone()),
                ExternInfo {
                    lib: lib.name.clone(),
                    name: function.name.clone(),
                    arity: function.parameters.len(),
                    return_type: function.return_type.clone(),
                },
            );
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn method(&self, id: MethodId) -> Option<&MethodInfo> {
        self.methods.get(id.0 as usize)
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Top-level functions, in definition order.
    pub fn globals(&self) -> impl Iterator<Item = &MethodInfo> {
        self.globals.iter().filter_map(|id| self.method(*id))
    }

    pub fn is_lib(&self, name: &str) -> bool {
        self.libs.contains(name)
    }

    pub fn extern_function(&self, lib: &str, name: &str) -> Option<&ExternInfo> {
        self.externs.get(&(lib.to_string(), name.to_string()))
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains(name)
    }

    /// `class` followed by its superclasses up to `Object`.
    pub fn ancestors(&self, class: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.classes.get(class);
        while let Some(info) = current {
            if chain.contains(&info.name.as_str()) {
                break;
            }
            chain.push(info.name.as_str());
            current = info
                .superclass
                .as_deref()
                .and_then(|superclass| self.classes.get(superclass));
        }
        chain
    }

    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).contains(&ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{SourceFile, SourceId};

    fn index(source: &str) -> Result<ProgramIndex, Vec<AnalysisError>> {
        let file = SourceFile::named(SourceId(0), "program.gt", source);
        let tokens = Lexer::new(&file).unwrap().tokenize().unwrap();
        let module = Parser::new(&file, tokens).parse().unwrap();
        ProgramIndex::build([&module.body])
    }

    #[test]
    fn builtin_hierarchy() {
        let index = index("").unwrap();
        assert_eq!(index.ancestors("Int"), vec!["Int", "Number", "Value", "Object"]);
        assert!(index.is_subclass("String", "Reference"));
        assert!(!index.is_subclass("Nil", "Number"));
    }

    #[test]
    fn user_classes_default_to_reference_and_reopen() {
        let index = index(
            "class Foo\n def a; 1; end\nend\nclass Bar < Foo\nend\nclass Foo\n def b; 2; end\nend\nclass Int\n def c; 3; end\nend",
        )
        .unwrap();
        assert_eq!(index.ancestors("Bar"), vec!["Bar", "Foo", "Reference", "Object"]);
        assert_eq!(index.class("Foo").unwrap().methods.len(), 2);
        assert_eq!(index.class("Int").unwrap().methods.len(), 1);
        assert_eq!(index.ancestors("Int")[1], "Number");
    }

    #[test]
    fn globals_externs_and_constants() {
        let index = index(
            "FOO = 1\ndef foo\n yield\nend\ndef bar(x)\n x\nend\nlib C\n fun exit : NoReturn\n fun abs(x : Int) : Int\nend",
        )
        .unwrap();
        let globals: Vec<_> = index.globals().map(|method| method.name()).collect();
        assert_eq!(globals, vec!["foo", "bar"]);
        assert!(index.globals().next().unwrap().yields);
        assert!(index.is_constant("FOO"));
        assert!(index.is_lib("C"));
        assert!(index.extern_function("C", "exit").unwrap().no_return());
        assert_eq!(
            index.extern_function("C", "exit").unwrap().result_type(),
            None
        );
        assert_eq!(
            index.extern_function("C", "abs").unwrap().result_type(),
            Some(Type::int())
        );
    }

    #[test]
    fn unknown_superclass_is_reported() {
        let errors = index("class Foo < Missing\nend").unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [AnalysisError::UnknownSuperclass { superclass, .. }] if superclass == "Missing"
        ));
    }
}
