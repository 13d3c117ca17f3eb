//! Method lookup for one statically known receiver/argument combination, and
//! expansion of union-typed call sites into such combinations.

use crate::program::{MethodId, MethodInfo, ProgramIndex};
use crate::stdlib::Intrinsic;
use crate::types::{SimpleType, Type};

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Method(MethodId),
    Intrinsic(Intrinsic),
    /// `Foo.new`: allocate, then run the matching `initialize`.
    New { class: String },
    Extern { lib: String, name: String },
}

/// A call as dispatch sees it. All types are single (non-union) members.
#[derive(Debug, Clone, Copy)]
pub struct CallShape<'t> {
    pub receiver: &'t Type,
    pub name: &'t str,
    pub arguments: &'t [Type],
    pub has_block: bool,
    pub implicit_receiver: bool,
}

pub fn lookup(program: &ProgramIndex, call: CallShape<'_>) -> Option<Callee> {
    if let Type::Simple(SimpleType::Class(class)) = call.receiver {
        if call.name == "new" && program.has_class(class) {
            return Some(Callee::New {
                class: class.clone(),
            });
        }
        if let Some(function) = program.extern_function(class, call.name) {
            if function.arity == call.arguments.len() {
                return Some(Callee::Extern {
                    lib: function.lib.clone(),
                    name: function.name.clone(),
                });
            }
        }
    }

    if let Some(class) = call.receiver.class_name() {
        for ancestor in program.ancestors(class) {
            let Some(info) = program.class(ancestor) else {
                continue;
            };
            let candidates: Vec<&MethodInfo> = info
                .methods
                .iter()
                .filter_map(|id| program.method(*id))
                .collect();
            if let Some(method) = select(program, &candidates, call) {
                return Some(Callee::Method(method));
            }
        }
    }

    if let Some(intrinsic) = Intrinsic::resolve(call.receiver, call.name, call.arguments) {
        return Some(Callee::Intrinsic(intrinsic));
    }

    if call.implicit_receiver {
        let globals: Vec<&MethodInfo> = program.globals().collect();
        return select(program, &globals, call).map(Callee::Method);
    }

    None
}

/// Pick among same-level candidates. Candidates whose yielding matches the
/// presence of a block are preferred; then the most specific restrictions win;
/// ties go to the later definition.
fn select(
    program: &ProgramIndex,
    candidates: &[&MethodInfo],
    call: CallShape<'_>,
) -> Option<MethodId> {
    let applicable: Vec<&MethodInfo> = candidates
        .iter()
        .copied()
        .filter(|method| method.name() == call.name && method.arity() == call.arguments.len())
        .filter(|method| accepts(program, method, call.arguments))
        .collect();

    let block_matching: Vec<&MethodInfo> = applicable
        .iter()
        .copied()
        .filter(|method| method.yields == call.has_block)
        .collect();
    let pool = if block_matching.is_empty() {
        applicable
    } else {
        block_matching
    };

    let mut best: Option<&MethodInfo> = None;
    for candidate in pool {
        best = match best {
            Some(current) if strictly_more_specific(program, current, candidate) => Some(current),
            _ => Some(candidate),
        };
    }
    best.map(|method| method.id)
}

fn accepts(program: &ProgramIndex, method: &MethodInfo, arguments: &[Type]) -> bool {
    method
        .definition
        .parameters
        .iter()
        .zip(arguments)
        .all(|(parameter, argument)| match known_restriction(program, &parameter.restriction) {
            None => true,
            Some(restriction) => argument
                .class_name()
                .is_some_and(|class| program.is_subclass(class, restriction)),
        })
}

/// Restrictions naming no known class (type parameters such as `T`) accept anything.
fn known_restriction<'r>(
    program: &ProgramIndex,
    restriction: &'r Option<String>,
) -> Option<&'r str> {
    restriction
        .as_deref()
        .filter(|name| program.has_class(name))
}

fn at_least_as_specific(program: &ProgramIndex, a: &MethodInfo, b: &MethodInfo) -> bool {
    a.definition
        .parameters
        .iter()
        .zip(&b.definition.parameters)
        .all(|(left, right)| {
            match (
                known_restriction(program, &left.restriction),
                known_restriction(program, &right.restriction),
            ) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(left), Some(right)) => program.is_subclass(left, right),
            }
        })
}

fn strictly_more_specific(program: &ProgramIndex, a: &MethodInfo, b: &MethodInfo) -> bool {
    at_least_as_specific(program, a, b) && !at_least_as_specific(program, b, a)
}

/// Cartesian product of the members of every scrutinee type.
///
/// Fails with the number of arms that would be produced when it exceeds `limit`.
pub fn expand_arms(types: &[Type], limit: usize) -> Result<Vec<Vec<Type>>, usize> {
    let count = types
        .iter()
        .map(|ty| ty.members().len())
        .fold(1usize, |acc, members| acc.saturating_mul(members));
    if count > limit {
        return Err(count);
    }

    let mut arms: Vec<Vec<Type>> = vec![Vec::new()];
    for ty in types {
        let mut next = Vec::with_capacity(arms.len() * ty.members().len());
        for arm in &arms {
            for member in ty.members() {
                let mut extended = arm.clone();
                extended.push(member.clone());
                next.push(extended);
            }
        }
        arms = next;
    }
    Ok(arms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::source::{SourceFile, SourceId};

    fn index(source: &str) -> ProgramIndex {
        let file = SourceFile::named(SourceId(0), "dispatch.gt", source);
        let tokens = Lexer::new(&file).unwrap().tokenize().unwrap();
        let module = Parser::new(&file, tokens).parse().unwrap();
        ProgramIndex::build([&module.body]).unwrap()
    }

    fn call<'t>(receiver: &'t Type, name: &'t str, arguments: &'t [Type]) -> CallShape<'t> {
        CallShape {
            receiver,
            name,
            arguments,
            has_block: false,
            implicit_receiver: false,
        }
    }

    fn line_of(program: &ProgramIndex, callee: Option<Callee>) -> usize {
        match callee {
            Some(Callee::Method(id)) => program.method(id).unwrap().definition.name_span.line,
            other => panic!("expected a user method, got {other:?}"),
        }
    }

    #[test]
    fn most_specific_restriction_wins() {
        let program = index("def foo(x : Value)\n 1\nend\ndef foo(x : Int)\n 2\nend");
        let main = Type::main();
        let mut shape = call(&main, "foo", &[]);
        shape.implicit_receiver = true;

        let int = [Type::int()];
        shape.arguments = &int;
        assert_eq!(line_of(&program, lookup(&program, shape)), 4);

        let float = [Type::float()];
        shape.arguments = &float;
        assert_eq!(line_of(&program, lookup(&program, shape)), 1);

        let string = [Type::string()];
        shape.arguments = &string;
        assert_eq!(lookup(&program, shape), None);
    }

    #[test]
    fn block_presence_selects_between_overloads() {
        let program = index("def foo(key)\n 1\nend\ndef foo(key)\n yield\nend");
        let main = Type::main();
        let int = [Type::int()];
        let mut shape = call(&main, "foo", &int);
        shape.implicit_receiver = true;
        assert_eq!(line_of(&program, lookup(&program, shape)), 1);
        shape.has_block = true;
        assert_eq!(line_of(&program, lookup(&program, shape)), 4);
    }

    #[test]
    fn subclass_inherits_and_later_definition_overrides() {
        let program = index(
            "class Foo\n def bar; 1; end\n def bar; 2; end\nend\nclass Baz < Foo\nend",
        );
        let baz = Type::object("Baz");
        assert_eq!(line_of(&program, lookup(&program, call(&baz, "bar", &[]))), 3);
    }

    #[test]
    fn class_receivers_allocate_and_libs_call_externs() {
        let program = index("class Foo\nend\nlib C\n fun exit : NoReturn\nend");
        let foo = Type::class("Foo");
        assert_eq!(
            lookup(&program, call(&foo, "new", &[])),
            Some(Callee::New {
                class: "Foo".to_string()
            })
        );
        let lib = Type::class("C");
        assert_eq!(
            lookup(&program, call(&lib, "exit", &[])),
            Some(Callee::Extern {
                lib: "C".to_string(),
                name: "exit".to_string()
            })
        );
    }

    #[test]
    fn intrinsics_and_globals_come_after_user_methods() {
        let program = index("class Int\n def to_f; 0; end\nend\ndef bar\n 1\nend");
        let int = Type::int();
        let float = [Type::float()];
        assert!(matches!(
            lookup(&program, call(&int, "to_f", &[])),
            Some(Callee::Method(_))
        ));
        assert_eq!(
            lookup(&program, call(&int, "<", &float)),
            Some(Callee::Intrinsic(Intrinsic::Lt))
        );

        let foo = Type::object("Foo");
        assert_eq!(lookup(&program, call(&foo, "bar", &[])), None);
        let mut implicit = call(&foo, "bar", &[]);
        implicit.implicit_receiver = true;
        let callee = lookup(&program, implicit);
        assert!(matches!(callee, Some(Callee::Method(_))));
    }

    #[test]
    fn arms_are_the_cartesian_product_of_members() {
        let receiver = Type::int().union_with(&Type::float());
        let argument = Type::nil().union_with(&Type::string());
        let members = [receiver.clone(), argument.clone(), Type::char()];
        let arms = expand_arms(&members, 64).unwrap();
        assert_eq!(arms.len(), 4);
        assert!(arms.iter().all(|arm| arm.len() == 3));
        assert!(arms.iter().all(|arm| arm[2] == Type::char()));
        let expected = vec![Type::float(), Type::nil(), Type::char()];
        assert!(arms.contains(&expected));

        assert_eq!(expand_arms(&[receiver, argument], 3), Err(4));
    }
}
