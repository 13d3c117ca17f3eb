use garnet_compiler::{merge, ObjectType, Type, UnionType};
use proptest::prelude::*;

fn simple_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::nil()),
        Just(Type::bool()),
        Just(Type::int()),
        Just(Type::float()),
        Just(Type::char()),
        Just(Type::string()),
    ]
}

fn object_type() -> impl Strategy<Value = Type> {
    (
        prop_oneof![Just("Foo"), Just("Bar")],
        prop::collection::vec((prop_oneof![Just("@x"), Just("@y")], simple_type()), 0..3),
    )
        .prop_map(|(name, vars)| {
            let object = vars
                .into_iter()
                .fold(ObjectType::new(name), |object, (var, ty)| {
                    object.with_var(var, ty)
                });
            Type::Object(object)
        })
}

fn leaf_type() -> impl Strategy<Value = Type> {
    prop_oneof![3 => simple_type(), 1 => object_type()]
}

fn any_type() -> impl Strategy<Value = Type> {
    prop::collection::vec(leaf_type(), 1..5)
        .prop_map(|types| merge(&types).expect("non-empty input merges"))
}

proptest! {
    #[test]
    fn merging_a_single_type_returns_it(ty in any_type()) {
        prop_assert_eq!(merge([&ty]), Some(ty.clone()));
    }

    #[test]
    fn merge_is_commutative(a in any_type(), b in any_type()) {
        prop_assert_eq!(merge([&a, &b]), merge([&b, &a]));
    }

    #[test]
    fn merge_is_idempotent(a in any_type(), b in any_type()) {
        let once = merge([&a, &b]).expect("merged");
        prop_assert_eq!(merge([&once, &b]), Some(once.clone()));
        prop_assert_eq!(merge([&once, &once]), Some(once));
    }

    #[test]
    fn merge_covers_every_member(types in prop::collection::vec(leaf_type(), 1..6)) {
        let merged = merge(&types).expect("merged");
        for ty in &types {
            prop_assert!(merged.members().contains(&ty));
        }
    }

    #[test]
    fn object_equality_ignores_instance_var_order(x in simple_type(), y in simple_type()) {
        let forward = ObjectType::new("Foo")
            .with_var("@x", x.clone())
            .with_var("@y", y.clone());
        let backward = ObjectType::new("Foo")
            .with_var("@y", y.clone())
            .with_var("@x", x.clone());
        prop_assert_eq!(&forward, &backward);

        let changed = if x == Type::int() { Type::float() } else { Type::int() };
        let different = ObjectType::new("Foo").with_var("@y", y).with_var("@x", changed);
        prop_assert_ne!(&forward, &different);
    }

    #[test]
    fn union_of_one_member_equals_the_member(ty in leaf_type()) {
        prop_assert_eq!(Type::Union(UnionType::new([ty.clone()])), ty);
    }
}

#[test]
fn union_display_lists_members() {
    let ty = Type::int().union_with(&Type::float());
    assert_eq!(ty.to_string(), "Int | Float");
}
