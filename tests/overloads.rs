//! Overload selection through the public projection API.

use std::sync::Arc;

use dotbridge::{
    init_with,
    runtime::{AssemblyDef, ClrRuntime, ElementType, ManagedValue, TypeBuilder, TypeSig},
    BridgeConfig, ClassProjection, Error, HostFunction, HostValue, RuntimeConfig,
};

const I4: TypeSig = TypeSig::Primitive(ElementType::I4);
const I8: TypeSig = TypeSig::Primitive(ElementType::I8);
const R8: TypeSig = TypeSig::Primitive(ElementType::R8);
const CHAR: TypeSig = TypeSig::Primitive(ElementType::Char);
const STRING: TypeSig = TypeSig::Primitive(ElementType::String);
const OBJECT: TypeSig = TypeSig::Primitive(ElementType::Object);

fn contoso() -> ClassProjection {
    let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
    runtime
        .load(
            AssemblyDef::new("Contoso").with_type(
                TypeBuilder::static_class("Contoso", "Overloads")
                    .static_method("Pick", &[I4], STRING, |_, _| Ok("int".into()))
                    .static_method("Pick", &[R8], STRING, |_, _| Ok("double".into()))
                    .static_method("Pick", &[STRING], STRING, |_, _| Ok("string".into()))
                    .static_method("Pick", &[CHAR], STRING, |_, _| Ok("char".into()))
                    .static_method("Pick", &[OBJECT], STRING, |_, _| Ok("object".into()))
                    .static_method("Wide", &[I8], STRING, |_, _| Ok("long".into()))
                    .static_method("Wide", &[R8], STRING, |_, _| Ok("double".into()))
                    .static_method("Sum", &[], I4, |_, args| {
                        let mut total = 0;
                        for value in args {
                            total += value.as_i32().unwrap_or_default();
                        }
                        Ok(ManagedValue::I4(total))
                    })
                    .params(I4)
                    .static_method("Sum", &[I4, I4], I4, |_, _| Ok(ManagedValue::I4(-1)))
                    .static_method(
                        "Apply",
                        &[TypeSig::delegate("System.Func`2"), I4],
                        OBJECT,
                        |_, args| {
                            let function = args[0].as_delegate().cloned();
                            match function {
                                Some(function) => function.invoke(&args[1..]),
                                None => Ok(ManagedValue::Null),
                            }
                        },
                    )
                    .build(),
            ),
        )
        .unwrap();

    let runtime: Arc<ClrRuntime> = runtime;
    init_with(runtime, &BridgeConfig::default())
        .unwrap()
        .class("Contoso.Overloads")
        .unwrap()
}

#[test]
fn exact_match_beats_coercion() {
    let class = contoso();
    assert_eq!(class.call("Pick", &[7.into()]), Ok(HostValue::from("int")));
    assert_eq!(class.call("Pick", &[7.5.into()]), Ok(HostValue::from("double")));
    assert_eq!(class.call("Pick", &["text".into()]), Ok(HostValue::from("string")));
    assert_eq!(class.call("Pick", &[true.into()]), Ok(HostValue::from("object")));
}

#[test]
fn single_character_strings_still_prefer_string() {
    let class = contoso();
    assert_eq!(class.call("Pick", &["x".into()]), Ok(HostValue::from("string")));
}

#[test]
fn equal_widening_is_ambiguous() {
    let class = contoso();
    match class.call("Wide", &[3.into()]) {
        Err(Error::AmbiguousMember { member, candidates, .. }) => {
            assert_eq!(member, "Wide");
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
    assert_eq!(class.call("Wide", &[3.5.into()]), Ok(HostValue::from("double")));
}

#[test]
fn fixed_overload_beats_params_expansion() {
    let class = contoso();
    assert_eq!(class.call("Sum", &[1.into(), 2.into()]), Ok(HostValue::Number(-1.0)));
    assert_eq!(
        class.call("Sum", &[1.into(), 2.into(), 3.into()]),
        Ok(HostValue::Number(6.0))
    );
    assert_eq!(class.call("Sum", &[]), Ok(HostValue::Number(0.0)));
}

#[test]
fn host_functions_become_delegates() {
    let class = contoso();
    let double = HostFunction::new("double", |args| {
        Ok(HostValue::Number(args[0].as_number().unwrap_or_default() * 2.0))
    });
    assert_eq!(
        class.call("Apply", &[double.into(), 21.into()]),
        Ok(HostValue::Number(42.0))
    );
}

#[test]
fn picks_are_stable_across_calls() {
    let class = contoso();
    for _ in 0..3 {
        assert_eq!(class.call("Pick", &[1.into()]), Ok(HostValue::from("int")));
        assert_eq!(class.call("Pick", &[2.25.into()]), Ok(HostValue::from("double")));
    }
}
