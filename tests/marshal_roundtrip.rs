//! Host → managed → host conversion laws.

use std::sync::OnceLock;

use dotbridge::{
    bridge::marshal::{natural_number, to_host, to_managed},
    init_with,
    runtime::{ClrRuntime, ManagedValue},
    BridgeConfig, HostValue, RuntimeConfig, Session,
};
use proptest::prelude::*;

fn session() -> &'static Session {
    static SESSION: OnceLock<Session> = OnceLock::new();
    SESSION.get_or_init(|| {
        let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
        init_with(runtime, &BridgeConfig::default())
            .unwrap()
            .session()
            .clone()
    })
}

fn round_trip(value: &HostValue) -> HostValue {
    let session = session();
    to_host(session, to_managed(session, value).unwrap())
}

fn primitive() -> impl Strategy<Value = HostValue> {
    prop_oneof![
        any::<bool>().prop_map(HostValue::Bool),
        any::<i32>().prop_map(|n| HostValue::Number(f64::from(n))),
        (-(1i64 << 53)..(1i64 << 53)).prop_map(|n| HostValue::Number(n as f64)),
        (-1.0e300f64..1.0e300).prop_map(HostValue::Number),
        ".{0,40}".prop_map(HostValue::string),
        Just(HostValue::Null),
    ]
}

proptest! {
    #[test]
    fn primitives_survive_the_round_trip(value in primitive()) {
        prop_assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn integral_numbers_pick_the_narrowest_type(n in any::<i64>()) {
        let natural = natural_number(n as f64);
        if i32::try_from(n).is_ok() {
            prop_assert_eq!(natural, ManagedValue::I4(n as i32));
        } else {
            prop_assert!(matches!(natural, ManagedValue::I8(_) | ManagedValue::R8(_)));
        }
    }

    #[test]
    fn values_stored_in_managed_collections_come_back(value in primitive()) {
        let list = session()
            .class_named("System.Collections.ArrayList")
            .unwrap()
            .construct(&[])
            .unwrap();
        list.call("Add", &[value.clone()]).unwrap();
        prop_assert_eq!(list.index_get(&[0.into()]).unwrap(), value);
    }
}

#[test]
fn undefined_becomes_null() {
    assert_eq!(round_trip(&HostValue::Undefined), HostValue::Null);
}

#[test]
fn fractional_numbers_are_doubles() {
    assert_eq!(natural_number(0.5), ManagedValue::R8(0.5));
    assert_eq!(natural_number(4_294_967_296.0), ManagedValue::I8(4_294_967_296));
}

#[test]
fn objects_keep_their_identity() {
    let builder = session()
        .class_named("System.Text.StringBuilder")
        .unwrap()
        .construct(&[])
        .unwrap();
    let value = HostValue::Object(builder.clone());
    match round_trip(&value) {
        HostValue::Object(back) => {
            assert_eq!(back, builder);
            assert_eq!(back.class(), builder.class());
        }
        other => panic!("expected an object, got {other:?}"),
    }
}
