//! Static members, construction and instance members through the projected classes.

use dotbridge::{init, is_bridged_object, BridgeConfig, Error, HostFunction, HostValue, NamespaceNode};

fn system() -> NamespaceNode {
    init(&BridgeConfig::default())
        .unwrap()
        .namespace("System")
        .unwrap()
}

#[test]
fn construct_yields_bridged_object() {
    let system = system();
    let port = system
        .namespace("IO.Ports")
        .unwrap()
        .class("SerialPort")
        .unwrap()
        .construct(&[])
        .unwrap();

    assert!(is_bridged_object(&HostValue::Object(port.clone())));
    assert!(!is_bridged_object(&HostValue::from("COM1")));
    assert!(!is_bridged_object(&HostValue::Class(port.class().clone())));
    assert_eq!(port.get("PortName"), Ok(HostValue::from("COM1")));
    assert_eq!(port.type_name(), "System.IO.Ports.SerialPort");
}

#[test]
fn static_field_round_trip() {
    let string = system().class("String").unwrap();
    assert_eq!(string.get("Empty"), Ok(HostValue::from("")));
}

#[test]
fn static_property_getter_yields_bridged_object() {
    let now = system().class("DateTime").unwrap().get("Now").unwrap();
    assert!(is_bridged_object(&now));
    let now = now.as_object().unwrap();
    assert_eq!(now.type_name(), "System.DateTime");
    assert!(now.get("Year").unwrap().as_number().unwrap() >= 1970.0);
}

#[test]
fn static_method_with_positional_arguments() {
    let string = system().class("String").unwrap();
    assert_eq!(
        string.call("Format", &["Hello, {0}!".into(), "world".into()]),
        Ok(HostValue::from("Hello, world!"))
    );

    let format = string.get("Format").unwrap();
    let format: &HostFunction = format.as_function().unwrap();
    assert_eq!(
        format.call(&["{0}{1}{2}{3}".into(), "a".into(), "b".into(), "c".into(), "d".into()]),
        Ok(HostValue::from("abcd"))
    );
}

#[test]
fn instance_property_after_construction() {
    let date = system()
        .class("DateTime")
        .unwrap()
        .construct(&[1970.into(), 1.into(), 1.into()])
        .unwrap();
    assert_eq!(date.get("Year"), Ok(HostValue::Number(1970.0)));
}

#[test]
fn instance_method_matches_state() {
    let date = system()
        .class("DateTime")
        .unwrap()
        .construct(&[1970.into(), 1.into(), 1.into()])
        .unwrap();
    assert_eq!(date.call("ToString", &[]), Ok(HostValue::from("1970/01/01 0:00:00")));
}

#[test]
fn instance_property_write_then_read() {
    let exception = system().class("Exception").unwrap().construct(&[]).unwrap();
    assert_eq!(exception.get("Source"), Ok(HostValue::Null));
    exception.set("Source", "my source".into()).unwrap();
    assert_eq!(exception.get("Source"), Ok(HostValue::from("my source")));
}

#[test]
fn class_of_object_is_shared_projection() {
    let system = system();
    let exception_class = system.class("Exception").unwrap();
    let exception = exception_class.construct(&["boom".into()]).unwrap();
    assert_eq!(exception.class(), &exception_class);
    assert_eq!(exception.class().session().get_type(&exception), exception_class);
    assert_eq!(exception.get("Message"), Ok(HostValue::from("boom")));
}

#[test]
fn abstract_types_cannot_be_constructed() {
    let stream = system().namespace("IO").unwrap().class("Stream").unwrap();
    match stream.construct(&[]) {
        Err(Error::ConstructionError(fault)) => {
            assert_eq!(fault.type_name(), "System.MemberAccessException");
        }
        other => panic!("expected a construction error, got {other:?}"),
    }
}

#[test]
fn managed_faults_surface_as_invocation_errors() {
    let port = system()
        .namespace("IO.Ports")
        .unwrap()
        .class("SerialPort")
        .unwrap()
        .construct(&["COM9".into()])
        .unwrap();
    match port.call("Open", &[]) {
        Err(Error::InvocationError(fault)) => {
            assert_eq!(fault.type_name(), "System.IO.IOException");
            assert!(fault.message().contains("COM9"));
        }
        other => panic!("expected an invocation error, got {other:?}"),
    }
}

#[test]
fn missing_members_are_reported() {
    let string = system().class("String").unwrap();
    assert!(matches!(
        string.get("NoSuchThing"),
        Err(Error::MemberNotFound { .. })
    ));
    assert!(matches!(
        string.call("Format", &[HostValue::Bool(true)]),
        Err(Error::TypeMismatch { .. })
    ));
}
