//! Namespace tree reachability, global injection and session independence.

use dotbridge::{host, init, BridgeConfig, Error, HostValue};

#[test]
fn init_reaches_nested_namespaces() {
    let root = init(&BridgeConfig::default()).unwrap();
    let system = root.namespace("System").unwrap();
    let io = system.namespace("IO").unwrap();
    let ports = io.namespace("Ports").unwrap();

    assert_eq!(ports.path(), "System.IO.Ports");
    assert_eq!(ports.name(), "Ports");
    let serial = ports.class("SerialPort").unwrap();
    assert_eq!(serial.full_name(), "System.IO.Ports.SerialPort");
    assert!(serial.assembly_qualified_name().starts_with("System.IO.Ports.SerialPort, System,"));
}

#[test]
fn namespaces_have_classes() {
    let root = init(&BridgeConfig::default()).unwrap();
    let system = root.namespace("System").unwrap();

    let console = system.class("Console").unwrap();
    assert_eq!(console.full_name(), "System.Console");
    let stream = system.namespace("IO").unwrap().class("Stream").unwrap();
    assert_eq!(stream.full_name(), "System.IO.Stream");
    assert!(matches!(root.get("System.Console"), Ok(HostValue::Class(_))));
}

#[test]
fn init_twice_gives_independent_sessions() {
    let first = init(&BridgeConfig::default()).unwrap();
    let second = init(&BridgeConfig::default()).unwrap();
    assert_ne!(first.session(), second.session());
    assert_ne!(first, second);

    let a = first.namespace("System").unwrap().class("String").unwrap();
    let b = second.namespace("System").unwrap().class("String").unwrap();
    assert_eq!(a.full_name(), b.full_name());
    assert_ne!(a, b);
}

#[test]
fn unknown_names_are_type_not_found() {
    let root = init(&BridgeConfig::default()).unwrap();
    assert_eq!(
        root.get("Nowhere").unwrap_err(),
        Error::TypeNotFound("Nowhere".into())
    );
    assert_eq!(
        root.get("System.Nowhere").unwrap_err(),
        Error::TypeNotFound("System.Nowhere".into())
    );
}

#[test]
fn global_mode_publishes_root_children() {
    host::clear_globals();
    let root = init(&BridgeConfig::global()).unwrap();
    let system = root.namespace("System").unwrap();

    let published = host::global("System").unwrap();
    assert_eq!(published.as_namespace(), Some(&system));
    assert!(host::global_names().contains(&"System".to_string()));

    let io = published.as_namespace().unwrap().namespace("IO").unwrap();
    assert_eq!(io, system.namespace("IO").unwrap());
    host::clear_globals();
}

#[test]
fn non_global_mode_leaves_scope_alone() {
    host::clear_globals();
    let root = init(&BridgeConfig::default()).unwrap();
    assert!(host::global("System").is_none());
    assert!(matches!(root.get("System"), Ok(HostValue::Namespace(_))));
}
