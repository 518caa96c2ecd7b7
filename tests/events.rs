//! Events, assembly import and the reflection surface.

use std::sync::{Arc, Mutex};

use dotbridge::{
    host, init_with, runtime::ClrRuntime, BridgeConfig, Error, HostFunction, HostValue,
    NamespaceNode, RuntimeConfig,
};

fn root(config: &BridgeConfig) -> NamespaceNode {
    let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
    init_with(runtime, config).unwrap()
}

fn recorder() -> (HostFunction, Arc<Mutex<Vec<String>>>) {
    let loaded = Arc::new(Mutex::new(Vec::new()));
    let sink = loaded.clone();
    let handler = HostFunction::new("on_load", move |args| {
        let args_object = args[1].as_object().unwrap();
        let assembly = args_object.get("LoadedAssembly")?;
        let name = assembly.as_object().unwrap().get("FullName")?;
        sink.lock().unwrap().push(name.as_str().unwrap_or_default().to_string());
        Ok(HostValue::Undefined)
    });
    (handler, loaded)
}

#[test]
fn assembly_load_event_fires_on_import() {
    let root = root(&BridgeConfig::default());
    let domain = root
        .namespace("System")
        .unwrap()
        .class("AppDomain")
        .unwrap()
        .get("CurrentDomain")
        .unwrap();
    let domain = domain.as_object().unwrap();
    let (handler, loaded) = recorder();

    domain.subscribe("AssemblyLoad", &handler).unwrap();
    root.session().import("System.Data").unwrap();
    root.session().import("System.Data").unwrap();
    {
        let loaded = loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].starts_with("System.Data, Version=4.0.0.0"));
    }

    domain.unsubscribe("AssemblyLoad", &handler).unwrap();
    assert!(matches!(
        domain.get("AssemblyLoad"),
        Err(Error::InvalidMemberAccess { .. })
    ));
}

#[test]
fn import_by_path_uses_the_file_stem() {
    let root = root(&BridgeConfig::default());
    let info = root.session().import("/opt/lib/System.Data.dll").unwrap();
    assert_eq!(info.name, "System.Data");
    assert!(root.namespace("System.Data").unwrap().class("DataTable").is_ok());
    assert!(root
        .session()
        .assemblies()
        .iter()
        .any(|name| name.starts_with("System.Data,")));
}

#[test]
fn unknown_assemblies_are_rejected() {
    let root = root(&BridgeConfig::default());
    assert!(matches!(
        root.session().import("Nope.Assembly"),
        Err(Error::AssemblyNotFound(_))
    ));
}

#[test]
fn import_merges_new_namespaces_in_global_mode() {
    host::clear_globals();
    let runtime = ClrRuntime::new(RuntimeConfig::for_testing()).unwrap();
    runtime.add_to_catalog(
        "Fabrikam",
        Arc::new(|| {
            dotbridge::runtime::AssemblyDef::new("Fabrikam").with_type(
                dotbridge::runtime::TypeBuilder::class("Fabrikam", "Widget")
                    .constructor(&[], |_, _| Ok(dotbridge::runtime::ManagedValue::Void))
                    .build(),
            )
        }),
    );
    let root = init_with(runtime, &BridgeConfig::global()).unwrap();
    assert!(host::global("Fabrikam").is_none());

    root.session().import("Fabrikam").unwrap();
    let fabrikam = host::global("Fabrikam").unwrap();
    let widget = fabrikam.as_namespace().unwrap().class("Widget").unwrap();
    assert!(widget.construct(&[]).is_ok());
    host::clear_globals();
}
