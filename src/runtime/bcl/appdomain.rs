//! `System.AppDomain` and assembly reflection.
//!
//! | Member | Description |
//! |--------|-------------|
//! | `AppDomain.CurrentDomain` | The runtime's single domain |
//! | `AppDomain.FriendlyName`, `AppDomain.BaseDirectory` | Domain identity |
//! | `AppDomain.AssemblyLoad` | Instance event, raised after every successful assembly load |
//! | `AppDomain.Load(String)` | Loads a catalog assembly |
//! | `AssemblyLoadEventArgs.LoadedAssembly` | The loaded `System.Reflection.Assembly` |
//! | `Assembly.FullName`, `Assembly.ToString()` | Assembly display name |
//! | `Assembly.Load(String)` | Static loader |

use std::sync::Mutex;

use crate::runtime::{
    bcl::STRING,
    ArgsExt, AssemblyDef, AssemblyInfo, CallContext, ClrRuntime, DelegateRef, ManagedResult,
    ManagedValue, ObjectRef, RuntimeHost, TypeBuilder, TypeSig,
};

const ASSEMBLY: &str = "System.Reflection.Assembly";

/// Native state of the `AppDomain` singleton
pub struct AppDomainState {
    friendly_name: String,
    handlers: Mutex<Vec<DelegateRef>>,
}

impl AppDomainState {
    /// Creates the domain state
    pub fn new(friendly_name: &str) -> Self {
        AppDomainState {
            friendly_name: friendly_name.to_string(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the `AssemblyLoad` subscribers, in subscription order
    pub fn handlers(&self) -> Vec<DelegateRef> {
        lock!(self.handlers).clone()
    }

    fn subscribe(&self, handler: DelegateRef) {
        lock!(self.handlers).push(handler);
    }

    fn unsubscribe(&self, handler: &DelegateRef) -> bool {
        let mut handlers = lock!(self.handlers);
        match handlers
            .iter()
            .rposition(|existing| existing.target_id() == handler.target_id())
        {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }
}

struct AssemblyState(AssemblyInfo);

/// Creates a `System.Reflection.Assembly` object for a loaded assembly
pub(crate) fn assembly_object(runtime: &ClrRuntime, info: &AssemblyInfo) -> ManagedResult<ObjectRef> {
    let object = runtime.allocate(ASSEMBLY)?;
    object.set_native(AssemblyState(info.clone()));
    Ok(object)
}

/// Creates the `AssemblyLoadEventArgs` for a load notification
pub(crate) fn assembly_load_args(runtime: &ClrRuntime, info: &AssemblyInfo) -> ManagedResult<ObjectRef> {
    let args = runtime.allocate("System.AssemblyLoadEventArgs")?;
    args.set_field("_loadedAssembly", assembly_object(runtime, info)?.into());
    Ok(args)
}

fn load(ctx: &CallContext<'_>, name: &str) -> ManagedResult {
    let info = ctx.runtime().load_assembly(name).map_err(|err| {
        ctx.throw(
            "System.IO.FileNotFoundException",
            format!(
                "Could not load file or assembly '{}' or one of its dependencies. {}",
                name, err
            ),
        )
    })?;
    Ok(assembly_object(ctx.runtime(), &info)?.into())
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    let handler = TypeSig::delegate("System.AssemblyLoadEventHandler");
    let assembly = TypeSig::class(ASSEMBLY);

    asm.add(
        TypeBuilder::class("System", "AppDomain")
            .sealed()
            .static_property("CurrentDomain", TypeSig::class("System.AppDomain"), |ctx, _| {
                Ok(ctx.runtime().current_domain()?.into())
            })
            .property("FriendlyName", STRING, |ctx, _| {
                Ok(ManagedValue::string(&ctx.native::<AppDomainState>()?.friendly_name))
            })
            .property("BaseDirectory", STRING, |_, _| {
                let dir = std::env::current_dir().unwrap_or_default();
                Ok(ManagedValue::from(dir.to_string_lossy().into_owned()))
            })
            .event(
                "AssemblyLoad",
                handler,
                |ctx, args| {
                    ctx.native::<AppDomainState>()?
                        .subscribe(args.delegate_at(0)?.clone());
                    Ok(ManagedValue::Void)
                },
                |ctx, args| {
                    if let Some(handler) = args.value_at(0).as_delegate() {
                        ctx.native::<AppDomainState>()?.unsubscribe(handler);
                    }
                    Ok(ManagedValue::Void)
                },
            )
            .method("Load", &[STRING], assembly.clone(), |ctx, args| {
                load(ctx, args.str_at(0)?)
            })
            .build(),
    );

    asm.add(
        TypeBuilder::class("System", "AssemblyLoadEventArgs")
            .private_field("_loadedAssembly", assembly.clone())
            .property("LoadedAssembly", assembly.clone(), |ctx, _| {
                ctx.field("_loadedAssembly")
            })
            .build(),
    );

    asm.add(
        TypeBuilder::class("System.Reflection", "Assembly")
            .property("FullName", STRING, |ctx, _| {
                Ok(ctx.native::<AssemblyState>()?.0.full_name().into())
            })
            .method("ToString", &[], STRING, |ctx, _| {
                Ok(ctx.native::<AssemblyState>()?.0.full_name().into())
            })
            .static_method("Load", &[STRING], assembly, |ctx, args| {
                load(ctx, args.str_at(0)?)
            })
            .build(),
    );

    asm.add(
        TypeBuilder::class("System", "EventArgs")
            .constructor(&[], |_, _| Ok(ManagedValue::Void))
            .build(),
    );
}
