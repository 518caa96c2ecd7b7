//! `System.IO.Ports`, shipped in the `System` assembly.
//!
//! No serial hardware is attached to the reference runtime: `SerialPort` keeps its settings
//! in ordinary private fields and `Open()` always reports that the port does not exist.

use crate::runtime::{
    bcl::{BOOL, I4, STRING, VOID},
    ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, TypeBuilder, TypeSig,
};

const PARITY: &[&str] = &["None", "Odd", "Even", "Mark", "Space"];
const STOP_BITS: &[&str] = &["None", "One", "Two", "OnePointFive"];
const HANDSHAKE: &[&str] = &["None", "XOnXOff", "RequestToSend", "RequestToSendXOnXOff"];

fn enumeration(name: &str, values: &[&str]) -> TypeBuilder {
    values
        .iter()
        .zip(0..)
        .fold(TypeBuilder::enumeration("System.IO.Ports", name), |ty, (value, n)| {
            ty.constant(value, I4, ManagedValue::I4(n))
        })
}

fn out_of_range(ctx: &CallContext<'_>, parameter: &str) -> crate::error::ManagedFault {
    ctx.throw(
        "System.ArgumentOutOfRangeException",
        format!("Specified argument was out of the range of valid values. (Parameter '{}')", parameter),
    )
}

/// Property backed by a private field, with a validated setter
fn setting(
    builder: TypeBuilder,
    name: &'static str,
    field: &'static str,
    ty: TypeSig,
    valid: fn(&ManagedValue) -> bool,
) -> TypeBuilder {
    builder.property_rw(
        name,
        ty,
        move |ctx, _| ctx.field(field),
        move |ctx, args| {
            let value = args.value_at(0).clone();
            if !valid(&value) {
                return Err(out_of_range(ctx, name));
            }
            ctx.set_field(field, value)?;
            Ok(ManagedValue::Void)
        },
    )
}

fn initialise(ctx: &CallContext<'_>, port: &str, baud: i32) -> ManagedResult {
    ctx.set_field("_portName", port.into())?;
    ctx.set_field("_baudRate", ManagedValue::I4(baud))?;
    ctx.set_field("_dataBits", ManagedValue::I4(8))?;
    ctx.set_field("_stopBits", ManagedValue::I4(1))?;
    Ok(ManagedValue::Void)
}

fn in_range(low: i32, high: i32) -> impl Fn(&ManagedValue) -> bool {
    move |value| value.as_i32().is_some_and(|n| (low..=high).contains(&n))
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    asm.add(enumeration("Parity", PARITY).build());
    asm.add(enumeration("StopBits", STOP_BITS).build());
    asm.add(enumeration("Handshake", HANDSHAKE).build());

    let port = TypeBuilder::class("System.IO.Ports", "SerialPort")
        .private_field("_portName", STRING)
        .private_field("_baudRate", I4)
        .private_field("_dataBits", I4)
        .private_field("_parity", I4)
        .private_field("_stopBits", I4)
        .private_field("_handshake", I4)
        .constructor(&[], |ctx, _| initialise(ctx, "COM1", 9600))
        .constructor(&[STRING], |ctx, args| initialise(ctx, args.str_at(0)?, 9600))
        .constructor(&[STRING, I4], |ctx, args| {
            let baud = args.i32_at(1)?;
            if baud <= 0 {
                return Err(out_of_range(ctx, "BaudRate"));
            }
            initialise(ctx, args.str_at(0)?, baud)
        });

    let port = setting(port, "PortName", "_portName", STRING, |value| {
        value.as_str().is_some_and(|name| !name.is_empty())
    });
    let port = setting(port, "BaudRate", "_baudRate", I4, |value| {
        value.as_i32().is_some_and(|n| n > 0)
    });
    let port = setting(port, "DataBits", "_dataBits", I4, |value| in_range(5, 8)(value));
    let port = setting(
        port,
        "Parity",
        "_parity",
        TypeSig::class("System.IO.Ports.Parity"),
        |value| in_range(0, 4)(value),
    );
    let port = setting(
        port,
        "StopBits",
        "_stopBits",
        TypeSig::class("System.IO.Ports.StopBits"),
        |value| in_range(1, 3)(value),
    );
    let port = setting(
        port,
        "Handshake",
        "_handshake",
        TypeSig::class("System.IO.Ports.Handshake"),
        |value| in_range(0, 3)(value),
    );

    asm.add(
        port.property("IsOpen", BOOL, |_, _| Ok(false.into()))
            .method("Open", &[], VOID, |ctx, _| {
                let name = ctx.runtime().display(&ctx.field("_portName")?)?;
                Err(ctx.throw(
                    "System.IO.IOException",
                    format!("The port '{}' does not exist.", name),
                ))
            })
            .method("Close", &[], VOID, |_, _| Ok(ManagedValue::Void))
            .method("Dispose", &[], VOID, |_, _| Ok(ManagedValue::Void))
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use crate::runtime::bcl::testing::{construct, get_property, runtime, set_property};
    use crate::runtime::ManagedValue;

    #[test]
    fn test_defaults_and_open() {
        let runtime = runtime();
        let port = construct(&runtime, "System.IO.Ports.SerialPort", &[], &[]).unwrap();
        assert_eq!(get_property(&runtime, &port, "PortName"), Ok("COM1".into()));
        assert_eq!(get_property(&runtime, &port, "BaudRate"), Ok(ManagedValue::I4(9600)));
        assert_eq!(get_property(&runtime, &port, "IsOpen"), Ok(false.into()));

        let fault = runtime.call_method(&port, "Open", &[]).unwrap_err();
        assert_eq!(fault.type_name(), "System.IO.IOException");
        assert_eq!(fault.message(), "The port 'COM1' does not exist.");
    }

    #[test]
    fn test_validated_settings() {
        let runtime = runtime();
        let port = construct(&runtime, "System.IO.Ports.SerialPort", &[], &[]).unwrap();
        set_property(&runtime, &port, "DataBits", ManagedValue::I4(7)).unwrap();
        assert_eq!(get_property(&runtime, &port, "DataBits"), Ok(ManagedValue::I4(7)));

        let fault = set_property(&runtime, &port, "DataBits", ManagedValue::I4(9)).unwrap_err();
        assert_eq!(fault.type_name(), "System.ArgumentOutOfRangeException");
        assert_eq!(get_property(&runtime, &port, "DataBits"), Ok(ManagedValue::I4(7)));
    }
}
