//! `System.IO`: streams, paths and files.
//!
//! # Emulated Members
//!
//! ## Stream (abstract)
//!
//! | Member | Description |
//! |--------|-------------|
//! | `CanRead`, `CanSeek`, `CanWrite` | `false` |
//! | `ReadByte()`, `WriteByte(Byte)`, `Length` | `NotSupportedException` |
//! | `Flush()`, `Dispose()` | No-op |
//! | `Close()` | Calls `Dispose()` virtually |
//!
//! ## MemoryStream
//!
//! | Member | Description |
//! |--------|-------------|
//! | `.ctor()`, `.ctor(Int32)` | Empty stream, optional capacity |
//! | `WriteByte(Byte)`, `ReadByte()` | Byte I/O at `Position` |
//! | `Length`, `Position`, `Capacity`, `SetLength(Int64)` | Size management |
//! | `CanRead`, `CanSeek`, `CanWrite` | `true` until disposed |
//! | `Dispose()` | Closes the stream; later access raises `ObjectDisposedException` |
//!
//! ## Path and File
//!
//! | Member | Description |
//! |--------|-------------|
//! | `Path.Combine(String, String[, String])` | Joins segments, restarting at rooted segments |
//! | `Path.GetExtension`, `GetFileName`, `GetFileNameWithoutExtension`, `GetDirectoryName`, `HasExtension` | Path parsing |
//! | `Path.DirectorySeparatorChar`, `Path.PathSeparator` | Platform separators |
//! | `File.Exists`, `File.ReadAllText`, `File.WriteAllText` | File system access |

use std::sync::Mutex;

use crate::error::ManagedFault;

use crate::runtime::{
    bcl::{BOOL, CHAR, I4, I8, STRING, U1, VOID},
    ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, TypeBuilder,
};

const SEPARATOR: char = std::path::MAIN_SEPARATOR;

#[derive(Default)]
struct MemoryBuffer {
    data: Vec<u8>,
    position: usize,
    disposed: bool,
}

#[derive(Default)]
struct MemoryStreamState {
    buffer: Mutex<MemoryBuffer>,
}

fn not_supported(ctx: &CallContext<'_>) -> ManagedFault {
    ctx.throw("System.NotSupportedException", "Specified method is not supported.")
}

/// Runs `op` against the open buffer of the target stream
fn with_open<T>(
    ctx: &CallContext<'_>,
    op: impl FnOnce(&mut MemoryBuffer) -> ManagedResult<T>,
) -> ManagedResult<T> {
    let state = ctx.native::<MemoryStreamState>()?;
    let mut buffer = lock!(state.buffer);
    if buffer.disposed {
        return Err(ctx.throw("System.ObjectDisposedException", "Cannot access a closed Stream."));
    }
    op(&mut buffer)
}

fn size(ctx: &CallContext<'_>, value: i64, name: &str) -> ManagedResult<usize> {
    usize::try_from(value)
        .ok()
        .filter(|value| *value <= i32::MAX as usize)
        .ok_or_else(|| {
            ctx.throw(
                "System.ArgumentOutOfRangeException",
                format!("Non-negative number required. (Parameter '{}')", name),
            )
        })
}

fn as_i8(value: usize) -> ManagedValue {
    ManagedValue::I8(i64::try_from(value).unwrap_or(i64::MAX))
}

fn register_streams(asm: &mut AssemblyDef) {
    asm.add(
        TypeBuilder::class("System.IO", "Stream")
            .abstract_type()
            .protected_constructor(|_, _| Ok(ManagedValue::Void))
            .property("CanRead", BOOL, |_, _| Ok(false.into()))
            .property("CanSeek", BOOL, |_, _| Ok(false.into()))
            .property("CanWrite", BOOL, |_, _| Ok(false.into()))
            .property("Length", I8, |ctx, _| Err(not_supported(ctx)))
            .method("ReadByte", &[], I4, |ctx, _| Err(not_supported(ctx)))
            .method("WriteByte", &[U1], VOID, |ctx, _| Err(not_supported(ctx)))
            .method("Flush", &[], VOID, |_, _| Ok(ManagedValue::Void))
            .method("Dispose", &[], VOID, |_, _| Ok(ManagedValue::Void))
            .method("Close", &[], VOID, |ctx, _| {
                ctx.runtime().call_method(ctx.this()?, "Dispose", &[])?;
                Ok(ManagedValue::Void)
            })
            .build(),
    );

    asm.add(
        TypeBuilder::class("System.IO", "MemoryStream")
            .extends("System.IO.Stream")
            .constructor(&[], |ctx, _| {
                ctx.this()?.set_native(MemoryStreamState::default());
                Ok(ManagedValue::Void)
            })
            .constructor(&[I4], |ctx, args| {
                let capacity = size(ctx, args.i64_at(0)?, "capacity")?;
                ctx.this()?.set_native(MemoryStreamState {
                    buffer: Mutex::new(MemoryBuffer {
                        data: Vec::with_capacity(capacity),
                        ..Default::default()
                    }),
                });
                Ok(ManagedValue::Void)
            })
            .property("CanRead", BOOL, |ctx, _| {
                let state = ctx.native::<MemoryStreamState>()?;
                Ok((!lock!(state.buffer).disposed).into())
            })
            .property("CanSeek", BOOL, |ctx, _| {
                let state = ctx.native::<MemoryStreamState>()?;
                Ok((!lock!(state.buffer).disposed).into())
            })
            .property("CanWrite", BOOL, |ctx, _| {
                let state = ctx.native::<MemoryStreamState>()?;
                Ok((!lock!(state.buffer).disposed).into())
            })
            .property("Length", I8, |ctx, _| {
                with_open(ctx, |buffer| Ok(as_i8(buffer.data.len())))
            })
            .property("Capacity", I4, |ctx, _| {
                with_open(ctx, |buffer| {
                    Ok(ManagedValue::I4(
                        i32::try_from(buffer.data.capacity()).unwrap_or(i32::MAX),
                    ))
                })
            })
            .property_rw(
                "Position",
                I8,
                |ctx, _| with_open(ctx, |buffer| Ok(as_i8(buffer.position))),
                |ctx, args| {
                    let position = size(ctx, args.i64_at(0)?, "value")?;
                    with_open(ctx, |buffer| {
                        buffer.position = position;
                        Ok(ManagedValue::Void)
                    })
                },
            )
            .method("SetLength", &[I8], VOID, |ctx, args| {
                let length = size(ctx, args.i64_at(0)?, "value")?;
                with_open(ctx, |buffer| {
                    buffer.data.resize(length, 0);
                    buffer.position = buffer.position.min(length);
                    Ok(ManagedValue::Void)
                })
            })
            .method("WriteByte", &[U1], VOID, |ctx, args| {
                let byte = u8::try_from(args.i64_at(0)?).map_err(|_| {
                    ctx.throw("System.ArgumentOutOfRangeException", "Value was out of range.")
                })?;
                with_open(ctx, |buffer| {
                    let position = buffer.position;
                    if position >= buffer.data.len() {
                        buffer.data.resize(position + 1, 0);
                    }
                    buffer.data[position] = byte;
                    buffer.position += 1;
                    Ok(ManagedValue::Void)
                })
            })
            .method("ReadByte", &[], I4, |ctx, _| {
                with_open(ctx, |buffer| {
                    Ok(match buffer.data.get(buffer.position).copied() {
                        Some(byte) => {
                            buffer.position += 1;
                            ManagedValue::I4(byte.into())
                        }
                        None => ManagedValue::I4(-1),
                    })
                })
            })
            .method("Flush", &[], VOID, |ctx, _| {
                with_open(ctx, |_| Ok(ManagedValue::Void))
            })
            .method("Dispose", &[], VOID, |ctx, _| {
                let state = ctx.native::<MemoryStreamState>()?;
                lock!(state.buffer).disposed = true;
                Ok(ManagedValue::Void)
            })
            .build(),
    );
}

fn is_separator(c: char) -> bool {
    c == '/' || c == SEPARATOR
}

fn is_rooted(path: &str) -> bool {
    path.starts_with(is_separator) || (cfg!(windows) && path.chars().nth(1) == Some(':'))
}

fn combine(parts: &[&str]) -> String {
    let mut combined = String::new();
    for part in parts.iter().filter(|part| !part.is_empty()) {
        if is_rooted(part) {
            combined.clear();
        } else if !combined.is_empty() && !combined.ends_with(is_separator) {
            combined.push(SEPARATOR);
        }
        combined.push_str(part);
    }
    combined
}

fn file_name(path: &str) -> &str {
    path.rfind(is_separator).map_or(path, |index| &path[index + 1..])
}

fn extension(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(index) if index + 1 < name.len() => &name[index..],
        _ => "",
    }
}

fn directory_name(path: &str) -> Option<String> {
    let index = path.rfind(is_separator)?;
    if index == 0 {
        return (path.len() > 1).then(|| path[..1].to_string());
    }
    Some(path[..index].trim_end_matches(is_separator).to_string())
}

fn path_args(args: &[ManagedValue]) -> ManagedResult<Vec<&str>> {
    (0..args.len()).map(|index| args.str_at(index)).collect()
}

fn register_path(asm: &mut AssemblyDef) {
    asm.add(
        TypeBuilder::static_class("System.IO", "Path")
            .readonly_field("DirectorySeparatorChar", CHAR, ManagedValue::Char(SEPARATOR))
            .readonly_field(
                "PathSeparator",
                CHAR,
                ManagedValue::Char(if cfg!(windows) { ';' } else { ':' }),
            )
            .static_method("Combine", &[STRING, STRING], STRING, |_, args| {
                Ok(combine(&path_args(args)?).into())
            })
            .static_method("Combine", &[STRING, STRING, STRING], STRING, |_, args| {
                Ok(combine(&path_args(args)?).into())
            })
            .static_method("GetFileName", &[STRING], STRING, |_, args| {
                Ok(args.opt_str_at(0).map(file_name).into())
            })
            .static_method("GetFileNameWithoutExtension", &[STRING], STRING, |_, args| {
                Ok(args
                    .opt_str_at(0)
                    .map(|path| {
                        let name = file_name(path);
                        name.strip_suffix(extension(name)).unwrap_or(name)
                    })
                    .into())
            })
            .static_method("GetExtension", &[STRING], STRING, |_, args| {
                Ok(args.opt_str_at(0).map(extension).into())
            })
            .static_method("HasExtension", &[STRING], BOOL, |_, args| {
                Ok(args.opt_str_at(0).is_some_and(|path| !extension(path).is_empty()).into())
            })
            .static_method("GetDirectoryName", &[STRING], STRING, |_, args| {
                Ok(match args.opt_str_at(0) {
                    Some(path) => ManagedValue::from(directory_name(path).unwrap_or_default()),
                    None => ManagedValue::Null,
                })
            })
            .build(),
    );

    asm.add(
        TypeBuilder::static_class("System.IO", "File")
            .static_method("Exists", &[STRING], BOOL, |_, args| {
                Ok(args
                    .opt_str_at(0)
                    .is_some_and(|path| std::path::Path::new(path).is_file())
                    .into())
            })
            .static_method("ReadAllText", &[STRING], STRING, |ctx, args| {
                let path = args.str_at(0)?;
                std::fs::read_to_string(path).map(Into::into).map_err(|e| {
                    let kind = if e.kind() == std::io::ErrorKind::NotFound {
                        "System.IO.FileNotFoundException"
                    } else {
                        "System.IO.IOException"
                    };
                    ctx.throw(kind, format!("Could not read file '{}'. {}", path, e))
                })
            })
            .static_method("WriteAllText", &[STRING, STRING], VOID, |ctx, args| {
                let path = args.str_at(0)?;
                let contents = args.opt_str_at(1).unwrap_or_default();
                std::fs::write(path, contents)
                    .map(|()| ManagedValue::Void)
                    .map_err(|e| {
                        ctx.throw(
                            "System.IO.IOException",
                            format!("Could not write file '{}'. {}", path, e),
                        )
                    })
            })
            .build(),
    );
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    register_streams(asm);
    register_path(asm);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bcl::testing::{construct, get_property, runtime};

    #[test]
    fn test_path_helpers() {
        let sep = SEPARATOR.to_string();
        assert_eq!(combine(&["a", "b"]), format!("a{}b", sep));
        assert_eq!(combine(&["a", "/b", "c"]), format!("/b{}c", sep));
        assert_eq!(extension("dir/file.tar.gz"), ".gz");
        assert_eq!(extension("dir.d/file"), "");
        assert_eq!(file_name("/x/y.txt"), "y.txt");
        assert_eq!(directory_name("/x/y.txt").as_deref(), Some("/x"));
        assert_eq!(directory_name("y.txt"), None);
        assert_eq!(directory_name("/y.txt").as_deref(), Some("/"));
    }

    #[test]
    fn test_memory_stream() {
        let runtime = runtime();
        let stream = construct(&runtime, "System.IO.MemoryStream", &[], &[]).unwrap();
        for byte in [1u8, 2, 3] {
            runtime
                .call_method(&stream, "WriteByte", &[ManagedValue::U1(byte)])
                .unwrap();
        }
        assert_eq!(get_property(&runtime, &stream, "Length"), Ok(ManagedValue::I8(3)));

        crate::runtime::bcl::testing::set_property(&runtime, &stream, "Position", ManagedValue::I8(1))
            .unwrap();
        assert_eq!(
            runtime.call_method(&stream, "ReadByte", &[]),
            Ok(ManagedValue::I4(2))
        );

        runtime.call_method(&stream, "Close", &[]).unwrap();
        assert_eq!(get_property(&runtime, &stream, "CanRead"), Ok(ManagedValue::Bool(false)));
        let fault = runtime.call_method(&stream, "ReadByte", &[]).unwrap_err();
        assert_eq!(fault.type_name(), "System.ObjectDisposedException");
    }

    #[test]
    fn test_stream_is_abstract() {
        let runtime = runtime();
        let stream = runtime.registry().get("System.IO.Stream").unwrap();
        assert!(stream.is_abstract());
    }
}
