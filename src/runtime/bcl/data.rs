//! `System.Data`, loaded on demand.
//!
//! | Member | Description |
//! |--------|-------------|
//! | `DataTable()`, `DataTable(String)` | Creates a table |
//! | `DataTable.TableName`, `DataTable.Columns` | Table name and column collection |
//! | `DataColumnCollection.Add(String)` | Appends a column, `DuplicateNameException` on clashes |
//! | `DataColumnCollection.Count`, `Item[Int32]`, `Contains(String)` | Column lookup |
//! | `DataColumn.ColumnName`, `DataColumn.Ordinal` | Column identity |
//! | `ConnectionState` | Connection state flags |

use std::sync::RwLock;

use crate::runtime::{
    bcl::{BOOL, I4, STRING},
    ArgsExt, AssemblyDef, CallContext, ManagedResult, ManagedValue, ObjectRef, TypeBuilder,
    TypeSig,
};

const COLUMN: &str = "System.Data.DataColumn";
const COLLECTION: &str = "System.Data.DataColumnCollection";

#[derive(Default)]
struct ColumnsState {
    columns: RwLock<Vec<ObjectRef>>,
}

fn column_name(column: &ObjectRef) -> String {
    column
        .field("_columnName")
        .and_then(|name| name.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn add_column(ctx: &CallContext<'_>, name: &str) -> ManagedResult {
    let state = ctx.native::<ColumnsState>()?;
    let mut columns = write_lock!(state.columns);
    if columns
        .iter()
        .any(|column| column_name(column).eq_ignore_ascii_case(name))
    {
        return Err(ctx.throw(
            "System.Data.DuplicateNameException",
            format!("A column named '{}' already belongs to this DataTable.", name),
        ));
    }

    let column = ctx.runtime().allocate(COLUMN)?;
    column.set_field("_columnName", name.into());
    column.set_field(
        "_ordinal",
        ManagedValue::I4(i32::try_from(columns.len()).unwrap_or(i32::MAX)),
    );
    columns.push(column.clone());
    Ok(column.into())
}

pub(crate) fn register(asm: &mut AssemblyDef) {
    asm.add(
        TypeBuilder::enumeration("System.Data", "ConnectionState")
            .constant("Closed", I4, ManagedValue::I4(0))
            .constant("Open", I4, ManagedValue::I4(1))
            .constant("Connecting", I4, ManagedValue::I4(2))
            .constant("Executing", I4, ManagedValue::I4(4))
            .constant("Fetching", I4, ManagedValue::I4(8))
            .constant("Broken", I4, ManagedValue::I4(16))
            .build(),
    );

    asm.add(
        TypeBuilder::class("System.Data", "DataException")
            .extends("System.SystemException")
            .build(),
    );
    asm.add(
        TypeBuilder::class("System.Data", "DuplicateNameException")
            .extends("System.Data.DataException")
            .build(),
    );

    asm.add(
        TypeBuilder::class("System.Data", "DataColumn")
            .private_field("_columnName", STRING)
            .private_field("_ordinal", I4)
            .constructor(&[STRING], |ctx, args| {
                ctx.set_field("_columnName", args.value_at(0).clone())?;
                ctx.set_field("_ordinal", ManagedValue::I4(-1))?;
                Ok(ManagedValue::Void)
            })
            .property("ColumnName", STRING, |ctx, _| ctx.field("_columnName"))
            .property("Ordinal", I4, |ctx, _| ctx.field("_ordinal"))
            .method("ToString", &[], STRING, |ctx, _| ctx.field("_columnName"))
            .build(),
    );

    asm.add(
        TypeBuilder::class("System.Data", "DataColumnCollection")
            .sealed()
            .method("Add", &[STRING], TypeSig::class(COLUMN), |ctx, args| {
                add_column(ctx, args.str_at(0)?)
            })
            .property("Count", I4, |ctx, _| {
                let state = ctx.native::<ColumnsState>()?;
                let len = read_lock!(state.columns).len();
                Ok(ManagedValue::I4(i32::try_from(len).unwrap_or(i32::MAX)))
            })
            .method("Contains", &[STRING], BOOL, |ctx, args| {
                let name = args.str_at(0)?;
                let state = ctx.native::<ColumnsState>()?;
                let found = read_lock!(state.columns)
                    .iter()
                    .any(|column| column_name(column).eq_ignore_ascii_case(name));
                Ok(found.into())
            })
            .indexer(
                "Item",
                &[I4],
                TypeSig::class(COLUMN),
                |ctx, args| {
                    let state = ctx.native::<ColumnsState>()?;
                    let columns = read_lock!(state.columns);
                    usize::try_from(args.i32_at(0)?)
                        .ok()
                        .and_then(|index| columns.get(index))
                        .map(|column| ManagedValue::Object(column.clone()))
                        .ok_or_else(|| {
                            ctx.throw(
                                "System.IndexOutOfRangeException",
                                format!("Cannot find column {}.", args.value_at(0).as_i64().unwrap_or(-1)),
                            )
                        })
                },
                |ctx, _| Err(ctx.throw("System.NotSupportedException", "Collection is read-only.")),
            )
            .build(),
    );

    asm.add(
        TypeBuilder::class("System.Data", "DataTable")
            .private_field("_tableName", STRING)
            .private_field("_columns", TypeSig::class(COLLECTION))
            .constructor(&[], |ctx, _| initialise(ctx, ""))
            .constructor(&[STRING], |ctx, args| initialise(ctx, args.str_at(0)?))
            .property_rw(
                "TableName",
                STRING,
                |ctx, _| ctx.field("_tableName"),
                |ctx, args| {
                    let name = args.opt_str_at(0).unwrap_or_default();
                    ctx.set_field("_tableName", name.into())?;
                    Ok(ManagedValue::Void)
                },
            )
            .property("Columns", TypeSig::class(COLLECTION), |ctx, _| {
                ctx.field("_columns")
            })
            .method("ToString", &[], STRING, |ctx, _| ctx.field("_tableName"))
            .build(),
    );
}

fn initialise(ctx: &CallContext<'_>, name: &str) -> ManagedResult {
    let columns = ctx.runtime().allocate(COLLECTION)?;
    columns.set_native(ColumnsState::default());
    ctx.set_field("_columns", columns.into())?;
    ctx.set_field("_tableName", name.into())?;
    Ok(ManagedValue::Void)
}

#[cfg(test)]
mod tests {
    use crate::runtime::bcl::testing::{construct, get_property, runtime};
    use crate::runtime::bcl::STRING;
    use crate::runtime::{ManagedValue, RuntimeHost};

    #[test]
    fn test_columns() {
        let runtime = runtime();
        runtime.load_assembly("System.Data").unwrap();
        let table = construct(&runtime, "System.Data.DataTable", &[STRING], &["People".into()])
            .unwrap();
        assert_eq!(get_property(&runtime, &table, "TableName"), Ok("People".into()));

        let columns = get_property(&runtime, &table, "Columns").unwrap();
        let columns = columns.as_object().unwrap();
        let id = runtime.call_method(columns, "Add", &["Id".into()]).unwrap();
        runtime.call_method(columns, "Add", &["Name".into()]).unwrap();

        assert_eq!(get_property(&runtime, columns, "Count"), Ok(ManagedValue::I4(2)));
        assert_eq!(
            get_property(&runtime, id.as_object().unwrap(), "Ordinal"),
            Ok(ManagedValue::I4(0))
        );
        assert_eq!(
            runtime.call_method(columns, "Contains", &["name".into()]),
            Ok(true.into())
        );

        let fault = runtime.call_method(columns, "Add", &["ID".into()]).unwrap_err();
        assert_eq!(fault.type_name(), "System.Data.DuplicateNameException");
        assert!(fault.exception().is_some());
    }
}
