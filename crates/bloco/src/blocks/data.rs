//! Variable and list blocks.
//!
//! List indices are 0-based at the block boundary. Out-of-range reads are
//! execution errors; out-of-range deletes are no-ops; a replace past the
//! end appends. Negative indices on reads count from the end.

use crate::context::ExecCtx;
use crate::error::ExecError;
use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::{Args, Outcome};
use crate::value::Value;
use crate::variables::VariableRef;

/// Reads the list variable bound to `name`, coercing scalars the way the
/// editor does (a string becomes its characters).
fn list_of(ctx: &ExecCtx<'_>, args: &Args, name: &str) -> Result<(VariableRef, Vec<Value>), ExecError> {
    let var_ref = args.reference(name)?.clone();
    let items = ctx.get_variable(&var_ref)?.into_list()?;
    Ok((var_ref, items))
}

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("data_setvariableto", |ctx, args| {
            let var_ref = args.reference("variable")?.clone();
            let value = args.value("value")?.clone();
            ctx.set_variable(var_ref, value);
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("variable"), ParamSpec::value("value")]),
    );

    registry.register(
        BlockDefinition::new("data_changevariableby", |ctx, args| {
            let var_ref = args.reference("variable")?.clone();
            let current = ctx.get_variable(&var_ref)?.as_num()?;
            let delta = args.num("value")?;
            ctx.set_variable(var_ref, Value::Num(current + delta));
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("variable"), ParamSpec::value("value")]),
    );

    registry.register(
        BlockDefinition::new("data_variable", |ctx, args| {
            Ok(Outcome::Value(ctx.get_variable(args.reference("variable")?)?))
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("variable")]),
    );

    // Show/hide only matter to the editor's stage; the engine treats them
    // as plain statements.
    for kind in ["data_showvariable", "data_hidevariable"] {
        registry.register(
            BlockDefinition::new(kind, |_ctx, _args| Ok(Outcome::next()))
                .category("data")
                .predefined()
                .params(vec![ParamSpec::reference("variable")]),
        );
    }
    for kind in ["data_showlist", "data_hidelist"] {
        registry.register(
            BlockDefinition::new(kind, |_ctx, _args| Ok(Outcome::next()))
                .category("data")
                .predefined()
                .params(vec![ParamSpec::reference("list")]),
        );
    }

    registry.register(
        BlockDefinition::new("data_addtolist", |ctx, args| {
            let (var_ref, mut items) = list_of(ctx, args, "list")?;
            items.push(args.value("item")?.clone());
            ctx.set_variable(var_ref, Value::List(items));
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list"), ParamSpec::value("item")]),
    );

    registry.register(
        BlockDefinition::new("data_insertatlist", |ctx, args| {
            let (var_ref, mut items) = list_of(ctx, args, "list")?;
            let mut index = args.int("index")?;
            if index < 0 {
                index += items.len() as i64;
            }
            let index = index.clamp(0, items.len() as i64) as usize;
            items.insert(index, args.value("item")?.clone());
            ctx.set_variable(var_ref, Value::List(items));
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![
            ParamSpec::reference("list"),
            ParamSpec::value("item"),
            ParamSpec::value("index"),
        ]),
    );

    registry.register(
        BlockDefinition::new("data_deleteoflist", |ctx, args| {
            let (var_ref, mut items) = list_of(ctx, args, "list")?;
            let index = args.int("index")?;
            if index >= 0 && (index as usize) < items.len() {
                items.remove(index as usize);
            }
            ctx.set_variable(var_ref, Value::List(items));
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list"), ParamSpec::value("index")]),
    );

    registry.register(
        BlockDefinition::new("data_replaceitemoflist", |ctx, args| {
            let (var_ref, mut items) = list_of(ctx, args, "list")?;
            let index = args.int("index")?;
            let item = args.value("item")?.clone();
            if index >= 0 {
                if (index as usize) < items.len() {
                    items[index as usize] = item;
                } else {
                    items.push(item);
                }
            }
            ctx.set_variable(var_ref, Value::List(items));
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![
            ParamSpec::reference("list"),
            ParamSpec::value("index"),
            ParamSpec::value("item"),
        ]),
    );

    registry.register(
        BlockDefinition::new("data_itemoflist", |ctx, args| {
            let (_, items) = list_of(ctx, args, "list")?;
            let mut index = args.int("index")?;
            if index < 0 {
                index += items.len() as i64;
            }
            if index < 0 || index as usize >= items.len() {
                return Err(ExecError::execution("list index out of range"));
            }
            Ok(Outcome::Value(items[index as usize].clone()))
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list"), ParamSpec::value("index")]),
    );

    registry.register(
        BlockDefinition::new("data_itemnumoflist", |ctx, args| {
            let (_, items) = list_of(ctx, args, "list")?;
            let item = args.value("item")?;
            let index = items
                .iter()
                .position(|candidate| candidate == item)
                .map_or(-1.0, |i| i as f64);
            Ok(Outcome::Value(Value::Num(index)))
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list"), ParamSpec::value("item")]),
    );

    registry.register(
        BlockDefinition::new("data_lengthoflist", |ctx, args| {
            let (_, items) = list_of(ctx, args, "list")?;
            Ok(Outcome::Value(Value::Num(items.len() as f64)))
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list")]),
    );

    registry.register(
        BlockDefinition::new("data_listcontents", |ctx, args| {
            let (_, items) = list_of(ctx, args, "list")?;
            Ok(Outcome::Value(Value::List(items)))
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list")]),
    );

    registry.register(
        BlockDefinition::new("data_listcontainsitem", |ctx, args| {
            let (_, items) = list_of(ctx, args, "list")?;
            let item = args.value("item")?;
            Ok(Outcome::Value(Value::Bool(items.contains(item))))
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list"), ParamSpec::value("item")]),
    );

    registry.register(
        BlockDefinition::new("data_deletealloflist", |ctx, args| {
            let var_ref = args.reference("list")?.clone();
            ctx.set_variable(var_ref, Value::List(Vec::new()));
            Ok(Outcome::next())
        })
        .category("data")
        .predefined()
        .params(vec![ParamSpec::reference("list")]),
    );
}
