use std::{
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use mlua::{Function, Lua, Table, Value, Variadic};
use rml_core::PermissionLevel;

use crate::{BridgeProvider, BridgeValue};

/// Resolves the permission level of whatever thread is currently running in
/// the VM.
///
/// The bridge keeps no identity state of its own; the embedder supplies the
/// lookup when it installs the globals, and every privileged entry point
/// consults it before touching the provider.
pub type PermissionSource = Arc<dyn Fn(&Lua) -> PermissionLevel + Send + Sync>;

fn check_bridge_access(
    permissions: &PermissionSource,
    lua: &Lua,
    op: &'static str,
) -> mlua::Result<()> {
    if permissions(lua) >= PermissionLevel::Bridge {
        Ok(())
    } else {
        Err(mlua::Error::RuntimeError(format!(
            "rml.bridge.{op}: permission denied"
        )))
    }
}

/// Metadata the `rml.mod` table exposes to a mod's own scripts.
#[derive(Debug, Clone, Default)]
pub struct ModInfo {
    /// The mod's name.
    pub name: String,
    /// Version string from the manifest.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Author string from the manifest.
    pub author: String,
    /// The mod's root directory.
    pub path: PathBuf,
    /// Names of mods this one depends on.
    pub dependencies: Vec<String>,
}

fn render(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_owned(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

fn render_all(args: &Variadic<Value>) -> String {
    args.iter().map(render).collect::<Vec<_>>().join(" ")
}

/// Installs the `rml.*` global table into a VM.
///
/// `rml.logger` routes into the framework's structured logging, `rml.mod`
/// surfaces the owning mod's metadata, `rml.utils` holds small conveniences,
/// and `rml.bridge` is the scripting face of the [`BridgeProvider`].
///
/// Writes through `rml.bridge` (`set_data`, `register`, `call`,
/// `trigger_event`) require the calling thread to hold at least
/// [`PermissionLevel::Bridge`] according to `permissions`; reads stay open.
pub fn install_globals(
    lua: &Lua,
    provider: Arc<BridgeProvider>,
    info: ModInfo,
    permissions: PermissionSource,
) -> mlua::Result<()> {
    let rml = lua.create_table()?;

    rml.set("logger", logger_table(lua, info.name.clone())?)?;
    rml.set("mod", mod_table(lua, &info)?)?;
    rml.set("utils", utils_table(lua)?)?;
    rml.set("bridge", bridge_table(lua, provider, info.name, permissions)?)?;

    lua.globals().set("rml", rml)
}

/// Removes the `rml.*` table again.
pub fn remove_globals(lua: &Lua) -> mlua::Result<()> {
    lua.globals().set("rml", Value::Nil)
}

fn logger_table(lua: &Lua, mod_name: String) -> mlua::Result<Table> {
    let logger = lua.create_table()?;

    macro_rules! level {
        ($name:literal, $macro:ident) => {{
            let mod_name = mod_name.clone();
            logger.set(
                $name,
                lua.create_function(move |_, args: Variadic<Value>| {
                    tracing::$macro!(mod_name = %mod_name, "{}", render_all(&args));
                    Ok(())
                })?,
            )?;
        }};
    }

    level!("debug", debug);
    level!("info", info);
    level!("warn", warn);
    level!("error", error);

    Ok(logger)
}

fn mod_table(lua: &Lua, info: &ModInfo) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    macro_rules! getter {
        ($name:literal, $value:expr) => {{
            let value = $value;
            table.set(
                $name,
                lua.create_function(move |_, ()| Ok(value.clone()))?,
            )?;
        }};
    }

    getter!("get_name", info.name.clone());
    getter!("get_version", info.version.clone());
    getter!("get_description", info.description.clone());
    getter!("get_author", info.author.clone());
    getter!("get_path", info.path.to_string_lossy().to_string());
    getter!("get_dependencies", info.dependencies.clone());

    Ok(table)
}

fn utils_table(lua: &Lua) -> mlua::Result<Table> {
    let utils = lua.create_table()?;

    let string_format: Function = lua
        .globals()
        .get::<Table>("string")?
        .get::<Function>("format")?;
    utils.set(
        "format",
        lua.create_function(move |_, args: Variadic<Value>| {
            string_format.call::<mlua::String>(args)
        })?,
    )?;

    utils.set(
        "timestamp",
        lua.create_function(|_, ()| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(mlua::Error::external)?;
            Ok(now.as_secs_f64())
        })?,
    )?;

    Ok(utils)
}

fn bridge_table(
    lua: &Lua,
    provider: Arc<BridgeProvider>,
    mod_name: String,
    permissions: PermissionSource,
) -> mlua::Result<Table> {
    let bridge = lua.create_table()?;

    {
        let provider = provider.clone();
        let permissions = permissions.clone();
        bridge.set(
            "set_data",
            lua.create_function(move |lua, (key, value): (String, BridgeValue)| {
                check_bridge_access(&permissions, lua, "set_data")?;
                provider.set_data(key, value);
                Ok(())
            })?,
        )?;
    }

    {
        let provider = provider.clone();
        bridge.set(
            "get_data",
            lua.create_function(move |_, key: String| Ok(provider.get_data(&key)))?,
        )?;
    }

    {
        let provider = provider.clone();
        let permissions = permissions.clone();
        bridge.set(
            "call",
            lua.create_function(
                move |lua, (name, args): (String, Variadic<BridgeValue>)| {
                    check_bridge_access(&permissions, lua, "call")?;
                    provider
                        .call_function(&name, &args)
                        .map(Variadic::from_iter)
                        .map_err(mlua::Error::RuntimeError)
                },
            )?,
        )?;
    }

    {
        let provider = provider.clone();
        let permissions = permissions.clone();
        bridge.set(
            "register",
            lua.create_function(move |lua, (name, func): (String, Function)| {
                check_bridge_access(&permissions, lua, "register")?;
                let registered = provider.register_function(
                    &mod_name,
                    &name,
                    Box::new(move |args| {
                        func.call::<Variadic<BridgeValue>>(Variadic::from_iter(
                            args.iter().cloned(),
                        ))
                        .map(|out| out.into_iter().collect())
                        .map_err(|err| err.to_string())
                    }),
                );
                Ok(registered)
            })?,
        )?;
    }

    {
        let provider = provider.clone();
        bridge.set(
            "listen_event",
            lua.create_function(move |_, (event, func): (String, Function)| {
                let id = provider.listen_event(
                    event.clone(),
                    Arc::new(move |args| {
                        if let Err(err) =
                            func.call::<()>(Variadic::from_iter(args.iter().cloned()))
                        {
                            tracing::error!(event = %event, %err, "script event listener failed");
                        }
                    }),
                );
                Ok(id.raw())
            })?,
        )?;
    }

    {
        let provider = provider.clone();
        bridge.set(
            "trigger_event",
            lua.create_function(
                move |lua, (event, args): (String, Variadic<BridgeValue>)| {
                    check_bridge_access(&permissions, lua, "trigger_event")?;
                    Ok(provider.trigger_event(&event, &args))
                },
            )?,
        )?;
    }

    {
        let provider = provider.clone();
        bridge.set(
            "get_mod_list",
            lua.create_function(move |_, ()| Ok(provider.mod_list()))?,
        )?;
    }

    bridge.set(
        "get_function_list",
        lua.create_function(move |_, ()| Ok(provider.function_list()))?,
    )?;

    Ok(bridge)
}
