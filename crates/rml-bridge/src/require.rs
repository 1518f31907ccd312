use std::path::{Path, PathBuf};

use mlua::{Lua, MultiValue, Table, Value};

const ORIGINAL_KEY: &str = "rml.require.original";
const CACHE_KEY: &str = "rml.require.cache";

/// The custom `require()` installed into each mod VM.
///
/// String module names resolve through the framework's own search order;
/// anything else (userdata, host-native module objects) delegates straight
/// to whatever `require` the VM had before installation. Loaded modules are
/// cached per VM by module name, so requiring the same name twice returns
/// the same value without re-executing the module. The cache and the saved
/// original `require` live in the VM registry and are released together by
/// [`uninstall`](Self::uninstall).
pub struct RequireProvider {
    framework_dir: PathBuf,
    scripts_dir: PathBuf,
}

impl RequireProvider {
    /// Creates a provider resolving `@rml/` against `framework_dir` and
    /// `@self/` against the mod's `scripts_dir`.
    pub fn new(framework_dir: impl Into<PathBuf>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            framework_dir: framework_dir.into(),
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Replaces the VM's global `require`, keeping the original reachable.
    pub fn install(&self, lua: &Lua) -> mlua::Result<()> {
        let original: Value = lua.globals().get("require")?;
        lua.set_named_registry_value(ORIGINAL_KEY, original)?;
        lua.set_named_registry_value(CACHE_KEY, lua.create_table()?)?;

        let framework_dir = self.framework_dir.clone();
        let scripts_dir = self.scripts_dir.clone();

        let require = lua.create_function(move |lua, args: MultiValue| {
            require_impl(lua, args, &framework_dir, &scripts_dir)
        })?;

        lua.globals().set("require", require)
    }

    /// Restores the original `require` and releases the module cache.
    pub fn uninstall(&self, lua: &Lua) -> mlua::Result<()> {
        let original: Value = lua.named_registry_value(ORIGINAL_KEY)?;
        lua.globals().set("require", original)?;

        lua.unset_named_registry_value(ORIGINAL_KEY)?;
        lua.unset_named_registry_value(CACHE_KEY)
    }
}

fn delegate(lua: &Lua, args: MultiValue) -> mlua::Result<MultiValue> {
    let original: Value = lua.named_registry_value(ORIGINAL_KEY)?;

    match original {
        Value::Function(original) => original.call(args),
        _ => {
            let shown = args
                .front()
                .map(|value| format!("{value:?}"))
                .unwrap_or_default();
            Err(mlua::Error::RuntimeError(format!(
                "module not found: {shown}"
            )))
        }
    }
}

fn require_impl(
    lua: &Lua,
    args: MultiValue,
    framework_dir: &Path,
    scripts_dir: &Path,
) -> mlua::Result<MultiValue> {
    let name = match args.front() {
        Some(Value::String(name)) => name.to_str()?.to_owned(),
        _ => return delegate(lua, args),
    };

    let cache: Table = lua.named_registry_value(CACHE_KEY)?;
    let cached: Value = cache.get(name.as_str())?;
    if !cached.is_nil() {
        return Ok(MultiValue::from_iter([cached]));
    }

    let Some(path) = resolve(&name, framework_dir, scripts_dir) else {
        return delegate(lua, args);
    };

    tracing::debug!(module = name, path = %path.display(), "module resolved");

    let source = std::fs::read_to_string(&path).map_err(mlua::Error::external)?;
    let value: Value = lua
        .load(&source)
        .set_name(format!("@{}", path.display()))
        .eval()?;

    // Modules returning nothing still count as loaded.
    let stored = if value.is_nil() {
        Value::Boolean(true)
    } else {
        value.clone()
    };
    cache.set(name.as_str(), stored)?;

    Ok(MultiValue::from_iter([value]))
}

fn resolve(name: &str, framework_dir: &Path, scripts_dir: &Path) -> Option<PathBuf> {
    let bases: Vec<PathBuf> = if let Some(rest) = name.strip_prefix("@rml/") {
        vec![framework_dir.join(rest)]
    } else if let Some(rest) = name.strip_prefix("@self/") {
        vec![scripts_dir.join(rest)]
    } else {
        // Self-relative wins over plain relative.
        vec![scripts_dir.join(name), PathBuf::from(name)]
    };

    let explicit_extension = name.ends_with(".lua") || name.ends_with(".luau");

    for base in bases {
        if base.is_file() {
            return Some(base);
        }

        if explicit_extension {
            continue;
        }

        for extension in ["lua", "luau"] {
            let mut candidate = base.clone().into_os_string();
            candidate.push(".");
            candidate.push(extension);

            let candidate = PathBuf::from(candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(tag: &str) -> (PathBuf, PathBuf) {
        let root = std::env::temp_dir().join(format!("rml-require-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);

        let framework = root.join("lib");
        let scripts = root.join("mod/scripts");
        std::fs::create_dir_all(&framework).unwrap();
        std::fs::create_dir_all(&scripts).unwrap();

        (framework, scripts)
    }

    #[test]
    fn prefixes_resolve_to_their_directories() {
        let (framework, scripts) = workspace("prefix");

        std::fs::write(framework.join("helpers.lua"), "return 'framework'").unwrap();
        std::fs::write(scripts.join("local.luau"), "return 'mod'").unwrap();

        let lua = Lua::new();
        let provider = RequireProvider::new(&framework, &scripts);
        provider.install(&lua).unwrap();

        let from_framework: String = lua.load("return require('@rml/helpers')").eval().unwrap();
        let from_mod: String = lua.load("return require('@self/local')").eval().unwrap();

        assert_eq!(from_framework, "framework");
        assert_eq!(from_mod, "mod");
    }

    #[test]
    fn bare_names_prefer_the_mod_scripts_dir() {
        let (framework, scripts) = workspace("bare");

        std::fs::write(scripts.join("shared.lua"), "return 'self-relative'").unwrap();

        let lua = Lua::new();
        RequireProvider::new(&framework, &scripts)
            .install(&lua)
            .unwrap();

        let value: String = lua.load("return require('shared')").eval().unwrap();
        assert_eq!(value, "self-relative");
    }

    #[test]
    fn unresolvable_names_fail_without_an_original() {
        let (framework, scripts) = workspace("missing");

        let lua = Lua::new();
        RequireProvider::new(&framework, &scripts)
            .install(&lua)
            .unwrap();

        let result = lua.load("return require('no-such-module')").eval::<Value>();
        assert!(result.is_err());
    }

    #[test]
    fn uninstall_restores_the_previous_require() {
        let (framework, scripts) = workspace("teardown");

        let lua = Lua::new();
        lua.globals()
            .set(
                "require",
                lua.create_function(|_, _: MultiValue| Ok("host require"))
                    .unwrap(),
            )
            .unwrap();

        let provider = RequireProvider::new(&framework, &scripts);
        provider.install(&lua).unwrap();

        // Non-string arguments delegate to the saved original.
        let delegated: String = lua.load("return require(42)").eval().unwrap();
        assert_eq!(delegated, "host require");

        provider.uninstall(&lua).unwrap();

        let restored: String = lua.load("return require('anything')").eval().unwrap();
        assert_eq!(restored, "host require");
    }
}
