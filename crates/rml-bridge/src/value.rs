use mlua::{FromLua, IntoLua, Lua, Value};

/// The closed set of values that cross the bridge.
///
/// Everything mods exchange through shared data, native-function arguments,
/// and event payloads is one of these; functions, userdata, and other
/// VM-only values are rejected at the boundary rather than smuggled across.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeValue {
    /// Absence of a value.
    Nil,
    /// A boolean.
    Bool(bool),
    /// A number. Lua integers are widened.
    Number(f64),
    /// A string.
    String(String),
    /// A table, as ordered key/value pairs.
    Table(Vec<(BridgeValue, BridgeValue)>),
}

impl BridgeValue {
    /// Returns `true` for [`BridgeValue::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, BridgeValue::Nil)
    }

    /// The number, if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            BridgeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BridgeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for BridgeValue {
    fn from(value: bool) -> Self {
        BridgeValue::Bool(value)
    }
}

impl From<f64> for BridgeValue {
    fn from(value: f64) -> Self {
        BridgeValue::Number(value)
    }
}

impl From<&str> for BridgeValue {
    fn from(value: &str) -> Self {
        BridgeValue::String(value.to_owned())
    }
}

impl From<String> for BridgeValue {
    fn from(value: String) -> Self {
        BridgeValue::String(value)
    }
}

/// Deepest table nesting accepted when converting from Lua. Anything real
/// stays far below this; a self-referential table hits the cap instead of
/// recursing until the stack runs out.
const MAX_TABLE_DEPTH: usize = 32;

impl FromLua for BridgeValue {
    fn from_lua(value: Value, lua: &Lua) -> mlua::Result<Self> {
        from_lua_bounded(value, lua, 0)
    }
}

fn from_lua_bounded(value: Value, lua: &Lua, depth: usize) -> mlua::Result<BridgeValue> {
    match value {
        Value::Nil => Ok(BridgeValue::Nil),
        Value::Boolean(b) => Ok(BridgeValue::Bool(b)),
        Value::Integer(i) => Ok(BridgeValue::Number(i as f64)),
        Value::Number(n) => Ok(BridgeValue::Number(n)),
        Value::String(s) => Ok(BridgeValue::String(s.to_str()?.to_owned())),
        Value::Table(table) => {
            if depth >= MAX_TABLE_DEPTH {
                return Err(mlua::Error::FromLuaConversionError {
                    from: "table",
                    to: "BridgeValue".to_owned(),
                    message: Some("table nests too deep or references itself".to_owned()),
                });
            }

            let mut pairs = Vec::new();
            for pair in table.pairs::<Value, Value>() {
                let (key, value) = pair?;
                pairs.push((
                    from_lua_bounded(key, lua, depth + 1)?,
                    from_lua_bounded(value, lua, depth + 1)?,
                ));
            }
            Ok(BridgeValue::Table(pairs))
        }
        other => Err(mlua::Error::FromLuaConversionError {
            from: other.type_name(),
            to: "BridgeValue".to_owned(),
            message: Some("only nil, boolean, number, string and table cross the bridge".to_owned()),
        }),
    }
}

impl IntoLua for BridgeValue {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            BridgeValue::Nil => Value::Nil,
            BridgeValue::Bool(b) => Value::Boolean(b),
            BridgeValue::Number(n) => Value::Number(n),
            BridgeValue::String(s) => Value::String(lua.create_string(&s)?),
            BridgeValue::Table(pairs) => {
                let table = lua.create_table_with_capacity(0, pairs.len())?;
                for (key, value) in pairs {
                    table.set(key.into_lua(lua)?, value.into_lua(lua)?)?;
                }
                Value::Table(table)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let lua = Lua::new();

        for value in [
            BridgeValue::Nil,
            BridgeValue::Bool(true),
            BridgeValue::Number(1.5),
            BridgeValue::String("hello".to_owned()),
        ] {
            let lua_value = value.clone().into_lua(&lua).unwrap();
            assert_eq!(BridgeValue::from_lua(lua_value, &lua).unwrap(), value);
        }
    }

    #[test]
    fn tables_carry_their_pairs() {
        let lua = Lua::new();

        let table: mlua::Table = lua.load("return { answer = 42 }").eval().unwrap();
        let bridged = BridgeValue::from_lua(Value::Table(table), &lua).unwrap();

        let BridgeValue::Table(pairs) = bridged else {
            panic!("expected a table");
        };
        assert_eq!(
            pairs,
            vec![(
                BridgeValue::String("answer".to_owned()),
                BridgeValue::Number(42.0)
            )]
        );
    }

    #[test]
    fn self_referential_tables_are_rejected() {
        let lua = Lua::new();

        let table: mlua::Table = lua
            .load("local t = {}; t.inner = t; return t")
            .eval()
            .unwrap();

        let err = BridgeValue::from_lua(Value::Table(table), &lua).unwrap_err();
        assert!(err.to_string().contains("nests too deep"), "{err}");
    }

    #[test]
    fn deep_but_finite_tables_convert() {
        let lua = Lua::new();

        let table: mlua::Table = lua
            .load(
                r#"
                    local t = { leaf = 1 }
                    for _ = 1, 8 do t = { inner = t } end
                    return t
                "#,
            )
            .eval()
            .unwrap();

        assert!(BridgeValue::from_lua(Value::Table(table), &lua).is_ok());
    }

    #[test]
    fn functions_are_rejected() {
        let lua = Lua::new();

        let func: mlua::Function = lua.load("return function() end").eval().unwrap();
        assert!(BridgeValue::from_lua(Value::Function(func), &lua).is_err());
    }
}
