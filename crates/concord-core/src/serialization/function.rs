//! Functions carried as source text.
//!
//! A [`ScriptFunction`] holds Lua source plus a context of named values.
//! The source is either a named declaration (`function sum(a, b) ... end`)
//! or an anonymous function expression (`function(a, b) ... end`).
//!
//! Calls run in a fresh Lua state with a whitelist-only environment:
//! - core functions (`tostring`, `pairs`, `error`, ...),
//! - the `math`, `string` and `table` libraries,
//! - the context entries as globals.

use crate::{ConcordError, ObjectMap, Value};
use mlua::{Lua, LuaSerdeExt, MultiValue, Table};

const SAFE_GLOBALS: [&str; 15] = [
    "assert", "error", "ipairs", "next", "pairs", "pcall", "select", "tonumber", "tostring",
    "type", "unpack", "math", "string", "table", "utf8",
];

impl From<mlua::Error> for ConcordError {
    fn from(err: mlua::Error) -> Self {
        Self::Function(err.to_string())
    }
}

/// A function serialized as Lua source, with captured context values.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFunction {
    source: String,
    name: String,
    context: ObjectMap,
}

impl ScriptFunction {
    /// Compile `source`, failing if it is not a function definition or
    /// does not parse.
    pub fn compile(source: impl Into<String>) -> Result<Self, ConcordError> {
        Self::with_context(source, ObjectMap::new())
    }

    /// Compile `source` with context values visible to the function body.
    pub fn with_context(source: impl Into<String>, context: ObjectMap) -> Result<Self, ConcordError> {
        let source = source.into();
        let name = parse_function_name(&source)?;
        let function = Self {
            source,
            name,
            context,
        };

        let lua = Lua::new();
        lua.load(function.chunk_source().as_str())
            .set_name(function.chunk_name())
            .into_function()?;
        Ok(function)
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The declared name, or `""` for an anonymous function.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn context(&self) -> &ObjectMap {
        &self.context
    }

    fn chunk_source(&self) -> String {
        if self.name.is_empty() {
            format!("return {}", self.source)
        } else {
            self.source.clone()
        }
    }

    fn chunk_name(&self) -> String {
        if self.name.is_empty() {
            "=function".to_string()
        } else {
            format!("={}", self.name)
        }
    }

    /// Call the function with plain values.
    ///
    /// Arguments and results cross the boundary as plain JSON, so
    /// components and functions cannot be passed. A `nil` result is
    /// returned as `undefined`.
    pub fn call(&self, args: &[Value]) -> Result<Value, ConcordError> {
        let lua = Lua::new();
        let env = self.build_env(&lua)?;

        let function: mlua::Function = if self.name.is_empty() {
            lua.load(self.chunk_source().as_str())
                .set_name(self.chunk_name())
                .set_environment(env)
                .eval()?
        } else {
            lua.load(self.source.as_str())
                .set_name(self.chunk_name())
                .set_environment(env.clone())
                .exec()?;
            env.get(self.name.as_str())?
        };

        let args = args
            .iter()
            .map(|arg| lua.to_value(&arg.to_plain_json()?).map_err(ConcordError::from))
            .collect::<Result<Vec<_>, ConcordError>>()?;
        let result: mlua::Value = function.call(MultiValue::from_iter(args))?;

        if result.is_nil() {
            return Ok(Value::Undefined);
        }
        let json: serde_json::Value = lua.from_value(result)?;
        Ok(Value::from_plain_json(&json))
    }

    fn build_env(&self, lua: &Lua) -> Result<Table, ConcordError> {
        let env = lua.create_table()?;
        let globals = lua.globals();
        for name in SAFE_GLOBALS {
            let value: mlua::Value = globals.get(name)?;
            if !value.is_nil() {
                env.set(name, value)?;
            }
        }
        for (key, value) in &self.context {
            env.set(key.as_str(), lua.to_value(&value.to_plain_json()?)?)?;
        }
        Ok(env)
    }
}

/// Extract `NAME` from `function NAME(...)`; anonymous functions give `""`.
fn parse_function_name(source: &str) -> Result<String, ConcordError> {
    let rest = source
        .trim_start()
        .strip_prefix("function")
        .ok_or_else(|| ConcordError::Function("the source is not a function definition".into()))?;
    let Some(open) = rest.find('(') else {
        return Err(ConcordError::Function(
            "the function definition has no parameter list".into(),
        ));
    };
    let name = rest[..open].trim();
    if !name.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(ConcordError::Function("the source is not a function definition".into()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConcordError::Function(format!("unsupported function name '{name}'")));
    }
    Ok(name.to_string())
}
