//! Argument binding and schema validation.
//!
//! A call's positional and keyword arguments are bound to the endpoint's
//! declared parameters, completed with schema defaults and validated with
//! JSON Schema (Draft 7). The result is an [`ArgumentRecord`]: the
//! canonical input of cache-key derivation and the source of the
//! handler's typed arguments.

use crate::{Error, ErrorContext, Result};
use jsonschema::{Draft, JSONSchema};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;

/// Conventional name of an implicit receiver parameter.
pub const RECEIVER: &str = "self";

/// Raw arguments of one call, before binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Keyword arguments from the fields of a serializable struct.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(keyword) => Ok(Self {
                positional: Vec::new(),
                keyword,
            }),
            Value::Null => Ok(Self::default()),
            other => Err(Error::validation_with_context(
                "arguments must serialize to an object",
                ErrorContext::new()
                    .with_details(format!("got {}", json_type_name(&other)))
                    .with_source("argument_validator"),
            )),
        }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &Map<String, Value> {
        &self.keyword
    }
}

/// A declared endpoint parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: String,
    receiver: bool,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receiver: false,
        }
    }

    /// An implicit receiver: bound like any parameter, never validated
    /// against the schema and never part of the cache key.
    pub fn receiver(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receiver: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_receiver(&self) -> bool {
        self.receiver
    }
}

/// Validated, schema-normalized arguments of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentRecord {
    values: Map<String, Value>,
    receivers: Map<String, Value>,
}

impl ArgumentRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn receiver(&self, name: &str) -> Option<&Value> {
        self.receivers.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Deterministic text form used for hashing.
    ///
    /// Keys are sorted at every nesting level, there is no insignificant
    /// whitespace, every non-ASCII code point is written as a `\uXXXX`
    /// escape, and receiver fields are left out.
    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        write_canonical_object(&self.values, &mut out);
        out
    }

    /// Typed view of the (non-receiver) arguments.
    pub fn deserialize<A: DeserializeOwned>(&self) -> Result<A> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|e| {
            Error::validation_with_context(
                format!("arguments do not match the handler signature: {}", e),
                ErrorContext::new().with_source("argument_validator"),
            )
        })
    }
}

type Normalizer = fn(Value) -> serde_json::Result<Value>;

/// Binds and validates call arguments against a declared parameter list
/// and a JSON Schema describing the non-receiver parameters.
pub struct ArgumentValidator {
    params: Vec<Param>,
    schema: Value,
    compiled: JSONSchema,
    normalize: Option<Normalizer>,
}

impl ArgumentValidator {
    pub fn new(params: Vec<Param>, schema: Value) -> Result<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("Failed to compile argument schema: {}", e),
                    ErrorContext::new().with_source("argument_validator"),
                )
            })?;
        Ok(Self {
            params,
            schema,
            compiled,
            normalize: None,
        })
    }

    /// Parameters and schema derived from an argument type.
    ///
    /// Parameters follow the field declaration order of `A`, which is the
    /// order positional arguments bind in. Bound arguments are passed
    /// through `A` and back, so omitted optional fields, serde defaults and
    /// explicit nulls all reach the same record.
    pub fn for_type<A>() -> Result<Self>
    where
        A: schemars::JsonSchema + Serialize + DeserializeOwned,
    {
        let root = schemars::schema_for!(A);
        let params: Vec<Param> = root
            .schema
            .object
            .as_ref()
            .map(|object| object.properties.keys().map(Param::new).collect())
            .unwrap_or_default();
        let schema = serde_json::to_value(&root)?;
        let mut validator = Self::new(params, schema)?;
        validator.normalize = Some(round_trip::<A>);
        Ok(validator)
    }

    /// A validator accepting exactly the given parameters with any values.
    pub fn permissive<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params: Vec<Param> = names.into_iter().map(Param::new).collect();
        let required: Vec<&str> = params.iter().map(|p| p.name()).collect();
        let schema = serde_json::json!({ "type": "object", "required": required });
        Self::new(params, schema)
    }

    /// Declare an implicit receiver bound before all other parameters.
    pub fn with_receiver(mut self, name: impl Into<String>) -> Self {
        self.params.insert(0, Param::receiver(name));
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Bind `args` to the declared parameters and validate them.
    ///
    /// All violations found are reported together in one
    /// [`Error::Validation`].
    pub fn bind(&self, args: CallArgs) -> Result<ArgumentRecord> {
        let CallArgs {
            positional,
            keyword,
        } = args;
        let mut violations = Vec::new();
        let mut bound = Map::new();

        if positional.len() > self.params.len() {
            violations.push(format!(
                "takes {} positional arguments but {} were given",
                self.params.len(),
                positional.len()
            ));
        }
        for (param, value) in self.params.iter().zip(positional) {
            bound.insert(param.name.clone(), value);
        }

        for (name, value) in keyword {
            if !self.params.iter().any(|p| p.name == name) {
                violations.push(format!("unexpected keyword argument '{}'", name));
            } else if bound.contains_key(&name) {
                violations.push(format!("multiple values for argument '{}'", name));
            } else {
                bound.insert(name, value);
            }
        }

        let mut receivers = Map::new();
        for param in self.params.iter().filter(|p| p.receiver) {
            match bound.remove(&param.name) {
                Some(value) => {
                    receivers.insert(param.name.clone(), value);
                }
                None => violations.push(format!("missing receiver '{}'", param.name)),
            }
        }

        self.fill_defaults(&mut bound);

        let mut instance = Value::Object(bound);
        integral_numbers(&mut instance);
        if let Err(errors) = self.compiled.validate(&instance) {
            for e in errors {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    violations.push(e.to_string());
                } else {
                    violations.push(format!("{}: {}", path, e));
                }
            }
        }

        if !violations.is_empty() {
            return Err(Error::validation_with_context(
                violations.join("; "),
                ErrorContext::new()
                    .with_details(format!("{} violation(s)", violations.len()))
                    .with_source("argument_validator"),
            ));
        }

        if let Some(normalize) = self.normalize {
            instance = normalize(instance).map_err(|e| {
                Error::validation_with_context(
                    format!("arguments do not match the handler signature: {}", e),
                    ErrorContext::new().with_source("argument_validator"),
                )
            })?;
        }

        let values = match instance {
            Value::Object(values) => values,
            _ => Map::new(),
        };
        Ok(ArgumentRecord { values, receivers })
    }

    fn fill_defaults(&self, bound: &mut Map<String, Value>) {
        let Some(properties) = self.schema.get("properties").and_then(Value::as_object) else {
            return;
        };
        for param in self.params.iter().filter(|p| !p.receiver) {
            if bound.contains_key(&param.name) {
                continue;
            }
            if let Some(default) = properties.get(&param.name).and_then(|p| p.get("default")) {
                bound.insert(param.name.clone(), default.clone());
            }
        }
    }
}

fn round_trip<A: Serialize + DeserializeOwned>(value: Value) -> serde_json::Result<Value> {
    serde_json::to_value(serde_json::from_value::<A>(value)?)
}

/// Rewrite floats with no fractional part (`1.0`) as integers.
fn integral_numbers(value: &mut Value) {
    // Largest magnitude an f64 holds without losing integer precision.
    const EXACT: f64 = 9_007_199_254_740_992.0;
    match value {
        Value::Number(n) if n.is_f64() => {
            let Some(f) = n.as_f64() else { return };
            if f.fract() != 0.0 || f.abs() > EXACT {
                return;
            }
            *value = if f < 0.0 {
                Value::from(f as i64)
            } else {
                Value::from(f as u64)
            };
        }
        Value::Array(items) => items.iter_mut().for_each(integral_numbers),
        Value::Object(map) => map.values_mut().for_each(integral_numbers),
        _ => {}
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_ascii_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_object(map, out),
    }
}

fn write_canonical_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_ascii_string(key, out);
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

fn write_ascii_string(s: &str, out: &mut String) {
    out.push('"');
    let mut units = [0u16; 2];
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c.is_ascii_control() || !c.is_ascii() => {
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
