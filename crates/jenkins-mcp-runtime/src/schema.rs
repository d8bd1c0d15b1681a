//! Declared tool parameters and argument validation.
//!
//! Every tool declares its parameters as a list of [`ParamSpec`]s. Incoming
//! arguments are checked against that list before any handler runs, and the
//! same list produces the JSON Schema advertised to clients.

use serde_json::{Map, Value};

use crate::ToolError;

/// Accepted shape of one parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Any string. `non_empty` rejects blank values.
    String { non_empty: bool },
    /// A whole number no smaller than `min`.
    Integer { min: u64 },
    /// A build number (>= 1) or the keyword `"latest"`.
    BuildSelector,
    /// An object whose values are all strings.
    StringMap,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    /// Filled in when the argument is absent.
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        match self.kind {
            ParamType::String { non_empty } => match value.as_str() {
                Some(s) if non_empty && s.trim().is_empty() => Err("must not be empty".to_string()),
                Some(_) => Ok(()),
                None => Err(format!("expected a string, got {}", type_name(value))),
            },
            ParamType::Integer { min } => match value.as_u64() {
                Some(n) if n >= min => Ok(()),
                Some(n) => Err(format!("must be at least {min}, got {n}")),
                None => Err(format!(
                    "expected an integer >= {min}, got {}",
                    describe(value)
                )),
            },
            ParamType::BuildSelector => match value {
                Value::Number(n) if n.as_u64().is_some_and(|n| n >= 1 && n <= u64::from(u32::MAX)) => Ok(()),
                Value::String(s) if s.eq_ignore_ascii_case("latest") => Ok(()),
                other => Err(format!(
                    "expected a build number or \"latest\", got {}",
                    describe(other)
                )),
            },
            ParamType::StringMap => match value {
                Value::Object(map) => map
                    .iter()
                    .find(|(_, v)| !v.is_string())
                    .map_or(Ok(()), |(key, v)| {
                        Err(format!(
                            "value of '{key}' must be a string, got {}",
                            type_name(v)
                        ))
                    }),
                other => Err(format!("expected an object, got {}", type_name(other))),
            },
        }
    }

    fn json_schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamType::String { non_empty } => {
                let mut s = serde_json::json!({ "type": "string" });
                if non_empty {
                    s["minLength"] = Value::from(1);
                }
                s
            }
            ParamType::Integer { min } => serde_json::json!({ "type": "integer", "minimum": min }),
            ParamType::BuildSelector => serde_json::json!({
                "oneOf": [
                    { "type": "integer", "minimum": 1 },
                    { "type": "string", "enum": ["latest"] }
                ]
            }),
            ParamType::StringMap => serde_json::json!({
                "type": "object",
                "additionalProperties": { "type": "string" }
            }),
        };
        schema["description"] = Value::from(self.description);
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        schema
    }
}

/// Checks `arguments` against `params` and returns them with defaults
/// applied.
///
/// Unknown parameters are rejected so a misspelt optional argument is not
/// silently ignored.
///
/// # Errors
///
/// Returns an `InvalidArgument` [`ToolError`] naming the first offending
/// parameter.
pub fn validate(
    tool: &str,
    params: &[ParamSpec],
    arguments: &Map<String, Value>,
) -> Result<Map<String, Value>, ToolError> {
    if let Some(unknown) = arguments
        .keys()
        .find(|key| !params.iter().any(|p| p.name == key.as_str()))
    {
        let expected: Vec<_> = params.iter().map(|p| p.name).collect();
        return Err(ToolError::invalid_argument(if expected.is_empty() {
            format!("{tool}: unexpected parameter '{unknown}'; this tool takes none")
        } else {
            format!(
                "{tool}: unexpected parameter '{unknown}'; expected one of: {}",
                expected.join(", ")
            )
        }));
    }

    let mut validated = Map::new();
    for param in params {
        match arguments.get(param.name) {
            // Explicit null counts as absent.
            Some(Value::Null) | None => {
                if param.required {
                    return Err(ToolError::invalid_argument(format!(
                        "{tool}: missing required parameter '{}'",
                        param.name
                    )));
                }
                if let Some(default) = &param.default {
                    validated.insert(param.name.to_string(), default.clone());
                }
            }
            Some(value) => {
                param.check(value).map_err(|reason| {
                    ToolError::invalid_argument(format!("{tool}: parameter '{}' {reason}", param.name))
                })?;
                validated.insert(param.name.to_string(), value.clone());
            }
        }
    }
    Ok(validated)
}

/// JSON Schema of a parameter list, as advertised in tool listings.
pub fn input_schema(params: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.to_string(), p.json_schema()))
        .collect();
    let required: Vec<&str> = params.iter().filter(|p| p.required).map(|p| p.name).collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{s}\""),
        other => type_name(other).to_string(),
    }
}
