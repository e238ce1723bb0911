//! Declared tool parameters and the argument maps supplied at call time.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Arguments for one call, keyed by parameter name.
pub type Args = serde_json::Map<String, Value>;

/// Parameter declarations for one tool, keyed by name.
pub type ParamSchema = BTreeMap<String, ParamSpec>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    /// `number` and `integer` are both carried as doubles.
    Number,
    Boolean,
}

impl ParamType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" | "string" => Some(ParamType::String),
            "number" | "integer" => Some(ParamType::Number),
            "boolean" | "bool" => Some(ParamType::Boolean),
            _ => None,
        }
    }

    /// Value bound for a declared parameter the caller left out.
    pub fn zero_value(self) -> Value {
        match self {
            ParamType::String => Value::String(String::new()),
            ParamType::Number => Value::from(0.0),
            ParamType::Boolean => Value::Bool(false),
        }
    }

    /// Converts a textual argument, such as one typed on a command line, to
    /// a value of this type. Strings are taken verbatim.
    pub fn parse_text(self, raw: &str) -> Result<Value, String> {
        match self {
            ParamType::String => Ok(Value::String(raw.to_string())),
            ParamType::Number => {
                let trimmed = raw.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                match trimmed.parse::<f64>() {
                    Ok(f) if f.is_finite() => Ok(Value::from(f)),
                    _ => Err(format!("expected a number, got {raw:?}")),
                }
            }
            ParamType::Boolean => raw
                .trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| format!("expected true or false, got {raw:?}")),
        }
    }

    /// Name used in the JSON schema advertised to callers.
    pub fn json_schema_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ParamSpec {
    /// Declared type name. Kept as text so an unsupported type can be
    /// reported by the constraint compiler with context.
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn param_type(&self) -> Option<ParamType> {
        ParamType::parse(&self.kind)
    }
}

/// Fills in declared defaults for parameters that are absent or null.
pub fn apply_defaults(schema: &ParamSchema, args: &mut Args) {
    for (name, spec) in schema {
        let Some(default) = &spec.default else {
            continue;
        };
        let missing = matches!(args.get(name), None | Some(Value::Null));
        if missing {
            args.insert(name.clone(), default.clone());
        }
    }
}

/// Returns a copy of `args` in which every declared parameter is present,
/// using the zero value of its type where the caller supplied nothing.
pub fn with_zero_values(schema: &ParamSchema, args: &Args) -> Args {
    let mut effective = args.clone();
    for (name, spec) in schema {
        let missing = matches!(effective.get(name), None | Some(Value::Null));
        if missing {
            let zero = spec
                .param_type()
                .map(ParamType::zero_value)
                .unwrap_or(Value::Null);
            effective.insert(name.clone(), zero);
        }
    }
    effective
}

/// Renders the declared arguments as `name=value` pairs for diagnostics.
pub fn describe_args(schema: &ParamSchema, args: &Args) -> String {
    schema
        .keys()
        .map(|name| {
            let value = match args.get(name) {
                Some(Value::String(s)) => format!("{s:?}"),
                Some(other) => other.to_string(),
                None => "null".to_string(),
            };
            format!("{name}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> ParamSchema {
        let mut schema = ParamSchema::new();
        schema.insert(
            "name".to_string(),
            ParamSpec {
                kind: "string".to_string(),
                required: true,
                ..Default::default()
            },
        );
        schema.insert(
            "count".to_string(),
            ParamSpec {
                kind: "integer".to_string(),
                default: Some(json!(3)),
                ..Default::default()
            },
        );
        schema.insert(
            "verbose".to_string(),
            ParamSpec {
                kind: "boolean".to_string(),
                ..Default::default()
            },
        );
        schema
    }

    #[test]
    fn zero_values_fill_missing_parameters() {
        let args = Args::new();
        let effective = with_zero_values(&schema(), &args);
        assert_eq!(effective.get("name"), Some(&json!("")));
        assert_eq!(effective.get("count"), Some(&json!(0.0)));
        assert_eq!(effective.get("verbose"), Some(&json!(false)));
    }

    #[test]
    fn defaults_only_replace_absent_values() {
        let mut args = Args::new();
        apply_defaults(&schema(), &mut args);
        assert_eq!(args.get("count"), Some(&json!(3)));

        let mut args = Args::new();
        args.insert("count".to_string(), json!(7));
        apply_defaults(&schema(), &mut args);
        assert_eq!(args.get("count"), Some(&json!(7)));
    }

    #[test]
    fn describe_args_is_sorted_and_quoted() {
        let mut args = Args::new();
        args.insert("name".to_string(), json!("Alice"));
        args.insert("count".to_string(), json!(2));
        assert_eq!(
            describe_args(&schema(), &args),
            "count=2, name=\"Alice\", verbose=null"
        );
    }

    #[test]
    fn unknown_type_names_do_not_parse() {
        assert_eq!(ParamType::parse("integer"), Some(ParamType::Number));
        assert_eq!(ParamType::parse("object"), None);
    }

    #[test]
    fn text_arguments_follow_the_declared_type() {
        assert_eq!(ParamType::String.parse_text("2024"), Ok(json!("2024")));
        assert_eq!(ParamType::String.parse_text("null"), Ok(json!("null")));
        assert_eq!(ParamType::Number.parse_text("3"), Ok(json!(3)));
        assert_eq!(ParamType::Number.parse_text(" 2.5 "), Ok(json!(2.5)));
        assert_eq!(ParamType::Boolean.parse_text("true"), Ok(json!(true)));
        assert!(ParamType::Number.parse_text("three").is_err());
        assert!(ParamType::Number.parse_text("NaN").is_err());
        assert!(ParamType::Boolean.parse_text("yes").is_err());
    }
}
