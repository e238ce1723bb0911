//! Boolean policy expressions that gate every tool call.
//!
//! Expressions are written in a small CEL dialect. They are compiled once
//! when a tool is activated, with every declared parameter bound as a typed
//! variable, and evaluated against the arguments of each call. A call may
//! proceed only when every expression evaluates to `true`.

mod eval;
mod parse;

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::Result;
use crate::error::ToolErr;
use crate::params::Args;
use crate::params::ParamSchema;
use crate::params::ParamType;
use crate::params::describe_args;
use crate::params::with_zero_values;
use eval::Activation;
use eval::Value;
use parse::Expr;

/// Outcome of evaluating every constraint for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// One message per failing expression, in declaration order.
    pub failures: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledExpr {
    source: String,
    program: Expr,
}

/// Constraint programs for one tool, compiled against its parameter schema.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    programs: Vec<CompiledExpr>,
    schema: ParamSchema,
    types: HashMap<String, ParamType>,
}

impl CompiledPolicy {
    pub fn compile(expressions: &[String], schema: &ParamSchema) -> Result<Self> {
        let mut types = HashMap::new();
        for (name, spec) in schema {
            let param_type = spec.param_type().ok_or_else(|| ToolErr::Compile {
                expression: format!("parameter {name}"),
                message: format!("unsupported parameter type '{}'", spec.kind),
            })?;
            types.insert(name.clone(), param_type);
        }

        let declared: Vec<String> = schema.keys().cloned().collect();
        let mut programs = Vec::with_capacity(expressions.len());
        for source in expressions {
            let program = parse::parse(source)
                .and_then(|program| eval::check(&program, &declared).map(|()| program))
                .map_err(|message| ToolErr::Compile {
                    expression: source.clone(),
                    message,
                })?;
            programs.push(CompiledExpr {
                source: source.clone(),
                program,
            });
        }
        debug!("compiled {} constraint(s)", programs.len());

        Ok(Self {
            programs,
            schema: schema.clone(),
            types,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Evaluates every expression against `args`.
    ///
    /// Declared parameters missing from `args` are bound to the zero value of
    /// their type. A rejection is reported through [`Verdict`]; an expression
    /// that fails at runtime or yields a non-boolean is an error.
    pub fn evaluate(&self, args: &Args) -> Result<Verdict> {
        if self.programs.is_empty() {
            return Ok(Verdict {
                allowed: true,
                failures: Vec::new(),
            });
        }

        let effective = with_zero_values(&self.schema, args);
        let bindings = self.bind(&effective)?;
        let mut failures = Vec::new();
        for compiled in &self.programs {
            let result = Activation::new(&bindings)
                .eval(&compiled.program)
                .map_err(|message| ToolErr::Eval {
                    expression: compiled.source.clone(),
                    message,
                })?;
            match result {
                Value::Bool(true) => {}
                Value::Bool(false) => {
                    debug!("constraint failed: {}", compiled.source);
                    failures.push(format!(
                        "Constraint '{}' failed with values: {}",
                        compiled.source,
                        describe_args(&self.schema, &effective)
                    ));
                }
                other => {
                    return Err(ToolErr::Eval {
                        expression: compiled.source.clone(),
                        message: format!("expression returned non-boolean value: {other}"),
                    });
                }
            }
        }

        Ok(Verdict {
            allowed: failures.is_empty(),
            failures,
        })
    }

    fn bind(&self, args: &Args) -> Result<HashMap<String, Value>> {
        let mut bindings = HashMap::with_capacity(self.types.len());
        for (name, param_type) in &self.types {
            let raw = args.get(name).unwrap_or(&JsonValue::Null);
            let value = typed_value(*param_type, raw).ok_or_else(|| ToolErr::Eval {
                expression: format!("parameter {name}"),
                message: format!(
                    "expected {} value, got {raw}",
                    param_type.json_schema_type()
                ),
            })?;
            bindings.insert(name.clone(), value);
        }
        Ok(bindings)
    }
}

fn typed_value(param_type: ParamType, raw: &JsonValue) -> Option<Value> {
    match (param_type, raw) {
        (ParamType::String, JsonValue::String(s)) => Some(Value::String(s.clone())),
        (ParamType::Number, JsonValue::Number(n)) => n.as_f64().map(Value::Double),
        (ParamType::Boolean, JsonValue::Bool(b)) => Some(Value::Bool(*b)),
        _ => None,
    }
}
