//! `{{ }}` template rendering for commands, environment values, output
//! prefixes and sandbox folder lists.
//!
//! The syntax is the familiar Go template dialect: `{{ .name }}` reads a
//! parameter, `{{ if }}`/`{{ else }}`/`{{ end }}`, `{{ range }}` and
//! `{{ with }}` control flow, `|` pipelines, and a small function library (see
//! [`funcs`]). A reference to a parameter that was not supplied renders as the
//! empty string.

mod funcs;
mod parse;

use serde_json::Value;
use thiserror::Error;

use crate::params::Args;
use parse::Command;
use parse::Node;
use parse::Operand;
use parse::Pipeline;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("exec error: {0}")]
    Exec(String),
}

type Result<T> = std::result::Result<T, TemplateError>;

/// Largest integer `{{ range N }}` will count up to.
pub const MAX_RANGE_COUNT: u64 = 10_000;

/// Parses and renders `template` against `data` in one step.
pub fn render(template: &str, data: &Args) -> Result<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }
    Template::parse(template)?.render(data)
}

/// A parsed template that can be rendered any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(Self {
            nodes: parse::parse(source)?,
        })
    }

    pub fn render(&self, data: &Args) -> Result<String> {
        let root = Value::Object(data.clone());
        let mut state = State {
            vars: vec![("$".to_string(), root.clone())],
        };
        let mut out = String::new();
        state.walk(&self.nodes, &root, &mut out)?;
        Ok(out)
    }
}

struct State {
    vars: Vec<(String, Value)>,
}

impl State {
    fn walk(&mut self, nodes: &[Node], dot: &Value, out: &mut String) -> Result<()> {
        let scope = self.vars.len();
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    let value = self.eval_pipeline(pipeline, dot)?;
                    if pipeline.decl.is_empty() {
                        out.push_str(&format_value(&value));
                    } else {
                        for name in &pipeline.decl {
                            self.vars.push((name.clone(), value.clone()));
                        }
                    }
                }
                Node::If {
                    branches,
                    else_branch,
                } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if is_truthy(&self.eval_pipeline(cond, dot)?) {
                            self.walk(body, dot, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.walk(else_branch, dot, out)?;
                    }
                }
                Node::With {
                    pipeline,
                    body,
                    else_branch,
                } => {
                    let value = self.eval_pipeline(pipeline, dot)?;
                    if is_truthy(&value) {
                        self.walk(body, &value, out)?;
                    } else {
                        self.walk(else_branch, dot, out)?;
                    }
                }
                Node::Range {
                    pipeline,
                    body,
                    else_branch,
                } => {
                    let value = self.eval_pipeline(pipeline, dot)?;
                    let entries = range_entries(&value)?;
                    if entries.is_empty() {
                        self.walk(else_branch, dot, out)?;
                        continue;
                    }
                    for (key, elem) in entries {
                        let mark = self.vars.len();
                        match pipeline.decl.as_slice() {
                            [elem_var] => self.vars.push((elem_var.clone(), elem.clone())),
                            [key_var, elem_var] => {
                                self.vars.push((key_var.clone(), key));
                                self.vars.push((elem_var.clone(), elem.clone()));
                            }
                            _ => {}
                        }
                        self.walk(body, &elem, out)?;
                        self.vars.truncate(mark);
                    }
                }
            }
        }
        self.vars.truncate(scope);
        Ok(())
    }

    fn eval_pipeline(&mut self, pipeline: &Pipeline, dot: &Value) -> Result<Value> {
        let mut piped: Option<Value> = None;
        for command in &pipeline.commands {
            piped = Some(self.eval_command(command, dot, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn eval_command(
        &mut self,
        command: &Command,
        dot: &Value,
        piped: Option<Value>,
    ) -> Result<Value> {
        let Some((first, rest)) = command.operands.split_first() else {
            return Err(TemplateError::Exec("empty command".to_string()));
        };
        match first {
            Operand::Ident(name) => {
                let mut args = Vec::with_capacity(rest.len() + 1);
                for operand in rest {
                    args.push(self.eval_operand(operand, dot)?);
                }
                args.extend(piped);
                funcs::call(name, &args).map_err(TemplateError::Exec)
            }
            _ if !rest.is_empty() || piped.is_some() => Err(TemplateError::Exec(
                "can't give argument to non-function".to_string(),
            )),
            operand => self.eval_operand(operand, dot),
        }
    }

    fn eval_operand(&mut self, operand: &Operand, dot: &Value) -> Result<Value> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(path) => Ok(lookup(dot, path)),
            Operand::Variable(name, path) => {
                let value = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(var, _)| var == name)
                    .map(|(_, value)| value)
                    .ok_or_else(|| TemplateError::Exec(format!("undefined variable: {name}")))?;
                Ok(lookup(value, path))
            }
            Operand::Str(s) => Ok(Value::String(s.clone())),
            Operand::Number(n) => Ok(number_value(*n)),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::Nil => Ok(Value::Null),
            Operand::Ident(name) => funcs::call(name, &[]).map_err(TemplateError::Exec),
            Operand::Sub(pipeline) => self.eval_pipeline(pipeline, dot),
        }
    }
}

fn lookup(value: &Value, path: &[String]) -> Value {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn range_entries(value: &Value) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(idx, item)| (Value::from(idx), item.clone()))
            .collect()),
        // serde_json keeps object keys sorted, matching Go's map iteration.
        Value::Object(map) => Ok(map
            .iter()
            .map(|(key, item)| (Value::String(key.clone()), item.clone()))
            .collect()),
        Value::Number(n) => {
            let count = n.as_f64().unwrap_or(0.0);
            if count < 0.0 || count.fract() != 0.0 {
                return Err(TemplateError::Exec(format!("range can't iterate over {n}")));
            }
            if count > MAX_RANGE_COUNT as f64 {
                return Err(TemplateError::Exec(format!(
                    "range count {n} exceeds the limit of {MAX_RANGE_COUNT}"
                )));
            }
            Ok((0..count as u64)
                .map(|idx| (Value::from(idx), Value::from(idx)))
                .collect())
        }
        other => Err(TemplateError::Exec(format!(
            "range can't iterate over {}",
            format_value(other)
        ))),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Go truthiness: false, 0, nil and empty strings/lists/maps are false.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Textual form of a value as it appears in rendered output.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or_default();
                if f.fract() == 0.0 && f.abs() < 1e21 {
                    format!("{f:.0}")
                } else {
                    f.to_string()
                }
            }
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(" "))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}:{}", format_value(v)))
                .collect();
            format!("map[{}]", parts.join(" "))
        }
    }
}
