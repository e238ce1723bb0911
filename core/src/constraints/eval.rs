//! Values, static name checking, and evaluation of parsed constraint
//! expressions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use super::parse::BinOp;
use super::parse::Expr;
use super::parse::MacroKind;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

const METHODS: &[&str] = &[
    "contains",
    "startsWith",
    "endsWith",
    "matches",
    "size",
    "lowerAscii",
    "upperAscii",
];

const FUNCTIONS: &[&str] = &["size", "int", "double", "string", "matches"];

/// Rejects identifiers that are not declared parameters (or macro variables
/// in scope) and calls to functions outside the supported vocabulary.
pub(crate) fn check(expr: &Expr, declared: &[String]) -> Result<(), String> {
    let mut scope: Vec<String> = declared.to_vec();
    check_in(expr, &mut scope)
}

fn check_in(expr: &Expr, scope: &mut Vec<String>) -> Result<(), String> {
    match expr {
        Expr::Lit(_) => Ok(()),
        Expr::Ident(name) => {
            if scope.iter().any(|declared| declared == name) {
                Ok(())
            } else {
                Err(format!("undeclared reference to '{name}'"))
            }
        }
        Expr::List(items) => items.iter().try_for_each(|item| check_in(item, scope)),
        Expr::Not(inner) | Expr::Neg(inner) => check_in(inner, scope),
        Expr::Binary(_, lhs, rhs) | Expr::Index(lhs, rhs) => {
            check_in(lhs, scope)?;
            check_in(rhs, scope)
        }
        Expr::Cond(cond, then, otherwise) => {
            check_in(cond, scope)?;
            check_in(then, scope)?;
            check_in(otherwise, scope)
        }
        Expr::Call(name, args) => {
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(format!("undeclared reference to function '{name}'"));
            }
            args.iter().try_for_each(|arg| check_in(arg, scope))
        }
        Expr::Method(target, name, args) => {
            if !METHODS.contains(&name.as_str()) {
                return Err(format!("undeclared reference to function '{name}'"));
            }
            check_in(target, scope)?;
            args.iter().try_for_each(|arg| check_in(arg, scope))
        }
        Expr::Macro {
            target, var, body, ..
        } => {
            check_in(target, scope)?;
            scope.push(var.clone());
            let result = check_in(body, scope);
            scope.pop();
            result
        }
    }
}

/// Variable bindings visible to one evaluation.
pub(crate) struct Activation<'a> {
    params: &'a HashMap<String, Value>,
    locals: Vec<(String, Value)>,
}

impl<'a> Activation<'a> {
    pub(crate) fn new(params: &'a HashMap<String, Value>) -> Self {
        Self {
            params,
            locals: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, String> {
        if let Some((_, value)) = self.locals.iter().rev().find(|(local, _)| local == name) {
            return Ok(value.clone());
        }
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| format!("no such attribute '{name}'"))
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Not(inner) => match self.eval(inner)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(no_overload("!", &[&other])),
            },
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| "integer overflow".to_string()),
                Value::Double(n) => Ok(Value::Double(-n)),
                other => Err(no_overload("-", &[&other])),
            },
            Expr::Binary(BinOp::And, lhs, rhs) => {
                if !self.eval_bool(lhs, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_bool(rhs, "&&")?))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                if self.eval_bool(lhs, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_bool(rhs, "||")?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
            Expr::Cond(cond, then, otherwise) => {
                if self.eval_bool(cond, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call(name, args) => {
                let args = self.eval_args(args)?;
                call_function(name, &args)
            }
            Expr::Method(target, name, args) => {
                let target = self.eval(target)?;
                let args = self.eval_args(args)?;
                call_method(&target, name, &args)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                match (&target, &index) {
                    (Value::List(items), Value::Int(n)) => usize::try_from(*n)
                        .ok()
                        .and_then(|idx| items.get(idx))
                        .cloned()
                        .ok_or_else(|| format!("index {n} out of range")),
                    _ => Err(no_overload("[]", &[&target, &index])),
                }
            }
            Expr::Macro {
                kind,
                target,
                var,
                body,
            } => {
                let items = match self.eval(target)? {
                    Value::List(items) => items,
                    other => return Err(no_overload(macro_name(*kind), &[&other])),
                };
                let mut matched = 0usize;
                for item in items {
                    self.locals.push((var.clone(), item));
                    let result = self.eval_bool(body, macro_name(*kind));
                    self.locals.pop();
                    let hit = result?;
                    match kind {
                        MacroKind::Exists if hit => return Ok(Value::Bool(true)),
                        MacroKind::All if !hit => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                    if hit {
                        matched += 1;
                    }
                }
                Ok(Value::Bool(match kind {
                    MacroKind::Exists => false,
                    MacroKind::All => true,
                    MacroKind::ExistsOne => matched == 1,
                }))
            }
        }
    }

    fn eval_bool(&mut self, expr: &Expr, context: &str) -> Result<bool, String> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(no_overload(context, &[&other])),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, String> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }
}

fn macro_name(kind: MacroKind) -> &'static str {
    match kind {
        MacroKind::Exists => "exists",
        MacroKind::All => "all",
        MacroKind::ExistsOne => "exists_one",
    }
}

fn no_overload(op: &str, operands: &[&Value]) -> String {
    let types: Vec<&str> = operands.iter().map(|v| v.type_name()).collect();
    format!("no such overload: {op}({})", types.join(", "))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (Value::List(xs), Value::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
            }
            _ => a == b,
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    let symbol = match op {
        BinOp::Eq => return Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinOp::Ne => return Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinOp::In => {
            return match &rhs {
                Value::List(items) => Ok(Value::Bool(
                    items.iter().any(|item| values_equal(&lhs, item)),
                )),
                _ => Err(no_overload("in", &[&lhs, &rhs])),
            };
        }
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::And => "&&",
        BinOp::Or => "||",
    };

    if matches!(op, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge) {
        let ord = compare(&lhs, &rhs).ok_or_else(|| no_overload(symbol, &[&lhs, &rhs]))?;
        return Ok(Value::Bool(match op {
            BinOp::Lt => ord.is_lt(),
            BinOp::Le => ord.is_le(),
            BinOp::Gt => ord.is_gt(),
            _ => ord.is_ge(),
        }));
    }

    match (op, &lhs, &rhs) {
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (_, Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div if b == 0 => return Err("division by zero".to_string()),
                BinOp::Div => a.checked_div(b),
                BinOp::Rem if b == 0 => return Err("modulus by zero".to_string()),
                BinOp::Rem => a.checked_rem(b),
                _ => return Err(no_overload(symbol, &[&lhs, &rhs])),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string())
        }
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => match op {
                BinOp::Add => Ok(Value::Double(a + b)),
                BinOp::Sub => Ok(Value::Double(a - b)),
                BinOp::Mul => Ok(Value::Double(a * b)),
                BinOp::Div => Ok(Value::Double(a / b)),
                _ => Err(no_overload(symbol, &[&lhs, &rhs])),
            },
            _ => Err(no_overload(symbol, &[&lhs, &rhs])),
        },
    }
}

fn size_of(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(no_overload("size", &[other])),
    }
}

fn regex_match(text: &str, pattern: &str) -> Result<Value, String> {
    let re = regex_lite::Regex::new(pattern)
        .map_err(|e| format!("invalid regular expression {pattern:?}: {e}"))?;
    Ok(Value::Bool(re.is_match(text)))
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, String> {
    match (name, args) {
        ("size", [value]) => size_of(value),
        ("matches", [Value::String(text), Value::String(pattern)]) => regex_match(text, pattern),
        ("int", [value]) => match value {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Double(n) if n.is_finite() && n.abs() < 9.2e18 => {
                Ok(Value::Int(n.trunc() as i64))
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("cannot convert {s:?} to int")),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            other => Err(format!("cannot convert {other} to int")),
        },
        ("double", [value]) => match value {
            Value::Int(n) => Ok(Value::Double(*n as f64)),
            Value::Double(n) => Ok(Value::Double(*n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| format!("cannot convert {s:?} to double")),
            other => Err(no_overload("double", &[other])),
        },
        ("string", [value]) => Ok(Value::String(value.to_string())),
        _ => {
            let refs: Vec<&Value> = args.iter().collect();
            Err(no_overload(name, &refs))
        }
    }
}

fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value, String> {
    match (target, name, args) {
        (_, "size", []) => size_of(target),
        (Value::String(s), "contains", [Value::String(needle)]) => {
            Ok(Value::Bool(s.contains(needle.as_str())))
        }
        (Value::String(s), "startsWith", [Value::String(prefix)]) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        (Value::String(s), "endsWith", [Value::String(suffix)]) => {
            Ok(Value::Bool(s.ends_with(suffix.as_str())))
        }
        (Value::String(s), "matches", [Value::String(pattern)]) => regex_match(s, pattern),
        (Value::String(s), "lowerAscii", []) => Ok(Value::String(s.to_ascii_lowercase())),
        (Value::String(s), "upperAscii", []) => Ok(Value::String(s.to_ascii_uppercase())),
        _ => {
            let mut refs = vec![target];
            refs.extend(args.iter());
            Err(no_overload(name, &refs))
        }
    }
}
