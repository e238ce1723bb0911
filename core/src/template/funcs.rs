//! Function library available inside templates.
//!
//! Argument order follows the sprig conventions so that pipelines read
//! naturally: `{{ .list | join "," }}` calls `join(",", list)`.

use serde_json::Value;

use super::format_value;
use super::is_truthy;

type FuncResult = Result<Value, String>;

pub(crate) fn call(name: &str, args: &[Value]) -> FuncResult {
    match name {
        "not" => {
            let [v] = arity::<1>(name, args)?;
            Ok(Value::Bool(!is_truthy(v)))
        }
        "and" => {
            at_least(name, args, 1)?;
            Ok(args
                .iter()
                .find(|v| !is_truthy(v))
                .or(args.last())
                .cloned()
                .unwrap_or(Value::Null))
        }
        "or" => {
            at_least(name, args, 1)?;
            Ok(args
                .iter()
                .find(|v| is_truthy(v))
                .or(args.last())
                .cloned()
                .unwrap_or(Value::Null))
        }
        "eq" => {
            at_least(name, args, 2)?;
            let first = &args[0];
            Ok(Value::Bool(args[1..].iter().any(|v| values_equal(first, v))))
        }
        "ne" => {
            let [a, b] = arity::<2>(name, args)?;
            Ok(Value::Bool(!values_equal(a, b)))
        }
        "lt" | "le" | "gt" | "ge" => {
            let [a, b] = arity::<2>(name, args)?;
            let ord = compare(a, b).ok_or_else(|| format!("{name}: incompatible types"))?;
            Ok(Value::Bool(match name {
                "lt" => ord.is_lt(),
                "le" => ord.is_le(),
                "gt" => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        "len" => {
            let [v] = arity::<1>(name, args)?;
            let n = match v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(format!("len of {}", type_name(other))),
            };
            Ok(Value::from(n))
        }
        "index" => {
            at_least(name, args, 2)?;
            let mut current = args[0].clone();
            for key in &args[1..] {
                current = match (&current, key) {
                    (Value::Object(map), Value::String(k)) => {
                        map.get(k).cloned().unwrap_or(Value::Null)
                    }
                    (Value::Array(items), Value::Number(n)) => {
                        let idx = n.as_f64().unwrap_or(-1.0);
                        if idx < 0.0 || idx.fract() != 0.0 {
                            return Err(format!("index: invalid index {n}"));
                        }
                        items.get(idx as usize).cloned().ok_or_else(|| {
                            format!("index: index {idx} out of range")
                        })?
                    }
                    (Value::Null, _) => Value::Null,
                    (other, _) => return Err(format!("index of {}", type_name(other))),
                };
            }
            Ok(current)
        }
        "print" => Ok(Value::String(sprint(args))),
        "println" => {
            let parts: Vec<String> = args.iter().map(format_value).collect();
            Ok(Value::String(format!("{}\n", parts.join(" "))))
        }
        "printf" => {
            at_least(name, args, 1)?;
            let fmt = as_str(name, &args[0])?;
            Ok(Value::String(sprintf(fmt, &args[1..])))
        }
        "upper" => map_str(name, args, |s| s.to_uppercase()),
        "lower" => map_str(name, args, |s| s.to_lowercase()),
        "trim" => map_str(name, args, |s| s.trim().to_string()),
        "quote" => map_str(name, args, |s| format!("{s:?}")),
        "squote" => map_str(name, args, |s| format!("'{s}'")),
        "shellquote" => map_str(name, args, |s| {
            shlex::try_quote(s)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| s.replace('\0', ""))
        }),
        "trimPrefix" => {
            let [prefix, s] = arity::<2>(name, args)?;
            let (prefix, s) = (as_str(name, prefix)?, format_value(s));
            Ok(Value::String(
                s.strip_prefix(prefix).unwrap_or(s.as_str()).to_string(),
            ))
        }
        "trimSuffix" => {
            let [suffix, s] = arity::<2>(name, args)?;
            let (suffix, s) = (as_str(name, suffix)?, format_value(s));
            Ok(Value::String(
                s.strip_suffix(suffix).unwrap_or(s.as_str()).to_string(),
            ))
        }
        "replace" => {
            let [old, new, s] = arity::<3>(name, args)?;
            Ok(Value::String(
                format_value(s).replace(as_str(name, old)?, as_str(name, new)?),
            ))
        }
        "contains" => {
            let [needle, s] = arity::<2>(name, args)?;
            Ok(Value::Bool(format_value(s).contains(as_str(name, needle)?)))
        }
        "hasPrefix" => {
            let [prefix, s] = arity::<2>(name, args)?;
            Ok(Value::Bool(format_value(s).starts_with(as_str(name, prefix)?)))
        }
        "hasSuffix" => {
            let [suffix, s] = arity::<2>(name, args)?;
            Ok(Value::Bool(format_value(s).ends_with(as_str(name, suffix)?)))
        }
        "join" => {
            let [sep, list] = arity::<2>(name, args)?;
            let sep = as_str(name, sep)?;
            let joined = match list {
                Value::Array(items) => items
                    .iter()
                    .map(format_value)
                    .collect::<Vec<_>>()
                    .join(sep),
                Value::Null => String::new(),
                other => format_value(other),
            };
            Ok(Value::String(joined))
        }
        "split" | "splitList" => {
            let [sep, s] = arity::<2>(name, args)?;
            let sep = as_str(name, sep)?;
            Ok(Value::Array(
                format_value(s)
                    .split(sep)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        "list" => Ok(Value::Array(args.to_vec())),
        "first" => {
            let [v] = arity::<1>(name, args)?;
            Ok(match v {
                Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        "last" => {
            let [v] = arity::<1>(name, args)?;
            Ok(match v {
                Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        "default" => {
            // `default "x"` with nothing piped in sees only the fallback.
            match args {
                [fallback] => Ok(fallback.clone()),
                [fallback, value] => Ok(if is_truthy(value) {
                    value.clone()
                } else {
                    fallback.clone()
                }),
                _ => Err(format!("wrong number of args for default: want 1 or 2 got {}", args.len())),
            }
        }
        "empty" => {
            let [v] = arity::<1>(name, args)?;
            Ok(Value::Bool(!is_truthy(v)))
        }
        "ternary" => {
            let [a, b, cond] = arity::<3>(name, args)?;
            Ok(if is_truthy(cond) { a.clone() } else { b.clone() })
        }
        "env" => {
            let [var] = arity::<1>(name, args)?;
            Ok(Value::String(
                std::env::var(as_str(name, var)?).unwrap_or_default(),
            ))
        }
        "toJson" => {
            let [v] = arity::<1>(name, args)?;
            serde_json::to_string(v)
                .map(Value::String)
                .map_err(|e| format!("toJson: {e}"))
        }
        _ => Err(format!("function {name:?} not defined")),
    }
}

fn arity<'a, const N: usize>(name: &str, args: &'a [Value]) -> Result<&'a [Value; N], String> {
    args.try_into().map_err(|_| {
        format!(
            "wrong number of args for {name}: want {N} got {}",
            args.len()
        )
    })
}

fn at_least(name: &str, args: &[Value], n: usize) -> Result<(), String> {
    if args.len() < n {
        return Err(format!(
            "wrong number of args for {name}: want at least {n} got {}",
            args.len()
        ));
    }
    Ok(())
}

fn as_str<'a>(name: &str, v: &'a Value) -> Result<&'a str, String> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(format!("{name}: expected string, got {}", type_name(other))),
    }
}

fn map_str(name: &str, args: &[Value], f: impl Fn(&str) -> String) -> FuncResult {
    let [v] = arity::<1>(name, args)?;
    Ok(Value::String(f(&format_value(v))))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Operands are separated by a space when neither side is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            let prev_is_str = matches!(args[idx - 1], Value::String(_));
            if !prev_is_str && !matches!(arg, Value::String(_)) {
                out.push(' ');
            }
        }
        out.push_str(&format_value(arg));
    }
    out
}

/// Supports the verbs `%s %v %d %f %q %t %%`.
fn sprintf(fmt: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        match verb {
            'd' => match arg.as_f64() {
                Some(n) => out.push_str(&format!("{}", n.trunc() as i64)),
                None => out.push_str(&format!("%!d({})", format_value(arg))),
            },
            'f' => match arg.as_f64() {
                Some(n) => out.push_str(&format!("{n:.6}")),
                None => out.push_str(&format!("%!f({})", format_value(arg))),
            },
            'q' => out.push_str(&format!("{:?}", format_value(arg))),
            _ => out.push_str(&format_value(arg)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn join_uses_separator_first() {
        assert_eq!(
            call("join", &[json!(","), json!(["a", "b"])]),
            Ok(json!("a,b"))
        );
    }

    #[test]
    fn default_prefers_truthy_value() {
        assert_eq!(call("default", &[json!("x"), json!("")]), Ok(json!("x")));
        assert_eq!(call("default", &[json!("x"), json!("y")]), Ok(json!("y")));
    }

    #[test]
    fn comparisons_mix_integer_and_float_numbers() {
        assert_eq!(call("lt", &[json!(1), json!(1.5)]), Ok(json!(true)));
        assert_eq!(call("eq", &[json!(2), json!(2.0)]), Ok(json!(true)));
        assert!(call("lt", &[json!(1), json!("a")]).is_err());
    }

    #[test]
    fn printf_formats_common_verbs() {
        assert_eq!(
            call("printf", &[json!("%s=%d (%q) 100%%"), json!("n"), json!(4.0), json!("x")]),
            Ok(json!("n=4 (\"x\") 100%"))
        );
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert!(call("nope", &[]).is_err());
    }

    #[test]
    fn wrong_arity_is_an_error() {
        assert!(call("upper", &[]).is_err());
    }
}
