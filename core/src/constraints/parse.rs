//! Lexer and recursive-descent parser for constraint expressions.
//!
//! Precedence, lowest first: `? :`, `||`, `&&`, relations (including `in`),
//! `+ -`, `* / %`, unary `! -`, then member access, calls and indexing.

use super::eval::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Lit(Value),
    Ident(String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Global function call such as `size(x)` or `int(x)`.
    Call(String, Vec<Expr>),
    /// Receiver-style call such as `name.startsWith("a")`.
    Method(Box<Expr>, String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Macro {
        kind: MacroKind,
        target: Box<Expr>,
        var: String,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MacroKind {
    Exists,
    All,
    ExistsOne,
}

impl MacroKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "exists" => Some(MacroKind::Exists),
            "all" => Some(MacroKind::All),
            "exists_one" => Some(MacroKind::ExistsOne),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Double(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "||", "&&", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%", "?", ":", "(",
    ")", "[", "]", ",", ".",
];

fn lex(src: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_double = false;
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                is_double = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                is_double = true;
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            if is_double {
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal {text}"))?;
                toks.push(Tok::Double(n));
            } else {
                let n = text
                    .parse::<i64>()
                    .map_err(|_| format!("integer literal {text} out of range"))?;
                toks.push(Tok::Int(n));
            }
            continue;
        }
        if c == '"' || c == '\'' {
            let (s, next) = lex_string(&chars, i)?;
            toks.push(Tok::Str(s));
            i = next;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                toks.push(Tok::Op(*op));
                i += op.len();
            }
            None => return Err(format!("unexpected character {c:?}")),
        }
    }
    Ok(toks)
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let Some(&escaped) = chars.get(i + 1) else {
                    break;
                };
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

pub(crate) fn parse(src: &str) -> Result<Expr, String> {
    let toks = lex(src)?;
    if toks.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.conditional()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(format!("unexpected {} after expression", describe(tok))),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Int(n) => n.to_string(),
        Tok::Double(n) => n.to_string(),
        Tok::Str(s) => format!("{s:?}"),
        Tok::Ident(s) => s.clone(),
        Tok::Op(op) => format!("'{op}'"),
    }
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.eat_op(op) {
            return Ok(());
        }
        match self.peek() {
            Some(tok) => Err(format!("expected '{op}', found {}", describe(tok))),
            None => Err(format!("expected '{op}', found end of expression")),
        }
    }

    fn conditional(&mut self) -> Result<Expr, String> {
        let cond = self.or()?;
        if !self.eat_op("?") {
            return Ok(cond);
        }
        let then = self.conditional()?;
        self.expect_op(":")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while self.eat_op("||") {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.relation()?;
        while self.eat_op("&&") {
            let rhs = self.relation()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn relation(&mut self) -> Result<Expr, String> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("==")) => BinOp::Eq,
                Some(Tok::Op("!=")) => BinOp::Ne,
                Some(Tok::Op("<")) => BinOp::Lt,
                Some(Tok::Op("<=")) => BinOp::Le,
                Some(Tok::Op(">")) => BinOp::Gt,
                Some(Tok::Op(">=")) => BinOp::Ge,
                Some(Tok::Ident(word)) if word == "in" => BinOp::In,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("+")) => BinOp::Add,
                Some(Tok::Op("-")) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("*")) => BinOp::Mul,
                Some(Tok::Op("/")) => BinOp::Div,
                Some(Tok::Op("%")) => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat_op("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_op("-") {
            return Ok(match self.unary()? {
                Expr::Lit(Value::Int(n)) => Expr::Lit(Value::Int(-n)),
                Expr::Lit(Value::Double(n)) => Expr::Lit(Value::Double(-n)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.member()
    }

    fn member(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_op(".") {
                let name = match self.next() {
                    Some(Tok::Ident(name)) => name,
                    Some(tok) => return Err(format!("expected method name, found {}", describe(&tok))),
                    None => return Err("expected method name after '.'".to_string()),
                };
                if !self.eat_op("(") {
                    return Err(format!("field selection .{name} is not supported"));
                }
                let args = self.arguments()?;
                expr = match MacroKind::from_name(&name) {
                    Some(kind) => into_macro(kind, expr, args)?,
                    None => Expr::Method(Box::new(expr), name, args),
                };
            } else if self.eat_op("[") {
                let index = self.conditional()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses a comma separated argument list after the opening `(`.
    fn arguments(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        loop {
            args.push(self.conditional()?);
            if self.eat_op(")") {
                return Ok(args);
            }
            self.expect_op(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Tok::Int(n)) => Ok(Expr::Lit(Value::Int(n))),
            Some(Tok::Double(n)) => Ok(Expr::Lit(Value::Double(n))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Tok::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                "null" => Ok(Expr::Lit(Value::Null)),
                "in" => Err("unexpected 'in'".to_string()),
                _ => {
                    if self.eat_op("(") {
                        Ok(Expr::Call(word, self.arguments()?))
                    } else {
                        Ok(Expr::Ident(word))
                    }
                }
            },
            Some(Tok::Op("(")) => {
                let inner = self.conditional()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Some(Tok::Op("[")) => {
                let mut items = Vec::new();
                if self.eat_op("]") {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.conditional()?);
                    if self.eat_op("]") {
                        return Ok(Expr::List(items));
                    }
                    self.expect_op(",")?;
                }
            }
            Some(tok) => Err(format!("unexpected {}", describe(&tok))),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn into_macro(kind: MacroKind, target: Expr, mut args: Vec<Expr>) -> Result<Expr, String> {
    if args.len() != 2 {
        return Err(format!(
            "macro {kind:?} expects a variable and a predicate, got {} arguments",
            args.len()
        ));
    }
    let body = args.pop().map(Box::new);
    let var = args.pop();
    match (var, body) {
        (Some(Expr::Ident(var)), Some(body)) => Ok(Expr::Macro {
            kind,
            target: Box::new(target),
            var,
            body,
        }),
        _ => Err("macro variable must be a simple identifier".to_string()),
    }
}
