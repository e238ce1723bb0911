//! Lexer and parser for the `{{ }}` template syntax.

use super::TemplateError;

type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        else_branch: Vec<Node>,
    },
    Range {
        pipeline: Pipeline,
        body: Vec<Node>,
        else_branch: Vec<Node>,
    },
    With {
        pipeline: Pipeline,
        body: Vec<Node>,
        else_branch: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    /// Variables declared with `$x :=` (or `$i, $x :=` inside `range`).
    pub decl: Vec<String>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Dot,
    Field(Vec<String>),
    /// `$` is stored as `"$"`, `$name` as `"$name"`.
    Variable(String, Vec<String>),
    Str(String),
    Number(f64),
    Bool(bool),
    Nil,
    Ident(String),
    Sub(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Str(String),
    Num(f64),
    Ident(String),
    Pipe,
    LParen,
    RParen,
    Declare,
    Assign,
    Comma,
}

#[derive(Debug, Clone)]
enum Item {
    Text(String),
    Action(Vec<Tok>),
}

enum Stop {
    End,
    Else(Vec<Tok>),
    Eof,
}

pub(crate) fn parse(src: &str) -> Result<Vec<Node>> {
    let items = split_items(src)?;
    let mut parser = Parser { items, pos: 0 };
    let (nodes, stop) = parser.parse_list()?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::End => Err(TemplateError::Parse("unexpected {{ end }}".to_string())),
        Stop::Else(_) => Err(TemplateError::Parse("unexpected {{ else }}".to_string())),
    }
}

/// Splits the source into literal text and action token lists, applying the
/// `{{-` / `-}}` whitespace trim markers.
fn split_items(src: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut pos = 0;
    let mut trim_next_text = false;

    while let Some(offset) = src[pos..].find("{{") {
        let open = pos + offset;
        let mut text = &src[pos..open];
        if trim_next_text {
            text = text.trim_start();
        }

        let mut inner_start = open + 2;
        let after_open = &src[inner_start..];
        if after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_ascii_whitespace())
        {
            text = text.trim_end();
            inner_start += 1;
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }

        let close = find_action_end(src, inner_start)?;
        let mut inner = &src[inner_start..close];
        trim_next_text = false;
        if let Some(stripped) = inner.strip_suffix('-') {
            if stripped.ends_with(|c: char| c.is_ascii_whitespace()) {
                inner = stripped;
                trim_next_text = true;
            }
        }
        pos = close + 2;

        let trimmed = inner.trim();
        if trimmed.starts_with("/*") {
            if !trimmed.ends_with("*/") {
                return Err(TemplateError::Parse("unclosed comment".to_string()));
            }
            continue;
        }
        let toks = lex_action(inner)?;
        if toks.is_empty() {
            return Err(TemplateError::Parse("missing value for command".to_string()));
        }
        items.push(Item::Action(toks));
    }

    let mut rest = &src[pos..];
    if trim_next_text {
        rest = rest.trim_start();
    }
    if !rest.is_empty() {
        items.push(Item::Text(rest.to_string()));
    }
    Ok(items)
}

/// Finds the `}}` closing the action starting at `start`, skipping quoted
/// strings.
fn find_action_end(src: &str, start: usize) -> Result<usize> {
    let bytes = src.as_bytes();
    let mut i = start;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'`' => quote = Some(b),
                b'}' if bytes.get(i + 1) == Some(&b'}') => return Ok(i),
                _ => {}
            },
        }
        i += 1;
    }
    Err(TemplateError::Parse("unclosed action".to_string()))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_action(src: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };
    let read_fields = |i: &mut usize| -> Vec<String> {
        let mut fields = Vec::new();
        while *i + 1 < chars.len() && chars[*i] == '.' && is_ident_start(chars[*i + 1]) {
            *i += 1;
            let start = *i;
            while *i < chars.len() && is_ident_char(chars[*i]) {
                *i += 1;
            }
            fields.push(chars[start..*i].iter().collect());
        }
        fields
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::Declare);
                i += 2;
            }
            '=' => {
                toks.push(Tok::Assign);
                i += 1;
            }
            '.' => {
                let fields = read_fields(&mut i);
                if fields.is_empty() {
                    toks.push(Tok::Dot);
                    i += 1;
                } else {
                    toks.push(Tok::Field(fields));
                }
            }
            '$' => {
                i += 1;
                let name = format!("${}", read_ident(&mut i));
                let fields = read_fields(&mut i);
                toks.push(Tok::Var(name, fields));
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(TemplateError::Parse("unterminated string".to_string()));
                    };
                    i += 1;
                    match ch {
                        '"' => break,
                        '\\' => {
                            let Some(&esc) = chars.get(i) else {
                                return Err(TemplateError::Parse(
                                    "unterminated string".to_string(),
                                ));
                            };
                            i += 1;
                            s.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                        }
                        other => s.push(other),
                    }
                }
                toks.push(Tok::Str(s));
            }
            '`' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '`' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(TemplateError::Parse("unterminated raw string".to_string()));
                }
                toks.push(Tok::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let n = raw
                    .parse::<f64>()
                    .map_err(|_| TemplateError::Parse(format!("bad number syntax: {raw}")))?;
                toks.push(Tok::Num(n));
            }
            c if is_ident_start(c) => {
                let ident = read_ident(&mut i);
                toks.push(Tok::Ident(ident));
            }
            other => {
                return Err(TemplateError::Parse(format!(
                    "unexpected character {other:?} in action"
                )));
            }
        }
    }
    Ok(toks)
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let item = self.items[self.pos].clone();
            self.pos += 1;
            let toks = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action(toks) => toks,
            };
            let keyword = match toks.first() {
                Some(Tok::Ident(k)) => k.as_str(),
                _ => "",
            };
            match keyword {
                "end" => {
                    if toks.len() != 1 {
                        return Err(TemplateError::Parse(
                            "unexpected arguments to end".to_string(),
                        ));
                    }
                    return Ok((nodes, Stop::End));
                }
                "else" => return Ok((nodes, Stop::Else(toks[1..].to_vec()))),
                "if" => nodes.push(self.parse_if(&toks[1..])?),
                "range" => {
                    let pipeline = parse_pipeline(&toks[1..])?;
                    let (body, else_branch) = self.parse_body("range")?;
                    nodes.push(Node::Range {
                        pipeline,
                        body,
                        else_branch,
                    });
                }
                "with" => {
                    let pipeline = parse_pipeline(&toks[1..])?;
                    let (body, else_branch) = self.parse_body("with")?;
                    nodes.push(Node::With {
                        pipeline,
                        body,
                        else_branch,
                    });
                }
                "define" | "template" | "block" | "break" | "continue" => {
                    return Err(TemplateError::Parse(format!(
                        "unsupported action: {keyword}"
                    )));
                }
                _ => nodes.push(Node::Action(parse_pipeline(&toks)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn parse_if(&mut self, cond: &[Tok]) -> Result<Node> {
        let mut branches = Vec::new();
        let mut cond = parse_pipeline(cond)?;
        loop {
            let (body, stop) = self.parse_list()?;
            branches.push((cond, body));
            match stop {
                Stop::End => {
                    return Ok(Node::If {
                        branches,
                        else_branch: Vec::new(),
                    });
                }
                Stop::Else(rest) if rest.is_empty() => {
                    let else_branch = self.parse_else_tail("if")?;
                    return Ok(Node::If {
                        branches,
                        else_branch,
                    });
                }
                Stop::Else(rest) => match rest.first() {
                    Some(Tok::Ident(k)) if k == "if" => {
                        cond = parse_pipeline(&rest[1..])?;
                    }
                    _ => {
                        return Err(TemplateError::Parse(
                            "expected `if` after `else`".to_string(),
                        ));
                    }
                },
                Stop::Eof => {
                    return Err(TemplateError::Parse(
                        "unexpected EOF: missing {{ end }} for if".to_string(),
                    ));
                }
            }
        }
    }

    fn parse_body(&mut self, name: &str) -> Result<(Vec<Node>, Vec<Node>)> {
        let (body, stop) = self.parse_list()?;
        match stop {
            Stop::End => Ok((body, Vec::new())),
            Stop::Else(rest) if rest.is_empty() => Ok((body, self.parse_else_tail(name)?)),
            Stop::Else(_) => Err(TemplateError::Parse(format!(
                "unexpected arguments to else in {name}"
            ))),
            Stop::Eof => Err(TemplateError::Parse(format!(
                "unexpected EOF: missing {{{{ end }}}} for {name}"
            ))),
        }
    }

    fn parse_else_tail(&mut self, name: &str) -> Result<Vec<Node>> {
        let (else_branch, stop) = self.parse_list()?;
        match stop {
            Stop::End => Ok(else_branch),
            _ => Err(TemplateError::Parse(format!(
                "expected {{{{ end }}}} after else in {name}"
            ))),
        }
    }
}

fn parse_pipeline(toks: &[Tok]) -> Result<Pipeline> {
    let (decl, rest) = split_declaration(toks);
    if rest.is_empty() {
        return Err(TemplateError::Parse("missing value for command".to_string()));
    }

    let mut commands = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, tok) in rest.iter().enumerate() {
        match tok {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| TemplateError::Parse("unexpected )".to_string()))?;
            }
            Tok::Pipe if depth == 0 => {
                commands.push(parse_command(&rest[start..idx])?);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(TemplateError::Parse("unclosed (".to_string()));
    }
    commands.push(parse_command(&rest[start..])?);
    Ok(Pipeline { decl, commands })
}

fn split_declaration(toks: &[Tok]) -> (Vec<String>, &[Tok]) {
    match toks {
        [Tok::Var(a, fa), Tok::Comma, Tok::Var(b, fb), Tok::Declare | Tok::Assign, rest @ ..]
            if fa.is_empty() && fb.is_empty() =>
        {
            (vec![a.clone(), b.clone()], rest)
        }
        [Tok::Var(a, fa), Tok::Declare | Tok::Assign, rest @ ..] if fa.is_empty() => {
            (vec![a.clone()], rest)
        }
        _ => (Vec::new(), toks),
    }
}

fn parse_command(toks: &[Tok]) -> Result<Command> {
    if toks.is_empty() {
        return Err(TemplateError::Parse("missing command in pipeline".to_string()));
    }
    let mut operands = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        let operand = match &toks[i] {
            Tok::Dot => Operand::Dot,
            Tok::Field(path) => Operand::Field(path.clone()),
            Tok::Var(name, path) => Operand::Variable(name.clone(), path.clone()),
            Tok::Str(s) => Operand::Str(s.clone()),
            Tok::Num(n) => Operand::Number(*n),
            Tok::Ident(name) => match name.as_str() {
                "true" => Operand::Bool(true),
                "false" => Operand::Bool(false),
                "nil" => Operand::Nil,
                _ => Operand::Ident(name.clone()),
            },
            Tok::LParen => {
                let close = matching_paren(toks, i)?;
                let sub = parse_pipeline(&toks[i + 1..close])?;
                i = close;
                Operand::Sub(sub)
            }
            other => {
                return Err(TemplateError::Parse(format!(
                    "unexpected {other:?} in command"
                )));
            }
        };
        operands.push(operand);
        i += 1;
    }
    Ok(Command { operands })
}

fn matching_paren(toks: &[Tok], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (idx, tok) in toks.iter().enumerate().skip(open) {
        match tok {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(idx);
                }
            }
            _ => {}
        }
    }
    Err(TemplateError::Parse("unclosed (".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trim_markers_remove_adjacent_whitespace() {
        let nodes = parse("a  {{- .x -}}  b").unwrap_or_default();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a".to_string()),
                Node::Action(Pipeline {
                    decl: vec![],
                    commands: vec![Command {
                        operands: vec![Operand::Field(vec!["x".to_string()])]
                    }]
                }),
                Node::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn closing_braces_inside_strings_do_not_end_the_action() {
        let nodes = parse(r#"{{ "}}" }}"#).unwrap_or_default();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn missing_end_is_an_error() {
        assert!(parse("{{ if .x }}yes").is_err());
        assert!(parse("{{ end }}").is_err());
        assert!(parse("{{ .x").is_err());
    }

    #[test]
    fn comments_produce_no_nodes() {
        let nodes = parse("a{{/* note */}}b").unwrap_or_default();
        assert_eq!(
            nodes,
            vec![Node::Text("a".to_string()), Node::Text("b".to_string())]
        );
    }

    #[test]
    fn range_declarations_are_recognised() {
        let nodes = parse("{{ range $i, $v := .items }}{{ $v }}{{ end }}").unwrap_or_default();
        let Some(Node::Range { pipeline, .. }) = nodes.first() else {
            panic!("expected range node, got {nodes:?}");
        };
        assert_eq!(pipeline.decl, vec!["$i".to_string(), "$v".to_string()]);
    }
}
