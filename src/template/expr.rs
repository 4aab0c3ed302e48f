//! Parser for the expression language used inside tags and filter arguments.
//!
//! Supports literals, identifiers, member/index access (with `?.`), array and
//! object literals, unary `!`/`-`, arithmetic, comparisons, `&&`, `||`, `??`
//! and the ternary operator. Identifiers become [`Expr::Var`] lookups; there
//! are no function calls.

use serde_json::{Number, Value};

use super::error::TemplateError;
use super::ir::{BinaryOp, Expr, UnaryOp};

/// Parse `code` as exactly one expression.
///
/// `position` is the source offset of the enclosing tag and is attached to any
/// syntax error.
pub fn parse_expression(code: &str, position: usize) -> Result<Expr, TemplateError> {
    let mut parser = Parser::new(code, position)?;
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a comma-separated argument list such as `", ", 2`.
pub fn parse_arguments(code: &str, position: usize) -> Result<Vec<Expr>, TemplateError> {
    let mut parser = Parser::new(code, position)?;
    let mut args = Vec::new();
    if parser.at_end() {
        return Ok(args);
    }
    loop {
        args.push(parser.parse_expr()?);
        if !parser.eat_punct(",") {
            break;
        }
    }
    parser.expect_end()?;
    Ok(args)
}

/// Parse up to `max` whitespace-separated expressions, e.g. `"file.vto" { a: 1 }`.
pub fn parse_sequence(code: &str, position: usize, max: usize) -> Result<Vec<Expr>, TemplateError> {
    let mut parser = Parser::new(code, position)?;
    let mut exprs = Vec::new();
    while !parser.at_end() && exprs.len() < max {
        exprs.push(parser.parse_expr()?);
    }
    parser.expect_end()?;
    Ok(exprs)
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Number(Number),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "?.", "??", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<",
    ">", "!", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

fn lex(code: &str, position: usize) -> Result<Vec<Lexeme>, TemplateError> {
    let error = |message: String| TemplateError::Syntax {
        code: code.to_string(),
        message,
        position,
    };

    let chars: Vec<char> = code.chars().collect();
    let mut lexemes = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch == '"' || ch == '\'' || ch == '`' {
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&c) = chars.get(i) else {
                    return Err(error("unterminated string literal".to_string()));
                };
                i += 1;
                match c {
                    '\\' => {
                        let escaped = chars.get(i).copied().ok_or_else(|| {
                            error("unterminated string literal".to_string())
                        })?;
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    c if c == ch => break,
                    c => text.push(c),
                }
            }
            lexemes.push(Lexeme::Str(text));
            continue;
        }

        if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                i += 1;
            }
            let mut is_float = false;
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            let number = if is_float {
                text.parse::<f64>().ok().and_then(Number::from_f64)
            } else {
                text.parse::<i64>().ok().map(Number::from)
            };
            let number = number.ok_or_else(|| error(format!("invalid number '{text}'")))?;
            lexemes.push(Lexeme::Number(number));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            lexemes.push(Lexeme::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        let Some(punct) = PUNCTUATION.iter().copied().find(|p| rest.starts_with(p)) else {
            return Err(error(format!("unexpected character '{ch}'")));
        };
        lexemes.push(Lexeme::Punct(punct));
        i += punct.chars().count();
    }

    Ok(lexemes)
}

struct Parser {
    code: String,
    position: usize,
    lexemes: Vec<Lexeme>,
    cursor: usize,
}

impl Parser {
    fn new(code: &str, position: usize) -> Result<Self, TemplateError> {
        Ok(Self {
            code: code.to_string(),
            position,
            lexemes: lex(code, position)?,
            cursor: 0,
        })
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            code: self.code.clone(),
            message: message.into(),
            position: self.position,
        }
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.lexemes.len()
    }

    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.cursor)
    }

    fn peek_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Lexeme::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek_punct(punct) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), TemplateError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{punct}'")))
        }
    }

    fn expect_end(&self) -> Result<(), TemplateError> {
        match self.peek() {
            None => Ok(()),
            Some(lexeme) => Err(self.error(format!("unexpected {}", describe(lexeme)))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, TemplateError> {
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_expr()?;
        self.expect_punct(":")?;
        let alternate = self.parse_expr()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    /// Precedence climbing over the binary operator table.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, TemplateError> {
        let mut left = self.parse_unary()?;
        while let Some((op, precedence)) = self.peek_binary_op() {
            if precedence < min_precedence {
                break;
            }
            self.cursor += 1;
            let right = self.parse_binary(precedence + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, u8)> {
        let Some(Lexeme::Punct(punct)) = self.peek() else {
            return None;
        };
        let op = match *punct {
            "||" => (BinaryOp::Or, 1),
            "??" => (BinaryOp::Nullish, 1),
            "&&" => (BinaryOp::And, 2),
            "==" | "===" => (BinaryOp::Eq, 3),
            "!=" | "!==" => (BinaryOp::NotEq, 3),
            "<" => (BinaryOp::Lt, 4),
            "<=" => (BinaryOp::LtEq, 4),
            ">" => (BinaryOp::Gt, 4),
            ">=" => (BinaryOp::GtEq, 4),
            "+" => (BinaryOp::Add, 5),
            "-" => (BinaryOp::Sub, 5),
            "*" => (BinaryOp::Mul, 6),
            "/" => (BinaryOp::Div, 6),
            "%" => (BinaryOp::Rem, 6),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, TemplateError> {
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("[") {
                    let index = self.parse_expr()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.peek_punct("(") {
                return Err(self.error("function calls are not supported, use a filter"));
            } else {
                return Ok(expr);
            }
        }
    }

    fn expect_ident(&mut self) -> Result<String, TemplateError> {
        match self.peek().cloned() {
            Some(Lexeme::Ident(name)) => {
                self.cursor += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a property name")),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        let Some(lexeme) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.cursor += 1;

        match lexeme {
            Lexeme::Number(number) => Ok(Expr::Literal(Value::Number(number))),
            Lexeme::Str(text) => Ok(Expr::Literal(Value::String(text))),
            Lexeme::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Lexeme::Punct("(") => {
                let expr = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Lexeme::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.parse_expr()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Lexeme::Punct("{") => {
                let mut entries = Vec::new();
                while !self.eat_punct("}") {
                    let key = match self.peek().cloned() {
                        Some(Lexeme::Ident(key)) | Some(Lexeme::Str(key)) => key,
                        _ => return Err(self.error("expected an object key")),
                    };
                    self.cursor += 1;
                    let value = if self.eat_punct(":") {
                        self.parse_expr()?
                    } else {
                        Expr::Var(key.clone())
                    };
                    entries.push((key, value));
                    if !self.eat_punct(",") {
                        self.expect_punct("}")?;
                        break;
                    }
                }
                Ok(Expr::Object(entries))
            }
            other => Err(self.error(format!("unexpected {}", describe(&other)))),
        }
    }
}

fn describe(lexeme: &Lexeme) -> String {
    match lexeme {
        Lexeme::Number(n) => format!("number {n}"),
        Lexeme::Str(s) => format!("string \"{s}\""),
        Lexeme::Ident(name) => format!("identifier '{name}'"),
        Lexeme::Punct(p) => format!("'{p}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_chain() {
        let expr = parse_expression("page.tags[0]?.name", 0).unwrap();
        let Expr::Member {
            object,
            property,
            optional,
        } = expr
        else {
            panic!("expected member access");
        };
        assert_eq!(property, "name");
        assert!(optional);
        assert!(matches!(*object, Expr::Index { optional: false, .. }));
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expression("1 + 2 * 3 == 7 && !done", 0).unwrap();
        let Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } = expr
        else {
            panic!("expected && at the root");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Eq, .. }));
        assert!(matches!(*right, Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn test_parse_object_and_array_literals() {
        let expr = parse_expression(r#"{ title: "x", "tags": [1, 2.5], flag }"#, 0).unwrap();
        let Expr::Object(entries) = expr else {
            panic!("expected object literal");
        };
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["title", "tags", "flag"]);
        assert!(matches!(&entries[2].1, Expr::Var(name) if name == "flag"));
    }

    #[test]
    fn test_parse_arguments_and_sequence() {
        assert_eq!(parse_arguments("", 0).unwrap().len(), 0);
        assert_eq!(parse_arguments("\", \", 2", 0).unwrap().len(), 2);
        assert_eq!(parse_sequence("\"a.vto\" { x: 1 }", 0, 2).unwrap().len(), 2);
        assert!(parse_sequence("a b c", 0, 2).is_err());
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let error = parse_expression("a +", 42).unwrap_err();
        assert_eq!(error.position(), Some(42));
        assert!(parse_expression("call()", 0).is_err());
        assert!(parse_expression("'open", 0).is_err());
    }
}
