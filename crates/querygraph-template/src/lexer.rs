//! Expression lexer using logos

use logos::Logos;
use querygraph_core::{Error, Result};
use std::ops::Range;

fn unquote(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Expression tokens
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum ExprToken {
    #[token("true", ignore(ascii_case))]
    True,

    #[token("false", ignore(ascii_case))]
    False,

    // Symbols
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,

    #[token("=")]
    Assign,

    // Operators
    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("^")]
    Caret,

    #[token("<")]
    Less,

    #[token("<=")]
    LessEquals,

    #[token(">")]
    Greater,

    #[token(">=")]
    GreaterEquals,

    #[token("==")]
    Equals,

    #[token("!=")]
    NotEquals,

    #[token("&")]
    And,

    #[token("|")]
    Or,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unquote(lex.slice()))]
    String(String),

    // Identifiers, optionally namespaced (`str.uppercase`)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*", |lex| lex.slice().to_string())]
    Identifier(String),
}

/// Tokenize an expression, keeping byte spans
pub fn tokenize(input: &str) -> Result<Vec<(ExprToken, Range<usize>)>> {
    let mut lexer = ExprToken::lexer(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                return Err(Error::Evaluation(format!(
                    "unexpected '{}' at offset {} in '{}'",
                    lexer.slice(),
                    lexer.span().start,
                    input
                )));
            }
        }
    }
    Ok(tokens)
}
