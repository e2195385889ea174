//! QueryGraph language lexer using logos
//!
//! Raw blocks (`QUERY |` and `THEN |`) are not tokenized; the parser reads
//! them straight from the source with [`raw_block_len`].

use logos::Logos;
use serde::{Deserialize, Serialize};
use std::fmt;

fn unquote(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Language tokens
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // Block keywords
    #[token("CONNECT", ignore(ascii_case))]
    Connect,

    #[token("RETRIEVE", ignore(ascii_case))]
    Retrieve,

    #[token("JOIN", ignore(ascii_case))]
    Join,

    // Node clauses
    #[token("QUERY", ignore(ascii_case))]
    Query,

    #[token("FIELDS", ignore(ascii_case))]
    Fields,

    #[token("USING", ignore(ascii_case))]
    Using,

    #[token("THEN", ignore(ascii_case))]
    Then,

    #[token("AS", ignore(ascii_case))]
    As,

    // Join kinds
    #[token("LEFT", ignore(ascii_case))]
    Left,

    #[token("RIGHT", ignore(ascii_case))]
    Right,

    #[token("INNER", ignore(ascii_case))]
    Inner,

    #[token("OUTER", ignore(ascii_case))]
    Outer,

    // Symbols
    #[token("<-")]
    Assign,

    #[token("==>")]
    JoinArrow,

    #[token("---")]
    Separator,

    #[token("|")]
    Pipe,

    #[token(";")]
    Semicolon,

    #[token(",")]
    Comma,

    #[token("=")]
    Equals,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    // Literals
    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| lex.slice().to_string())]
    Number(String),

    #[regex(r"'([^'\\]|\\.)*'", |lex| unquote(lex.slice()))]
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    String(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Identifier(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Connect => f.write_str("CONNECT"),
            Token::Retrieve => f.write_str("RETRIEVE"),
            Token::Join => f.write_str("JOIN"),
            Token::Query => f.write_str("QUERY"),
            Token::Fields => f.write_str("FIELDS"),
            Token::Using => f.write_str("USING"),
            Token::Then => f.write_str("THEN"),
            Token::As => f.write_str("AS"),
            Token::Left => f.write_str("LEFT"),
            Token::Right => f.write_str("RIGHT"),
            Token::Inner => f.write_str("INNER"),
            Token::Outer => f.write_str("OUTER"),
            Token::Assign => f.write_str("'<-'"),
            Token::JoinArrow => f.write_str("'==>'"),
            Token::Separator => f.write_str("'---'"),
            Token::Pipe => f.write_str("'|'"),
            Token::Semicolon => f.write_str("';'"),
            Token::Comma => f.write_str("','"),
            Token::Equals => f.write_str("'='"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Number(n) => write!(f, "number {}", n),
            Token::String(s) => write!(f, "string '{}'", s),
            Token::Identifier(name) => write!(f, "identifier '{}'", name),
        }
    }
}

/// 1-based line and column in the program text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Locate a byte offset
    pub fn at(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = source.get(..offset).unwrap_or(source);
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Byte length of a raw block up to its terminating `;`, which is not included
///
/// Semicolons inside single- or double-quoted strings do not terminate.
pub fn raw_block_len(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ';') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        Token::lexer(input).map(|t| t.unwrap()).collect()
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("connect Retrieve JOIN as"),
            vec![Token::Connect, Token::Retrieve, Token::Join, Token::As]
        );
    }

    #[test]
    fn test_connector_line() {
        assert_eq!(
            kinds("chinook <- Sqlite(host='db.sqlite', port=5432) # trailing comment"),
            vec![
                Token::Identifier("chinook".into()),
                Token::Assign,
                Token::Identifier("Sqlite".into()),
                Token::LParen,
                Token::Identifier("host".into()),
                Token::Equals,
                Token::String("db.sqlite".into()),
                Token::Comma,
                Token::Identifier("port".into()),
                Token::Equals,
                Token::Number("5432".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_join_line() {
        assert_eq!(
            kinds("LEFT (tracks[album_id] ==> albums[id]);\n---"),
            vec![
                Token::Left,
                Token::LParen,
                Token::Identifier("tracks".into()),
                Token::LBracket,
                Token::Identifier("album_id".into()),
                Token::RBracket,
                Token::JoinArrow,
                Token::Identifier("albums".into()),
                Token::LBracket,
                Token::Identifier("id".into()),
                Token::RBracket,
                Token::RParen,
                Token::Semicolon,
                Token::Separator,
            ]
        );
    }

    #[test]
    fn test_identifier_with_keyword_prefix() {
        assert_eq!(kinds("asset"), vec![Token::Identifier("asset".into())]);
        assert_eq!(kinds("left_id"), vec![Token::Identifier("left_id".into())]);
    }

    #[test]
    fn test_raw_block_len_skips_quoted_semicolons() {
        let text = " SELECT * FROM t WHERE a = 'x;y' AND b = \"p;q\";\n USING db";
        let len = raw_block_len(text).unwrap();
        assert_eq!(&text[..len], " SELECT * FROM t WHERE a = 'x;y' AND b = \"p;q\"");
        assert_eq!(raw_block_len("SELECT 'it''s';"), Some(14));
        assert_eq!(raw_block_len("SELECT 'unterminated;"), None);
    }

    #[test]
    fn test_position() {
        let source = "CONNECT\n  db <- Sqlite()";
        assert_eq!(Position::at(source, 0), Position { line: 1, column: 1 });
        assert_eq!(Position::at(source, 10), Position { line: 2, column: 3 });
    }
}
