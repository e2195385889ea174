//! Recursive descent parser for QueryGraph programs
//!
//! ```text
//! CONNECT
//!     chinook <- Sqlite(path='chinook.db')
//! RETRIEVE
//!     QUERY |
//!         SELECT * FROM albums WHERE ArtistId = {% artist -> int %};
//!     USING chinook
//!     AS albums
//!     ---
//!     QUERY |
//!         SELECT * FROM tracks WHERE AlbumId IN {{ AlbumId -> list:int }};
//!     FIELDS TrackId, AlbumId, Name
//!     USING chinook
//!     THEN |
//!         mutate(seconds = Milliseconds / 1000) >> rename(Name -> track);
//!     AS tracks
//! JOIN
//!     LEFT (tracks[AlbumId] ==> albums[AlbumId])
//! ```
//!
//! The first failure stops parsing and is reported as a single
//! [`Error::DslSyntax`] with its line and column.

use crate::ast::{ConnectorDecl, JoinDecl, NodeDecl, Program};
use crate::lexer::{Position, Token, raw_block_len};
use logos::{Lexer, Logos};
use querygraph_core::{Error, JoinKind, Result};
use querygraph_graph::Manipulation;
use querygraph_template::Expression;
use std::ops::Range;

type Spanned = (Token, Range<usize>);

/// Parse program text into a [`Program`]
pub fn parse(source: &str) -> Result<Program> {
    Parser::new(source).parse_program()
}

struct Parser<'s> {
    source: &'s str,
    lexer: Lexer<'s, Token>,
    peeked: Option<Spanned>,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            lexer: Token::lexer(source),
            peeked: None,
        }
    }

    fn parse_program(&mut self) -> Result<Program> {
        self.expect(Token::Connect)?;
        let mut connectors = vec![self.parse_connector()?];
        while matches!(self.peek()?, Some(Token::Identifier(_))) {
            connectors.push(self.parse_connector()?);
        }

        self.expect(Token::Retrieve)?;
        let mut nodes = vec![self.parse_node()?];
        loop {
            self.eat(&Token::Separator)?;
            if self.peek()? == Some(&Token::Query) {
                nodes.push(self.parse_node()?);
            } else {
                break;
            }
        }

        let mut joins = Vec::new();
        if self.eat(&Token::Join)? {
            joins.push(self.parse_join()?);
            while self.peek()?.is_some_and(is_join_kind) {
                joins.push(self.parse_join()?);
            }
        }

        if let Some((token, span)) = self.advance()? {
            return Err(self.error_at(span.start, format!("unexpected {}", token)));
        }

        Ok(Program {
            connectors,
            nodes,
            joins,
        })
    }

    // ========== Blocks ==========

    fn parse_connector(&mut self) -> Result<ConnectorDecl> {
        let (name, span) = self.name("connector name")?;
        self.expect(Token::Assign)?;
        let (db_type, _) = self.name("database type")?;
        self.expect(Token::LParen)?;

        let mut options = Vec::new();
        if !self.eat(&Token::RParen)? {
            loop {
                let (key, _) = self.name("option name")?;
                self.expect(Token::Equals)?;
                let value = match self.advance()? {
                    Some((Token::String(s), _)) => s,
                    Some((Token::Number(n), _)) => n,
                    Some((Token::Identifier(i), _)) => i,
                    other => return Err(self.unexpected(other, "option value")),
                };
                options.push((key, value));
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RParen)?;
        }

        Ok(ConnectorDecl {
            name,
            db_type,
            options,
            position: Position::at(self.source, span.start),
        })
    }

    fn parse_node(&mut self) -> Result<NodeDecl> {
        let span = self.expect(Token::Query)?;
        self.expect(Token::Pipe)?;
        let (query, query_offset) = self.raw_block()?;
        if query.is_empty() {
            return Err(self.error_at(query_offset, "empty query"));
        }

        let fields = if self.eat(&Token::Fields)? {
            Some(self.name_list("field name")?)
        } else {
            None
        };

        self.expect(Token::Using)?;
        let (connector, _) = self.name("connector name")?;

        let manipulations = if self.eat(&Token::Then)? {
            self.expect(Token::Pipe)?;
            let (text, offset) = self.raw_block()?;
            self.parse_manipulations(&text, offset)?
        } else {
            Vec::new()
        };

        self.expect(Token::As)?;
        let (name, _) = self.name("node name")?;

        Ok(NodeDecl {
            name,
            query,
            fields,
            connector,
            manipulations,
            position: Position::at(self.source, span.start),
        })
    }

    fn parse_join(&mut self) -> Result<JoinDecl> {
        let (kind, span) = match self.advance()? {
            Some((Token::Left, span)) => (JoinKind::Left, span),
            Some((Token::Right, span)) => (JoinKind::Right, span),
            Some((Token::Inner, span)) => (JoinKind::Inner, span),
            Some((Token::Outer, span)) => (JoinKind::Outer, span),
            other => return Err(self.unexpected(other, "LEFT, RIGHT, INNER or OUTER")),
        };

        self.expect(Token::LParen)?;
        let (child, _) = self.name("child node")?;
        self.expect(Token::LBracket)?;
        let child_columns = self.name_list("join column")?;
        self.expect(Token::RBracket)?;
        self.expect(Token::JoinArrow)?;
        let (parent, _) = self.name("parent node")?;
        self.expect(Token::LBracket)?;
        let parent_columns = self.name_list("join column")?;
        self.expect(Token::RBracket)?;
        self.expect(Token::RParen)?;
        self.eat(&Token::Semicolon)?;

        if child_columns.len() != parent_columns.len() {
            return Err(self.error_at(
                span.start,
                format!(
                    "join of '{}' onto '{}' pairs {} child columns with {} parent columns",
                    child,
                    parent,
                    child_columns.len(),
                    parent_columns.len()
                ),
            ));
        }

        Ok(JoinDecl {
            kind,
            child,
            child_columns,
            parent,
            parent_columns,
            position: Position::at(self.source, span.start),
        })
    }

    // ========== Manipulations ==========

    fn parse_manipulations(&self, text: &str, offset: usize) -> Result<Vec<Manipulation>> {
        let mut steps = Vec::new();
        for (at, piece) in split_top_level(text, ">>") {
            let (lead, step) = trim_with_offset(piece);
            let at = offset + at + lead;
            if step.is_empty() {
                return Err(self.error_at(at, "empty manipulation"));
            }

            let open = step
                .find('(')
                .ok_or_else(|| self.error_at(at, format!("expected '(' after '{}'", step)))?;
            if !step.ends_with(')') {
                return Err(self.error_at(at, format!("expected ')' to close '{}'", step)));
            }
            let name = step[..open].trim().to_ascii_lowercase();
            let args = &step[open + 1..step.len() - 1];
            let args_at = at + open + 1;

            match name.as_str() {
                "mutate" => {
                    for (arg_at, assignment) in split_top_level(args, ",") {
                        steps.push(self.parse_mutate(assignment, args_at + arg_at)?);
                    }
                }
                "rename" => {
                    let mut pairs = Vec::new();
                    for (arg_at, pair) in split_top_level(args, ",") {
                        let (old, new) = pair.split_once("->").ok_or_else(|| {
                            self.error_at(args_at + arg_at, format!("expected 'old -> new' in '{}'", pair.trim()))
                        })?;
                        pairs.push((
                            self.column_name(old, args_at + arg_at)?,
                            self.column_name(new, args_at + arg_at)?,
                        ));
                    }
                    steps.push(Manipulation::Rename(pairs));
                }
                "select" | "remove" => {
                    let columns = split_top_level(args, ",")
                        .into_iter()
                        .map(|(arg_at, column)| self.column_name(column, args_at + arg_at))
                        .collect::<Result<Vec<_>>>()?;
                    steps.push(if name == "select" {
                        Manipulation::Select(columns)
                    } else {
                        Manipulation::Remove(columns)
                    });
                }
                "flatten" | "explode" => {
                    steps.push(Manipulation::Flatten(self.column_name(args, args_at)?));
                }
                other => {
                    return Err(self.error_at(at, format!("unknown manipulation '{}'", other)));
                }
            }
        }
        Ok(steps)
    }

    fn parse_mutate(&self, assignment: &str, at: usize) -> Result<Manipulation> {
        let split = assignment_index(assignment).ok_or_else(|| {
            self.error_at(at, format!("expected 'column = expression' in '{}'", assignment.trim()))
        })?;
        let column = self.column_name(&assignment[..split], at)?;
        let expression = Expression::parse(&assignment[split + 1..])
            .map_err(|e| self.error_at(at + split + 1, e.to_string()))?;
        Ok(Manipulation::Mutate { column, expression })
    }

    fn column_name(&self, raw: &str, at: usize) -> Result<String> {
        let name = raw.trim();
        let name = name
            .strip_prefix('\'')
            .and_then(|n| n.strip_suffix('\''))
            .or_else(|| name.strip_prefix('"').and_then(|n| n.strip_suffix('"')))
            .unwrap_or(name);
        if name.is_empty() {
            return Err(self.error_at(at, "expected a column name"));
        }
        Ok(name.to_string())
    }

    // ========== Token Helpers ==========

    fn advance(&mut self) -> Result<Option<Spanned>> {
        if let Some(spanned) = self.peeked.take() {
            return Ok(Some(spanned));
        }
        match self.lexer.next() {
            None => Ok(None),
            Some(Ok(token)) => Ok(Some((token, self.lexer.span()))),
            Some(Err(())) => {
                let start = self.lexer.span().start;
                let message = format!("unexpected character '{}'", self.lexer.slice());
                Err(self.error_at(start, message))
            }
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        if self.peeked.is_none() {
            self.peeked = self.advance()?;
        }
        Ok(self.peeked.as_ref().map(|(token, _)| token))
    }

    /// Consume the next token if it equals `token`
    fn eat(&mut self, token: &Token) -> Result<bool> {
        if self.peek()? == Some(token) {
            self.peeked = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token) -> Result<Range<usize>> {
        match self.advance()? {
            Some((found, span)) if found == token => Ok(span),
            other => Err(self.unexpected(other, &token.to_string())),
        }
    }

    /// An identifier or quoted string
    fn name(&mut self, what: &str) -> Result<(String, Range<usize>)> {
        match self.advance()? {
            Some((Token::Identifier(name), span)) | Some((Token::String(name), span)) => Ok((name, span)),
            other => Err(self.unexpected(other, what)),
        }
    }

    fn name_list(&mut self, what: &str) -> Result<Vec<String>> {
        let mut names = vec![self.name(what)?.0];
        while self.eat(&Token::Comma)? {
            names.push(self.name(what)?.0);
        }
        Ok(names)
    }

    /// Read source text up to the next unquoted `;`, consuming the `;`
    fn raw_block(&mut self) -> Result<(String, usize)> {
        let start = self.lexer.span().end;
        let rest = self.lexer.remainder();
        let len = raw_block_len(rest)
            .ok_or_else(|| self.error_at(start, "block is missing its terminating ';'"))?;
        let (lead, text) = trim_with_offset(&rest[..len]);
        let text = text.to_string();
        self.lexer.bump(len + 1);
        Ok((text, start + lead))
    }

    fn unexpected(&self, found: Option<Spanned>, expected: &str) -> Error {
        match found {
            Some((token, span)) => {
                self.error_at(span.start, format!("expected {}, found {}", expected, token))
            }
            None => self.error_at(self.source.len(), format!("expected {}, found end of input", expected)),
        }
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> Error {
        let position = Position::at(self.source, offset);
        Error::syntax(position.line, position.column, message)
    }
}

fn is_join_kind(token: &Token) -> bool {
    matches!(token, Token::Left | Token::Right | Token::Inner | Token::Outer)
}

/// Split on `sep` outside quotes and parentheses, keeping each piece's byte offset
fn split_top_level<'a>(text: &'a str, sep: &str) -> Vec<(usize, &'a str)> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => {
                chars.next();
            }
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, _) if depth == 0 && text[i..].starts_with(sep) => {
                pieces.push((start, &text[start..i]));
                start = i + sep.len();
                for _ in 1..sep.chars().count() {
                    chars.next();
                }
            }
            (None, _) => {}
        }
    }
    pieces.push((start, &text[start..]));
    pieces
}

/// Trim whitespace, returning the number of leading bytes removed
fn trim_with_offset(text: &str) -> (usize, &str) {
    let trimmed = text.trim_start();
    let lead = text.len() - trimmed.len();
    (lead, trimmed.trim_end())
}

/// Byte index of the `=` that assigns, skipping `==`, `!=`, `<=` and `>=`
fn assignment_index(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match (quote, b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'\'' | b'"') => quote = Some(b),
            (None, b'=') => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if !matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) && next != Some(b'=') {
                    return Some(i);
                }
            }
            (None, _) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "\
CONNECT
    chinook <- Sqlite(path='chinook.db')
    docs <- MongoDb(host='localhost', port=27017)
RETRIEVE
    QUERY |
        SELECT * FROM albums WHERE title != 'a;b';
    USING chinook
    AS albums
    ---
    QUERY |
        SELECT * FROM tracks WHERE AlbumId IN {{ AlbumId -> list:int }};
    FIELDS TrackId, AlbumId, Name
    USING chinook
    THEN |
        mutate(seconds = Milliseconds / 1000, loud = str.uppercase(Name)) >> rename(Name -> track);
    AS tracks
JOIN
    LEFT (tracks[AlbumId] ==> albums[AlbumId]);
";

    fn syntax_error(source: &str) -> (usize, usize, String) {
        match parse(source).unwrap_err() {
            Error::DslSyntax {
                line,
                column,
                message,
            } => (line, column, message),
            other => panic!("expected a syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_program() {
        let program = parse(PROGRAM).unwrap();

        assert_eq!(program.connectors.len(), 2);
        assert_eq!(program.connectors[0].db_type, "Sqlite");
        assert_eq!(
            program.connectors[1].options,
            vec![("host".to_string(), "localhost".to_string()), ("port".into(), "27017".into())]
        );

        let albums = &program.nodes[0];
        assert_eq!(albums.name, "albums");
        assert_eq!(albums.query, "SELECT * FROM albums WHERE title != 'a;b'");
        assert_eq!(albums.fields, None);
        assert!(albums.manipulations.is_empty());
        assert_eq!(albums.position, Position { line: 5, column: 5 });

        let tracks = &program.nodes[1];
        assert_eq!(tracks.fields.as_ref().unwrap().len(), 3);
        assert_eq!(tracks.connector, "chinook");
        assert_eq!(tracks.manipulations.len(), 3);
        assert_eq!(tracks.manipulations[1].to_string(), "mutate(loud = str.uppercase(Name))");
        assert_eq!(
            tracks.manipulations[2],
            Manipulation::Rename(vec![("Name".into(), "track".into())])
        );

        let join = &program.joins[0];
        assert_eq!(join.kind, JoinKind::Left);
        assert_eq!(join.pairs(), vec![("AlbumId".to_string(), "AlbumId".to_string())]);
    }

    #[test]
    fn test_separator_and_join_are_optional() {
        let program = parse(
            "connect db <- Generic() retrieve \
             query | SELECT 1; using db as one \
             query | SELECT 2; using db as two",
        )
        .unwrap();
        assert_eq!(program.nodes.len(), 2);
        assert!(program.joins.is_empty());
        assert!(program.connectors[0].options.is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let program = parse(
            "# sources\nCONNECT db <- Sqlite() # inline\nRETRIEVE\nQUERY | SELECT '#'; USING db AS a",
        )
        .unwrap();
        assert_eq!(program.nodes[0].query, "SELECT '#'");
    }

    #[test]
    fn test_syntax_error_location() {
        let (line, column, message) =
            syntax_error("CONNECT\n  db <- Sqlite()\nRETRIEVE\n  QUERY | SELECT 1;\n  AS a");
        assert_eq!((line, column), (5, 3));
        assert!(message.contains("expected USING"), "{}", message);
    }

    #[test]
    fn test_unterminated_query() {
        let (line, _, message) = syntax_error("CONNECT db <- Sqlite()\nRETRIEVE QUERY | SELECT 'x;");
        assert_eq!(line, 2);
        assert!(message.contains("';'"));
    }

    #[test]
    fn test_mismatched_join_columns() {
        let (_, _, message) = syntax_error(
            "CONNECT db <- Sqlite() RETRIEVE QUERY | q; USING db AS a \
             QUERY | q; USING db AS b JOIN INNER (b[x, y] ==> a[x])",
        );
        assert!(message.contains("2 child columns with 1 parent columns"));
    }

    #[test]
    fn test_bad_manipulations() {
        let base = "CONNECT db <- Sqlite() RETRIEVE QUERY | q; USING db THEN | ";
        let (_, _, message) = syntax_error(&format!("{}sort(a); AS a", base));
        assert!(message.contains("unknown manipulation 'sort'"));

        let (_, _, message) = syntax_error(&format!("{}mutate(a == b); AS a", base));
        assert!(message.contains("column = expression"));

        let (_, _, message) = syntax_error(&format!("{}mutate(a = (b); AS a", base));
        assert!(message.contains("unclosed '('"), "{}", message);
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let (_, _, message) = syntax_error("CONNECT db <- Sqlite() RETRIEVE QUERY | q; USING db AS a CONNECT");
        assert!(message.contains("unexpected CONNECT"));
    }

    #[test]
    fn test_split_top_level() {
        let pieces = split_top_level("a(x >> y) >> b('>>') >> c", ">>");
        let pieces: Vec<&str> = pieces.into_iter().map(|(_, p)| p.trim()).collect();
        assert_eq!(pieces, vec!["a(x >> y)", "b('>>')", "c"]);
        assert_eq!(assignment_index("flag = a >= b"), Some(5));
        assert_eq!(assignment_index("a == b"), None);
    }
}
