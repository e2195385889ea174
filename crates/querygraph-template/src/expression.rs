//! Expression parsing
//!
//! Infix expressions are compiled once, with a shunting-yard pass, into a
//! postfix instruction list. Unary minus is marked explicitly so the
//! evaluator never has to guess an operator's arity.

use crate::lexer::{ExprToken, tokenize};
use querygraph_core::{Error, Result, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators, loosest binding first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Equals,
    NotEquals,
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

/// Precedence of unary minus: above `*`, below `^`
const NEGATE_PRECEDENCE: u8 = 5;

impl BinaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 0,
            BinaryOp::And => 1,
            BinaryOp::Less
            | BinaryOp::LessEquals
            | BinaryOp::Greater
            | BinaryOp::GreaterEquals
            | BinaryOp::Equals
            | BinaryOp::NotEquals => 2,
            BinaryOp::Add | BinaryOp::Subtract => 3,
            BinaryOp::Multiply | BinaryOp::Divide => 4,
            BinaryOp::Power => 6,
        }
    }

    pub fn is_right_associative(&self) -> bool {
        matches!(self, BinaryOp::Power)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "|",
            BinaryOp::And => "&",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Power => "^",
        }
    }

    fn from_token(token: &ExprToken) -> Option<Self> {
        let op = match token {
            ExprToken::Or => BinaryOp::Or,
            ExprToken::And => BinaryOp::And,
            ExprToken::Less => BinaryOp::Less,
            ExprToken::LessEquals => BinaryOp::LessEquals,
            ExprToken::Greater => BinaryOp::Greater,
            ExprToken::GreaterEquals => BinaryOp::GreaterEquals,
            ExprToken::Equals => BinaryOp::Equals,
            ExprToken::NotEquals => BinaryOp::NotEquals,
            ExprToken::Plus => BinaryOp::Add,
            ExprToken::Minus => BinaryOp::Subtract,
            ExprToken::Star => BinaryOp::Multiply,
            ExprToken::Slash => BinaryOp::Divide,
            ExprToken::Caret => BinaryOp::Power,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One step of a postfix program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Push a literal
    Push(Value),
    /// Push the value bound to a name
    Load(String),
    /// Pop two operands, apply the operator
    Binary(BinaryOp),
    /// Pop one operand and negate it
    Negate,
    /// Pop one operand per argument; `None` marks a positional argument
    Call {
        name: String,
        args: Vec<Option<String>>,
    },
}

/// A compiled expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    source: String,
    postfix: Vec<Instruction>,
}

impl Expression {
    /// Compile infix source into postfix form
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let postfix = ShuntingYard::new(source).run(tokens)?;
        Ok(Self {
            source: source.trim().to_string(),
            postfix,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.postfix
    }

    /// Every name the expression loads, in order of first use
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for instr in &self.postfix {
            if let Instruction::Load(name) = instr {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

enum Pending {
    Op(BinaryOp),
    Negate,
    Group,
    Call,
}

struct CallFrame {
    name: String,
    args: Vec<Option<String>>,
    keyword: Option<String>,
    started: bool,
}

impl CallFrame {
    fn finish_arg(&mut self) -> std::result::Result<(), String> {
        match self.keyword.take() {
            Some(name) => {
                if self.args.iter().flatten().any(|k| *k == name) {
                    return Err(format!("keyword '{}' given twice to {}", name, self.name));
                }
                self.args.push(Some(name));
            }
            None => {
                if self.args.iter().any(Option::is_some) {
                    return Err(format!(
                        "positional argument after keyword argument in {}",
                        self.name
                    ));
                }
                self.args.push(None);
            }
        }
        Ok(())
    }
}

struct ShuntingYard<'a> {
    source: &'a str,
    output: Vec<Instruction>,
    stack: Vec<Pending>,
    calls: Vec<CallFrame>,
    expect_operand: bool,
}

impl<'a> ShuntingYard<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            output: Vec::new(),
            stack: Vec::new(),
            calls: Vec::new(),
            expect_operand: true,
        }
    }

    fn error(&self, message: impl fmt::Display) -> Error {
        Error::Evaluation(format!("{} in expression '{}'", message, self.source.trim()))
    }

    fn operand(&mut self, instr: Instruction) -> Result<()> {
        if !self.expect_operand {
            return Err(self.error("missing operator"));
        }
        self.output.push(instr);
        self.expect_operand = false;
        if let Some(frame) = self.calls.last_mut() {
            frame.started = true;
        }
        Ok(())
    }

    fn run(mut self, tokens: Vec<(ExprToken, std::ops::Range<usize>)>) -> Result<Vec<Instruction>> {
        let mut iter = tokens.into_iter().peekable();
        while let Some((token, _span)) = iter.next() {
            match token {
                ExprToken::Integer(i) => self.operand(Instruction::Push(Value::Int(i)))?,
                ExprToken::Float(f) => self.operand(Instruction::Push(Value::Float(f)))?,
                ExprToken::String(s) => self.operand(Instruction::Push(Value::Str(s)))?,
                ExprToken::True => self.operand(Instruction::Push(Value::Bool(true)))?,
                ExprToken::False => self.operand(Instruction::Push(Value::Bool(false)))?,
                ExprToken::Identifier(name) => {
                    if !self.expect_operand {
                        return Err(self.error(format!("unexpected '{}'", name)));
                    }
                    let opens_call = matches!(iter.peek(), Some((ExprToken::LParen, _)));
                    let names_keyword = matches!(iter.peek(), Some((ExprToken::Assign, _)));
                    match (opens_call, names_keyword) {
                        (true, _) => {
                            iter.next();
                            if let Some(frame) = self.calls.last_mut() {
                                frame.started = true;
                            }
                            self.stack.push(Pending::Call);
                            self.calls.push(CallFrame {
                                name,
                                args: Vec::new(),
                                keyword: None,
                                started: false,
                            });
                        }
                        (false, true) => {
                            let at_arg_start = matches!(self.stack.last(), Some(Pending::Call))
                                && self.calls.last().is_some_and(|f| f.keyword.is_none());
                            if !at_arg_start {
                                return Err(self.error(format!(
                                    "keyword argument '{}' outside a function call",
                                    name
                                )));
                            }
                            iter.next();
                            if let Some(frame) = self.calls.last_mut() {
                                frame.keyword = Some(name);
                                frame.started = true;
                            }
                        }
                        (false, false) => self.operand(Instruction::Load(name))?,
                    }
                }
                ExprToken::LParen => {
                    if !self.expect_operand {
                        return Err(self.error("unexpected '('"));
                    }
                    if let Some(frame) = self.calls.last_mut() {
                        frame.started = true;
                    }
                    self.stack.push(Pending::Group);
                }
                ExprToken::RParen => self.close_paren()?,
                ExprToken::Comma => {
                    if self.expect_operand {
                        return Err(self.error("unexpected ','"));
                    }
                    self.pop_until_open()?;
                    if !matches!(self.stack.last(), Some(Pending::Call)) {
                        return Err(self.error("',' outside a function call"));
                    }
                    let result = match self.calls.last_mut() {
                        Some(frame) => frame.finish_arg(),
                        None => Err("',' outside a function call".to_string()),
                    };
                    result.map_err(|m| self.error(m))?;
                    self.expect_operand = true;
                }
                ExprToken::Minus if self.expect_operand => {
                    if let Some(frame) = self.calls.last_mut() {
                        frame.started = true;
                    }
                    self.stack.push(Pending::Negate);
                }
                ExprToken::Plus if self.expect_operand => {}
                ExprToken::Assign => return Err(self.error("unexpected '='")),
                other => {
                    let op = BinaryOp::from_token(&other)
                        .ok_or_else(|| self.error(format!("unexpected {:?}", other)))?;
                    if self.expect_operand {
                        return Err(self.error(format!("missing operand before '{}'", op)));
                    }
                    self.push_operator(op);
                    self.expect_operand = true;
                }
            }
        }

        if self.expect_operand {
            return Err(self.error("unexpected end of expression"));
        }
        while let Some(pending) = self.stack.pop() {
            match pending {
                Pending::Op(op) => self.output.push(Instruction::Binary(op)),
                Pending::Negate => self.output.push(Instruction::Negate),
                Pending::Group | Pending::Call => return Err(self.error("unclosed '('")),
            }
        }
        Ok(self.output)
    }

    fn push_operator(&mut self, op: BinaryOp) {
        while let Some(top) = self.stack.last() {
            let top_precedence = match top {
                Pending::Op(other) => other.precedence(),
                Pending::Negate => NEGATE_PRECEDENCE,
                Pending::Group | Pending::Call => break,
            };
            let pops = top_precedence > op.precedence()
                || (top_precedence == op.precedence() && !op.is_right_associative());
            if !pops {
                break;
            }
            match self.stack.pop() {
                Some(Pending::Op(other)) => self.output.push(Instruction::Binary(other)),
                Some(Pending::Negate) => self.output.push(Instruction::Negate),
                _ => break,
            }
        }
        self.stack.push(Pending::Op(op));
    }

    /// Pop operators down to the nearest group or call marker
    fn pop_until_open(&mut self) -> Result<()> {
        loop {
            match self.stack.last() {
                Some(Pending::Op(op)) => {
                    self.output.push(Instruction::Binary(*op));
                    self.stack.pop();
                }
                Some(Pending::Negate) => {
                    self.output.push(Instruction::Negate);
                    self.stack.pop();
                }
                Some(Pending::Group) | Some(Pending::Call) => return Ok(()),
                None => return Err(self.error("unbalanced ')'")),
            }
        }
    }

    fn close_paren(&mut self) -> Result<()> {
        if self.expect_operand {
            // Only `name()` may close right after an opener
            let empty_call = matches!(self.stack.last(), Some(Pending::Call))
                && self.calls.last().is_some_and(|f| !f.started);
            if !empty_call {
                return Err(self.error("unexpected ')'"));
            }
        } else {
            self.pop_until_open()?;
        }

        match self.stack.pop() {
            Some(Pending::Group) => {}
            Some(Pending::Call) => {
                let mut frame = self
                    .calls
                    .pop()
                    .ok_or_else(|| self.error("unbalanced ')'"))?;
                if frame.started {
                    frame.finish_arg().map_err(|m| self.error(m))?;
                }
                self.output.push(Instruction::Call {
                    name: frame.name,
                    args: frame.args,
                });
            }
            _ => return Err(self.error("unbalanced ')'")),
        }
        self.expect_operand = false;
        if let Some(frame) = self.calls.last_mut() {
            frame.started = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postfix(source: &str) -> Vec<Instruction> {
        Expression::parse(source).unwrap().instructions().to_vec()
    }

    fn load(name: &str) -> Instruction {
        Instruction::Load(name.into())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            postfix("a + b * c"),
            vec![
                load("a"),
                load("b"),
                load("c"),
                Instruction::Binary(BinaryOp::Multiply),
                Instruction::Binary(BinaryOp::Add),
            ]
        );
    }

    #[test]
    fn test_left_and_right_associativity() {
        assert_eq!(
            postfix("a - b - c"),
            vec![
                load("a"),
                load("b"),
                Instruction::Binary(BinaryOp::Subtract),
                load("c"),
                Instruction::Binary(BinaryOp::Subtract),
            ]
        );
        assert_eq!(
            postfix("a ^ b ^ c"),
            vec![
                load("a"),
                load("b"),
                load("c"),
                Instruction::Binary(BinaryOp::Power),
                Instruction::Binary(BinaryOp::Power),
            ]
        );
    }

    #[test]
    fn test_unary_minus_binds_below_power() {
        assert_eq!(
            postfix("-a ^ 2"),
            vec![
                load("a"),
                Instruction::Push(Value::Int(2)),
                Instruction::Binary(BinaryOp::Power),
                Instruction::Negate,
            ]
        );
        assert_eq!(
            postfix("-a * b"),
            vec![
                load("a"),
                Instruction::Negate,
                load("b"),
                Instruction::Binary(BinaryOp::Multiply),
            ]
        );
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            postfix("str.replace(name, target_val='a', with_val='b')"),
            vec![
                load("name"),
                Instruction::Push(Value::from("a")),
                Instruction::Push(Value::from("b")),
                Instruction::Call {
                    name: "str.replace".into(),
                    args: vec![None, Some("target_val".into()), Some("with_val".into())],
                },
            ]
        );
        assert_eq!(
            postfix("math.max(a, (b + 1) * 2)").last(),
            Some(&Instruction::Call {
                name: "math.max".into(),
                args: vec![None, None],
            })
        );
        assert_eq!(
            postfix("now()"),
            vec![Instruction::Call {
                name: "now".into(),
                args: vec![],
            }]
        );
    }

    #[test]
    fn test_nested_calls() {
        let program = postfix("str.uppercase(str.slice(x, s=0, e=-1))");
        assert_eq!(program.len(), 6);
        assert_eq!(
            program[4],
            Instruction::Call {
                name: "str.slice".into(),
                args: vec![None, Some("s".into()), Some("e".into())],
            }
        );
    }

    #[test]
    fn test_malformed_expressions() {
        for source in ["a +", "(a", "a)", "a b", "f(a,)", "f(x=1, 2)", "x = 1", ""] {
            assert!(Expression::parse(source).is_err(), "accepted '{}'", source);
        }
    }

    #[test]
    fn test_identifiers() {
        let expr = Expression::parse("a + b * a").unwrap();
        assert_eq!(expr.identifiers(), vec!["a", "b"]);
    }
}
