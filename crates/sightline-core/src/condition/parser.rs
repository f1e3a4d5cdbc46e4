//! Recursive-descent parser producing the condition AST.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons (chainable,
//! including `in` / `not in`), `+ -`, `* / %`, unary minus, postfix
//! (subscript, attribute, method call).

use super::ConditionError;
use super::lexer::{Spanned, Token};
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Context variables a condition may read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variable {
    /// Event payload object.
    Payload,
    /// Event message.
    Message,
    /// Severity name.
    Severity,
    /// Event time as unix seconds.
    Timestamp,
    /// Event type name.
    EventType,
    /// Emitting module.
    SourceModule,
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "payload" => Self::Payload,
            "message" => Self::Message,
            "severity" => Self::Severity,
            "timestamp" => Self::Timestamp,
            "event_type" => Self::EventType,
            "source_module" => Self::SourceModule,
            _ => return None,
        })
    }
}

/// Built-in conversion functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    /// `len(x)`
    Len,
    /// `str(x)`
    Str,
    /// `int(x)`
    Int,
    /// `float(x)`
    Float,
    /// `bool(x)`
    Bool,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            _ => return None,
        })
    }

    fn arity(self) -> (usize, usize) {
        match self {
            Self::Len => (1, 1),
            Self::Str | Self::Int | Self::Float | Self::Bool => (0, 1),
        }
    }
}

/// Methods callable on values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// `map.get(key, default?)`
    Get,
    /// `s.lower()`
    Lower,
    /// `s.upper()`
    Upper,
    /// `s.startswith(prefix)`
    StartsWith,
    /// `s.endswith(suffix)`
    EndsWith,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "get" => Self::Get,
            "lower" => Self::Lower,
            "upper" => Self::Upper,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            _ => return None,
        })
    }

    fn arity(self) -> (usize, usize) {
        match self {
            Self::Get => (1, 2),
            Self::Lower | Self::Upper => (0, 0),
            Self::StartsWith | Self::EndsWith => (1, 1),
        }
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `not in`
    NotIn,
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

/// Condition expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Value),
    /// Context variable.
    Var(Variable),
    /// `[a, b, ...]`
    List(Vec<Expr>),
    /// `not x`
    Not(Box<Expr>),
    /// `a and b`
    And(Box<Expr>, Box<Expr>),
    /// `a or b`
    Or(Box<Expr>, Box<Expr>),
    /// `a < b <= c`, evaluated pairwise like a conjunction.
    Compare {
        /// Leftmost operand.
        first: Box<Expr>,
        /// Following operator/operand pairs.
        rest: Vec<(CmpOp, Expr)>,
    },
    /// Arithmetic.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `-x`
    Neg(Box<Expr>),
    /// `x[i]`
    Index {
        /// Subscripted value.
        target: Box<Expr>,
        /// Key or position.
        index: Box<Expr>,
    },
    /// `x.name`
    Attr {
        /// Object.
        target: Box<Expr>,
        /// Key looked up.
        name: String,
    },
    /// `x.method(args)`
    MethodCall {
        /// Receiver.
        target: Box<Expr>,
        /// Method.
        method: Method,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// `f(args)`
    Call {
        /// Function.
        func: Builtin,
        /// Arguments.
        args: Vec<Expr>,
    },
}

/// Parse a token stream into an expression.
pub fn parse(tokens: &[Spanned], source_len: usize) -> Result<Expr, ConditionError> {
    let mut parser = Parser { tokens, pos: 0, depth: 0, source_len };
    if tokens.is_empty() {
        return Err(parser.error("empty condition"));
    }
    let expr = parser.or_expr()?;
    if parser.pos < tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|s| &s.token);
        self.pos += 1;
        token
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.source_len, |s| s.offset)
    }

    fn error(&self, message: &str) -> ConditionError {
        ConditionError::Syntax { offset: self.offset(), message: message.to_string() }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == word)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ConditionError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn enter(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn or_expr(&mut self) -> Result<Expr, ConditionError> {
        self.enter()?;
        let mut left = self.and_expr()?;
        while self.is_keyword("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= 1;
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.not_expr()?;
        while self.is_keyword("and") {
            self.pos += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ConditionError> {
        if self.is_keyword("not") {
            self.pos += 1;
            self.enter()?;
            let inner = self.not_expr()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let first = self.additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.cmp_op() {
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare { first: Box::new(first), rest })
        }
    }

    fn cmp_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match self.peek()? {
            Token::EqEq => (CmpOp::Eq, 1),
            Token::NotEq => (CmpOp::Ne, 1),
            Token::Lt => (CmpOp::Lt, 1),
            Token::Le => (CmpOp::Le, 1),
            Token::Gt => (CmpOp::Gt, 1),
            Token::Ge => (CmpOp::Ge, 1),
            Token::Ident(word) if word == "in" => (CmpOp::In, 1),
            Token::Ident(word)
                if word == "not"
                    && matches!(self.peek_at(1), Some(Token::Ident(next)) if next == "in") =>
            {
                (CmpOp::NotIn, 2)
            }
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn additive(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.or_expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index { target: Box::new(expr), index: Box::new(index) };
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let Some(Token::Ident(name)) = self.advance().cloned() else {
                        self.pos -= 1;
                        return Err(self.error("expected attribute name after '.'"));
                    };
                    if self.peek() == Some(&Token::LParen) {
                        let Some(method) = Method::from_name(&name) else {
                            return Err(ConditionError::UnknownName(format!("method '{name}'")));
                        };
                        let args = self.call_args(method.arity(), &name)?;
                        expr = Expr::MethodCall { target: Box::new(expr), method, args };
                    } else {
                        expr = Expr::Attr { target: Box::new(expr), name };
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self, (min, max): (usize, usize), name: &str) -> Result<Vec<Expr>, ConditionError> {
        self.expect(&Token::LParen, "'('")?;
        let args = self.comma_list(&Token::RParen)?;
        if args.len() < min || args.len() > max {
            return Err(self.error(&format!(
                "{name}() takes {min} to {max} arguments, got {}",
                args.len()
            )));
        }
        Ok(args)
    }

    fn comma_list(&mut self, close: &Token) -> Result<Vec<Expr>, ConditionError> {
        let mut items = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.or_expr()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.pos += 1;
                    if self.peek() == Some(close) {
                        self.pos += 1;
                        return Ok(items);
                    }
                }
                Some(t) if t == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        let offset = self.offset();
        let Some(token) = self.advance().cloned() else {
            return Err(ConditionError::Syntax {
                offset,
                message: "unexpected end of condition".into(),
            });
        };
        match token {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.enter()?;
                let items = self.comma_list(&Token::RBracket)?;
                self.depth -= 1;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => self.identifier(name, offset),
            _ => Err(ConditionError::Syntax { offset, message: "unexpected token".into() }),
        }
    }

    fn identifier(&mut self, name: String, offset: usize) -> Result<Expr, ConditionError> {
        match name.as_str() {
            "True" | "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "False" | "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "None" | "null" => return Ok(Expr::Literal(Value::None)),
            "and" | "or" | "not" | "in" => {
                return Err(ConditionError::Syntax {
                    offset,
                    message: format!("unexpected keyword '{name}'"),
                });
            }
            _ => {}
        }
        if self.peek() == Some(&Token::LParen) {
            let Some(func) = Builtin::from_name(&name) else {
                return Err(ConditionError::UnknownName(format!("function '{name}'")));
            };
            let args = self.call_args(func.arity(), &name)?;
            return Ok(Expr::Call { func, args });
        }
        Variable::from_name(&name)
            .map(Expr::Var)
            .ok_or_else(|| ConditionError::UnknownName(format!("variable '{name}'")))
    }
}
