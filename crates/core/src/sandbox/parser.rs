use crate::errors::{SandboxError, ViolationKind};
use crate::sandbox::lexer::{Token, TokenKind};

pub const MAX_DEPTH: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    fn comparison(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Lt => Some(Self::Lt),
            TokenKind::Le => Some(Self::Le),
            TokenKind::Gt => Some(Self::Gt),
            TokenKind::Ge => Some(Self::Ge),
            TokenKind::EqEq => Some(Self::Eq),
            TokenKind::NotEq => Some(Self::Ne),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable { name: String, offset: usize },
    Neg(Box<Expr>),
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

pub(crate) fn parse(tokens: &[Token], source_len: usize) -> Result<Expr, SandboxError> {
    let mut parser = Parser { tokens, position: 0, depth: 0, source_len };
    let expr = parser.comparison()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(parser.unexpected(token)),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    depth: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self, token: &Token) -> SandboxError {
        let kind = match token.kind {
            TokenKind::LParen => ViolationKind::FunctionCall,
            _ => ViolationKind::UnexpectedToken(token.kind.describe()),
        };
        SandboxError::violation(kind, token.offset)
    }

    fn end(&self) -> SandboxError {
        SandboxError::violation(ViolationKind::UnexpectedEnd, self.source_len)
    }

    fn descend(&mut self, offset: usize) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(SandboxError::violation(ViolationKind::TooDeep { limit: MAX_DEPTH }, offset));
        }
        Ok(())
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let lhs = self.additive()?;
        let Some(op) = self.peek().and_then(|token| BinaryOp::comparison(&token.kind)) else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.additive()?;

        if let Some(token) = self.peek() {
            if BinaryOp::comparison(&token.kind).is_some() {
                return Err(SandboxError::violation(ViolationKind::ChainedComparison, token.offset));
            }
        }
        Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn additive(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.peek().and_then(|token| match token.kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            _ => None,
        }) {
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().and_then(|token| match token.kind {
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            _ => None,
        }) {
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Minus => {
                self.advance();
                self.descend(token.offset)?;
                let operand = self.unary()?;
                self.depth -= 1;
                Ok(Expr::Neg(Box::new(operand)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        let token = self.advance().ok_or_else(|| self.end())?;
        let expr = match &token.kind {
            TokenKind::Number(value) => Expr::Number(*value),
            TokenKind::Ident(name) => Expr::Variable { name: name.clone(), offset: token.offset },
            TokenKind::LParen => {
                self.descend(token.offset)?;
                let inner = self.comparison()?;
                match self.advance() {
                    Some(close) if close.kind == TokenKind::RParen => {}
                    Some(other) => return Err(self.unexpected(other)),
                    None => return Err(self.end()),
                }
                self.depth -= 1;
                inner
            }
            _ => return Err(self.unexpected(token)),
        };

        if let Some(next) = self.peek() {
            if next.kind == TokenKind::LParen {
                return Err(SandboxError::violation(ViolationKind::FunctionCall, next.offset));
            }
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, BinaryOp, Expr, MAX_DEPTH};
    use crate::errors::{SandboxError, ViolationKind};
    use crate::sandbox::lexer::tokenize;

    fn parse_source(source: &str) -> Result<Expr, SandboxError> {
        let tokens = tokenize(source)?;
        parse(&tokens, source.len())
    }

    fn violation(source: &str) -> ViolationKind {
        match parse_source(source) {
            Err(SandboxError::Violation { kind, .. }) => kind,
            other => panic!("expected a violation for `{source}`, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_source("1 + 2 * 3").expect("valid");
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn comparison_sits_at_the_root() {
        let expr = parse_source("reading - 2 > limit").expect("valid");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Gt, .. }));
    }

    #[test]
    fn structural_violations_are_rejected() {
        assert_eq!(violation("max(reading)"), ViolationKind::FunctionCall);
        assert_eq!(violation("(reading)(1)"), ViolationKind::FunctionCall);
        assert_eq!(violation("1 < reading < 3"), ViolationKind::ChainedComparison);
        assert_eq!(violation("reading >"), ViolationKind::UnexpectedEnd);
        assert_eq!(violation("(reading"), ViolationKind::UnexpectedEnd);
        assert_eq!(violation("reading limit"), ViolationKind::UnexpectedToken("limit".to_string()));
        assert_eq!(violation(""), ViolationKind::UnexpectedEnd);
        assert_eq!(violation("* 2"), ViolationKind::UnexpectedToken("*".to_string()));
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(violation(&deep), ViolationKind::TooDeep { limit: MAX_DEPTH });

        let shallow = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse_source(&shallow).is_ok());
    }
}
