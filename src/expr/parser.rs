//! Hand-written recursive-descent parser for the expression language,
//! styled after the teacher crate's own legacy recursive-descent PromQL
//! parser (`src/promql.rs`) rather than pulling in a parser-combinator or
//! grammar-generator dependency for a grammar this small.

use super::ast::{BinOp, Expr};
use super::lexer::{lex, Token};
use crate::error::{EngineError, EngineResult};
use crate::value::Value;

pub fn parse(src: &str) -> EngineResult<Expr> {
    let tokens = lex(src)?;
    let mut p = Parser { tokens, pos: 0, src };
    let expr = p.parse_or()?;
    p.expect(Token::Eof)?;
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, detail: impl Into<String>) -> EngineError {
        EngineError::ExpressionCompile {
            expr: self.src.to_string(),
            detail: detail.into(),
        }
    }

    fn expect(&mut self, want: Token) -> EngineResult<()> {
        if *self.peek() == want {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected {want:?}, found {:?}", self.peek())))
        }
    }

    fn parse_or(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::OrOr {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while *self.peek() == Token::AndAnd {
            self.bump();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Lte => BinOp::Lte,
                Token::Gt => BinOp::Gt,
                Token::Gte => BinOp::Gte,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        match self.peek() {
            Token::Bang => {
                self.bump();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Token::Minus => {
                self.bump();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> EngineResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.bump();
                    let name = match self.bump() {
                        Token::Ident(n) => n,
                        other => return Err(self.err(format!("expected identifier after `.`, found {other:?}"))),
                    };
                    if *self.peek() == Token::LParen {
                        let args = self.parse_call_args()?;
                        expr = Expr::MethodCall(Box::new(expr), name, args);
                    } else {
                        expr = Expr::Field(Box::new(expr), name);
                    }
                }
                Token::LBracket => {
                    self.bump();
                    let idx = self.parse_or()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> EngineResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            args.push(self.parse_or()?);
            while *self.peek() == Token::Comma {
                self.bump();
                args.push(self.parse_or()?);
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        match self.bump() {
            Token::Num(n) => {
                if n.fract() == 0.0 {
                    Ok(Expr::Literal(Value::Int(n as i64)))
                } else {
                    Ok(Expr::Literal(Value::Float(n)))
                }
            }
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    let args = self.parse_call_args()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Token::RBracket {
                    items.push(self.parse_or()?);
                    while *self.peek() == Token::Comma {
                        self.bump();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_chain() {
        let e = parse(r#"jqs('./attributes/name')"#).unwrap();
        matches!(e, Expr::Call(name, _) if name == "jqs");
    }

    #[test]
    fn distinguishes_field_access_from_method_call() {
        let e = parse("attr.name").unwrap();
        assert!(matches!(e, Expr::Field(_, ref f) if f == "name"));
        let e = parse("split('a/b', '/').merge([0,1], '-')").unwrap();
        assert!(matches!(e, Expr::MethodCall(_, ref m, _) if m == "merge"));
    }
}
