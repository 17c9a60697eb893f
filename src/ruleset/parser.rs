//! Recursive-descent parser for rule files
//!
//! Grammar (informal):
//!
//! ```text
//! unit     := item*
//! item     := ("input" | "output") IDENT "(" column ("," column)* ")" "."
//!           | head (":-" literal ("," literal)*)? "."
//! column   := IDENT ":" IDENT
//! head     := IDENT "(" (headarg ("," headarg)*)? ")"
//! headarg  := AGG "(" VAR? ")" | term
//! literal  := "!" atom | atom | expr CMP expr
//! expr     := mul (("+" | "-") mul)*
//! mul      := unary (("*" | "/") unary)*
//! unary    := "-" unary | primary
//! primary  := term | IDENT "(" expr,* ")" | "(" expr ")"
//! ```
//!
//! `IDENT(...)` in a body is an atom unless the closing parenthesis is
//! followed by an operator, in which case it is a function call.

use std::sync::Arc;

use super::errors::{CompileError, CompileResult};
use super::lexer::{tokenize, Spanned, Token};
use crate::model::{
    AggFunc, ArithOp, Atom, CmpOp, Column, Decl, Expr, Head, HeadTerm, Literal, Role, Rule,
    SourcePos, SourceUnit, Term, Value, ValueType,
};

/// Parses one rule file.
pub fn parse_unit(file: &str, src: &str) -> CompileResult<SourceUnit> {
    let file_name: Arc<str> = Arc::from(file);
    let (tokens, end) = tokenize(&file_name, src)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end,
    };

    let mut unit = SourceUnit {
        file: file.to_string(),
        ..SourceUnit::default()
    };

    while !parser.at_end() {
        match parser.peek() {
            Some(Token::Input) => unit.decls.push(parser.decl(Role::Input)?),
            Some(Token::Output) => unit.decls.push(parser.decl(Role::Output)?),
            _ => unit.rules.push(parser.clause()?),
        }
    }

    Ok(unit)
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    end: SourcePos,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + offset).map(|s| &s.token)
    }

    fn pos(&self) -> SourcePos {
        self.tokens
            .get(self.cursor)
            .map(|s| s.pos.clone())
            .unwrap_or_else(|| self.end.clone())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|s| s.token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn error(&self, expected: &str) -> CompileError {
        let found = match self.peek() {
            Some(token) => token.describe(),
            None => "end of file".to_string(),
        };
        CompileError::syntax(self.pos(), format!("expected {}, found {}", expected, found))
    }

    fn expect(&mut self, token: Token, expected: &str) -> CompileResult<()> {
        if self.peek() == Some(&token) {
            self.cursor += 1;
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn ident(&mut self, expected: &str) -> CompileResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.cursor += 1;
                Ok(name)
            }
            _ => Err(self.error(expected)),
        }
    }

    fn decl(&mut self, role: Role) -> CompileResult<Decl> {
        let pos = self.pos();
        self.advance();
        let pred = self.ident("predicate name")?;
        self.expect(Token::LParen, "'('")?;

        let mut columns = Vec::new();
        loop {
            let name = self.ident("column name")?;
            self.expect(Token::Colon, "':'")?;
            let type_pos = self.pos();
            let type_name = self.ident("column type")?;
            let ty = ValueType::parse(&type_name).ok_or_else(|| {
                CompileError::syntax(
                    type_pos,
                    format!("unknown column type '{}' (use id, string or number)", type_name),
                )
            })?;
            columns.push(Column { name, ty });

            match self.peek() {
                Some(Token::Comma) => {
                    self.cursor += 1;
                }
                Some(Token::RParen) => {
                    self.cursor += 1;
                    break;
                }
                _ => return Err(self.error("',' or ')'")),
            }
        }
        self.expect(Token::Dot, "'.'")?;

        Ok(Decl {
            role,
            pred,
            columns,
            pos,
        })
    }

    fn clause(&mut self) -> CompileResult<Rule> {
        let pos = self.pos();
        let head = self.head()?;
        let mut body = Vec::new();

        if self.peek() == Some(&Token::Implies) {
            self.cursor += 1;
            loop {
                body.push(self.literal()?);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.cursor += 1;
                    }
                    _ => break,
                }
            }
        }
        self.expect(Token::Dot, "'.' at end of clause")?;

        Ok(Rule { head, body, pos })
    }

    fn head(&mut self) -> CompileResult<Head> {
        let pred = self.ident("rule head")?;
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();

        if self.peek() == Some(&Token::RParen) {
            self.cursor += 1;
            return Ok(Head { pred, args });
        }

        loop {
            args.push(self.head_arg()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.cursor += 1;
                }
                Some(Token::RParen) => {
                    self.cursor += 1;
                    break;
                }
                _ => return Err(self.error("',' or ')'")),
            }
        }

        Ok(Head { pred, args })
    }

    fn head_arg(&mut self) -> CompileResult<HeadTerm> {
        if let (Some(Token::Ident(name)), Some(Token::LParen)) = (self.peek(), self.peek_at(1)) {
            let pos = self.pos();
            let func = AggFunc::parse(name).ok_or_else(|| {
                CompileError::syntax(pos, format!("'{}' is not an aggregate", name))
            })?;
            self.cursor += 2;
            let var = match self.peek() {
                Some(Token::RParen) => None,
                Some(Token::Var(v)) => {
                    let v = v.clone();
                    self.cursor += 1;
                    Some(v)
                }
                _ => return Err(self.error("aggregate variable")),
            };
            self.expect(Token::RParen, "')'")?;
            if var.is_none() && func != AggFunc::Count {
                return Err(CompileError::syntax(
                    self.pos(),
                    format!("{}() needs a variable", func.name()),
                ));
            }
            return Ok(HeadTerm::Agg { func, var });
        }
        Ok(HeadTerm::Term(self.term()?))
    }

    fn term(&mut self) -> CompileResult<Term> {
        let term = match self.peek() {
            Some(Token::Var(name)) => Term::Var(name.clone()),
            Some(Token::Wildcard) => Term::Wildcard,
            Some(Token::Str(s)) => Term::Const(Value::str(s)),
            Some(Token::Number(n)) => Term::Const(Value::Num(*n)),
            Some(Token::Param(name)) => Term::Param(name.clone()),
            Some(Token::Minus) => {
                if let Some(Token::Number(n)) = self.peek_at(1) {
                    let n = -*n;
                    self.cursor += 2;
                    return Ok(Term::Const(Value::Num(n)));
                }
                return Err(self.error("term"));
            }
            _ => return Err(self.error("term")),
        };
        self.cursor += 1;
        Ok(term)
    }

    fn atom(&mut self) -> CompileResult<Atom> {
        let pred = self.ident("predicate name")?;
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();

        if self.peek() == Some(&Token::RParen) {
            self.cursor += 1;
            return Ok(Atom { pred, args });
        }

        loop {
            args.push(self.term()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.cursor += 1;
                }
                Some(Token::RParen) => {
                    self.cursor += 1;
                    break;
                }
                _ => return Err(self.error("',' or ')'")),
            }
        }

        Ok(Atom { pred, args })
    }

    fn literal(&mut self) -> CompileResult<Literal> {
        if self.peek() == Some(&Token::Bang) {
            self.cursor += 1;
            return Ok(Literal::Neg(self.atom()?));
        }

        if matches!(self.peek(), Some(Token::Ident(_)))
            && self.peek_at(1) == Some(&Token::LParen)
            && !self.call_followed_by_operator()
        {
            return Ok(Literal::Pos(self.atom()?));
        }

        let lhs = self.expr()?;
        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Err(self.error("comparison operator")),
        };
        self.cursor += 1;
        let rhs = self.expr()?;

        Ok(Literal::Cmp { op, lhs, rhs })
    }

    /// Looks past the balanced parentheses of `IDENT(...)` at the cursor.
    fn call_followed_by_operator(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.cursor + 1;
        while let Some(spanned) = self.tokens.get(i) {
            match spanned.token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|s| &s.token),
                            Some(
                                Token::Eq
                                    | Token::Ne
                                    | Token::Lt
                                    | Token::Le
                                    | Token::Gt
                                    | Token::Ge
                                    | Token::Plus
                                    | Token::Minus
                                    | Token::Star
                                    | Token::Slash
                            )
                        );
                    }
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn expr(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.cursor += 1;
            let rhs = self.mul()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn mul(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => return Ok(lhs),
            };
            self.cursor += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> CompileResult<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.cursor += 1;
            let inner = self.unary()?;
            return Ok(match inner {
                Expr::Term(Term::Const(Value::Num(n))) => Expr::Term(Term::Const(Value::Num(-n))),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> CompileResult<Expr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.cursor += 1;
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.cursor += 1;
                self.expect(Token::LParen, "'(' after function name")?;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.cursor += 1;
                    return Ok(Expr::Call { name, args });
                }
                loop {
                    args.push(self.expr()?);
                    match self.peek() {
                        Some(Token::Comma) => {
                            self.cursor += 1;
                        }
                        Some(Token::RParen) => {
                            self.cursor += 1;
                            break;
                        }
                        _ => return Err(self.error("',' or ')'")),
                    }
                }
                Ok(Expr::Call { name, args })
            }
            Some(Token::Wildcard) => Err(self.error("expression")),
            _ => Ok(Expr::Term(self.term()?)),
        }
    }
}
