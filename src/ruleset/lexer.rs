//! Rule source tokenizer

use std::sync::Arc;

use logos::Logos;

use super::errors::{CompileError, CompileResult};
use crate::model::SourcePos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"%[^\n]*")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token(":-")]
    Implies,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("!")]
    Bang,
    #[token("=")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("_")]
    Wildcard,

    /// Predicate, function, aggregate, and type names
    #[regex(r"[a-z][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[A-Z][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    #[regex(r"_[A-Za-z0-9_]+", |lex| lex.slice().to_string())]
    Var(String),

    #[regex(r"\$[a-z_][a-z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Param(String),

    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),
}

impl Token {
    /// Short description for error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Var(name) => format!("variable '{}'", name),
            Token::Param(name) => format!("parameter '${}'", name),
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string {:?}", s),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Input => "input",
            Token::Output => "output",
            Token::Implies => ":-",
            Token::Colon => ":",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Bang => "!",
            Token::Eq => "=",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Wildcard => "_",
            Token::Ident(_) | Token::Var(_) | Token::Param(_) | Token::Number(_) | Token::Str(_) => {
                "literal"
            }
        }
    }
}

/// A token with the position of its first character
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: SourcePos,
}

fn unescape(quoted: &str) -> Option<String> {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            _ => return None,
        }
    }
    Some(out)
}

/// Maps byte offsets to 1-based line/column pairs.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn pos(&self, file: &Arc<str>, src: &str, offset: usize) -> SourcePos {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = src[self.starts[line]..offset].chars().count() + 1;
        SourcePos {
            file: Arc::clone(file),
            line: line as u32 + 1,
            col: col as u32,
        }
    }
}

/// Splits rule source into tokens.
///
/// The final element is always the position just past the input, used for
/// "unexpected end of file" reporting.
pub fn tokenize(file: &Arc<str>, src: &str) -> CompileResult<(Vec<Spanned>, SourcePos)> {
    let index = LineIndex::new(src);
    let mut lex = Token::lexer(src);
    let mut tokens = Vec::new();

    while let Some(result) = lex.next() {
        let pos = index.pos(file, src, lex.span().start);
        match result {
            Ok(token) => tokens.push(Spanned { token, pos }),
            Err(()) => {
                return Err(CompileError::syntax(
                    pos,
                    format!("unrecognized input {:?}", lex.slice()),
                ))
            }
        }
    }

    Ok((tokens, index.pos(file, src, src.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        let file: Arc<str> = Arc::from("test.dl");
        tokenize(&file, src)
            .unwrap()
            .0
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_rule_tokens() {
        let tokens = lex(r#"p(X, "a") :- q(X, _), X >= $min."#);
        assert_eq!(
            tokens,
            vec![
                Token::Ident("p".into()),
                Token::LParen,
                Token::Var("X".into()),
                Token::Comma,
                Token::Str("a".into()),
                Token::RParen,
                Token::Implies,
                Token::Ident("q".into()),
                Token::LParen,
                Token::Var("X".into()),
                Token::Comma,
                Token::Wildcard,
                Token::RParen,
                Token::Comma,
                Token::Var("X".into()),
                Token::Ge,
                Token::Param("min".into()),
                Token::Dot,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = lex("% heading\np(1). // trailing\n");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("p".into()),
                Token::LParen,
                Token::Number(1.0),
                Token::RParen,
                Token::Dot,
            ]
        );
    }

    #[test]
    fn test_number_before_clause_dot() {
        let tokens = lex("w(0.93).");
        assert_eq!(tokens[2], Token::Number(0.93));
        assert_eq!(tokens[4], Token::Dot);
    }

    #[test]
    fn test_keywords_and_named_wildcards() {
        let tokens = lex("input inputs _x _");
        assert_eq!(
            tokens,
            vec![
                Token::Input,
                Token::Ident("inputs".into()),
                Token::Var("_x".into()),
                Token::Wildcard,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(lex(r#""a\"b""#), vec![Token::Str("a\"b".into())]);
    }

    #[test]
    fn test_error_position() {
        let file: Arc<str> = Arc::from("bad.dl");
        let err = tokenize(&file, "p(X).\n  q(#).").unwrap_err();
        match err {
            CompileError::Syntax { pos, .. } => {
                assert_eq!(pos.line, 2);
                assert_eq!(pos.col, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
