//! Lexer for kernel source using logos
//!
//! Supports tokens like:
//! - Keywords: __kernel, __global, const, void, int, float, for, if, else
//! - Literals: 42, 1.5, 2.0f, 1e-3f
//! - Operators: arithmetic, relational, logical, bitwise, shifts, compound assignment
//! - Punctuation: ( ) [ ] { } , ; ? :

use std::ops::Range;

use logos::Logos;

use crate::error::{DispatchError, DispatchResult};

/// Token types for the kernel source dialect
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\n\r]+|//[^\n]*)")]
pub enum Token {
    // Keywords
    #[token("__kernel")]
    #[token("kernel")]
    Kernel,

    #[token("__global")]
    #[token("global")]
    Global,

    #[token("const")]
    Const,

    #[token("void")]
    Void,

    #[token("int")]
    IntType,

    #[token("float")]
    FloatType,

    #[token("for")]
    For,

    #[token("if")]
    If,

    #[token("else")]
    Else,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
    IntLit(i32),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?f?", parse_float)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+f?", parse_float)]
    FloatLit(f32),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("++")]
    PlusPlus,

    #[token("=")]
    Assign,

    #[token("+=")]
    PlusAssign,

    #[token("-=")]
    MinusAssign,

    #[token("*=")]
    StarAssign,

    #[token("/=")]
    SlashAssign,

    #[token("<")]
    Lt,

    #[token(">")]
    Gt,

    #[token("<=")]
    Le,

    #[token(">=")]
    Ge,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("&&")]
    AndAnd,

    #[token("||")]
    OrOr,

    #[token("!")]
    Bang,

    #[token("&")]
    Amp,

    #[token("|")]
    Pipe,

    #[token("<<")]
    Shl,

    #[token(">>")]
    Shr,

    #[token("?")]
    Question,

    #[token(":")]
    Colon,

    // Punctuation
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,
}

fn parse_float(lex: &mut logos::Lexer<Token>) -> Option<f32> {
    lex.slice().trim_end_matches('f').parse::<f32>().ok()
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Token::IntLit(n) => return write!(f, "{}", n),
            Token::FloatLit(n) => return write!(f, "{:?}f", n),
            Token::Ident(s) => return write!(f, "{}", s),
            Token::Kernel => "__kernel",
            Token::Global => "__global",
            Token::Const => "const",
            Token::Void => "void",
            Token::IntType => "int",
            Token::FloatType => "float",
            Token::For => "for",
            Token::If => "if",
            Token::Else => "else",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::PlusPlus => "++",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Amp => "&",
            Token::Pipe => "|",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::Question => "?",
            Token::Colon => ":",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Semicolon => ";",
        };
        write!(f, "{}", text)
    }
}

/// A token with its byte range in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get current position in source
    pub fn span(&self) -> Range<usize> {
        self.inner.span()
    }

    /// Lex the whole source, failing on the first unrecognised character
    pub fn tokenize(mut self) -> DispatchResult<Vec<Spanned>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.inner.next() {
            let span = self.inner.span();
            match result {
                Ok(token) => tokens.push(Spanned { token, span }),
                Err(()) => {
                    let source = self.inner.source();
                    return Err(DispatchError::compile(format!(
                        "{}: unexpected `{}`",
                        line_col(source, span.start),
                        &source[span]
                    )));
                }
            }
        }

        Ok(tokens)
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// `line:column` (1-based) of a byte offset
pub fn line_col(source: &str, offset: usize) -> String {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    format!("{}:{}", line, column)
}
