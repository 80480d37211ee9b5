use serde::{Deserialize, Serialize};

/// A single token from the source code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub kind: TokenKind,
    /// Line number where the token starts (1-indexed)
    pub line: usize,
}

impl Token {
    /// Creates a new token on the given line
    pub fn new(kind: TokenKind, line: usize) -> Self {
        Token { kind, line }
    }
}

/// All possible token types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Opening parenthesis `(`
    Open,
    /// Closing parenthesis `)`
    Close,
    /// Identifier (function or binding name). Lisps are lax about what an
    /// identifier may contain: anything printable except `( ) ; "`.
    Ident(String),
    /// 32-bit signed integer literal
    Int(i32),
    /// String literal, no escape processing
    Str(String),
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TokenKind::Open => write!(f, "("),
            TokenKind::Close => write!(f, ")"),
            TokenKind::Ident(name) => write!(f, "{}", name),
            TokenKind::Int(n) => write!(f, "{}", n),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}
