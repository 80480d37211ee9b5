use super::token::{Token, TokenKind};
use crate::error::LexError;

/// Scanner for the parenthesized source syntax
pub struct Scanner {
    /// Source code as a character vector
    source: Vec<char>,
    /// Current position in source
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
}

/// Anything printable and non-special can sit inside a word.
/// `-`, `+`, `<`, and many others are ordinary identifier characters here.
fn is_word_char(c: char) -> bool {
    match c {
        '(' | ')' | ';' | '"' => false,
        _ => !c.is_whitespace() && !c.is_control(),
    }
}

impl Scanner {
    /// Creates a new scanner from source code
    pub fn new(source: &str) -> Self {
        Scanner {
            source: source.chars().collect(),
            current: 0,
            line: 1,
        }
    }

    /// Scans the whole input and returns the token stream
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek_after_whitespace() {
            let line = self.line;
            let kind = match c {
                '(' => {
                    self.advance();
                    TokenKind::Open
                }
                ')' => {
                    self.advance();
                    TokenKind::Close
                }
                '"' => self.scan_string()?,
                _ => self.scan_word()?,
            };
            tokens.push(Token::new(kind, line));
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.current).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.current += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Skip whitespace, control characters, and `;`-to-end-of-line comments,
    /// then peek
    fn peek_after_whitespace(&mut self) -> Option<char> {
        let mut inside_comment = false;
        while let Some(c) = self.peek() {
            if c == ';' {
                inside_comment = true;
            } else if c == '\n' {
                inside_comment = false;
            }
            if !c.is_whitespace() && !c.is_control() && !inside_comment {
                return Some(c);
            }
            self.advance();
        }
        None
    }

    /// A multi-character word is either an identifier or an integer
    fn scan_word(&mut self) -> Result<TokenKind, LexError> {
        let line = self.line;
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if !is_word_char(c) {
                break;
            }
            self.advance();
            word.push(c);
        }
        debug_assert!(!word.is_empty());

        // '+' and '-' can start a number, but should be identifiers on their own
        let first = word.chars().next().unwrap_or_default();
        let looks_numeric =
            first.is_ascii_digit() || (word.len() >= 2 && (first == '-' || first == '+'));

        if looks_numeric {
            match word.parse::<i32>() {
                Ok(value) => Ok(TokenKind::Int(value)),
                Err(e) => Err(LexError::BadInteger {
                    line,
                    text: word,
                    reason: e.to_string(),
                }),
            }
        } else {
            Ok(TokenKind::Ident(word))
        }
    }

    /// `"…"` with no escape sequences
    fn scan_string(&mut self) -> Result<TokenKind, LexError> {
        let line = self.line;
        self.advance(); // opening quote
        let mut literal = String::new();
        while let Some(c) = self.advance() {
            if c == '"' {
                return Ok(TokenKind::Str(literal));
            }
            literal.push(c);
        }
        Err(LexError::UnterminatedString { line })
    }
}
