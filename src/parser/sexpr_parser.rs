use super::ast::{Ast, Node};
use crate::error::ParseError;
use crate::lexer::{Token, TokenKind};

/// S-expression parser: token stream to [`Ast`].
///
/// Keeps a stack of currently open call nodes; atoms attach to the top of
/// the stack. The root context is special in that only calls may appear.
pub struct Parser {
    tokens: Vec<Token>,
}

impl Parser {
    /// Creates a new parser over a token stream
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens }
    }

    /// Parses the tokens into an S-expression forest
    pub fn parse(self) -> Result<Ast, ParseError> {
        let mut ast = Ast::default();
        // Children of every call that is still open, innermost last
        let mut stack: Vec<Vec<Node>> = Vec::new();
        let mut last_line = 1;

        for token in self.tokens {
            last_line = token.line;
            match token.kind {
                TokenKind::Open => stack.push(Vec::new()),
                TokenKind::Close => {
                    let children = stack
                        .pop()
                        .ok_or(ParseError::UnbalancedParens { line: token.line })?;
                    if children.is_empty() {
                        return Err(ParseError::EmptyParens { line: token.line });
                    }
                    let call = Node::Call(children);
                    match stack.last_mut() {
                        Some(parent) => parent.push(call),
                        None => ast.roots.push(call),
                    }
                }
                TokenKind::Ident(name) => {
                    Self::push_atom(&mut stack, Node::Ident(name), token.line)?
                }
                TokenKind::Int(value) => {
                    Self::push_atom(&mut stack, Node::Int(value), token.line)?
                }
                TokenKind::Str(value) => {
                    Self::push_atom(&mut stack, Node::Str(value), token.line)?
                }
            }
        }

        if !stack.is_empty() {
            return Err(ParseError::UnbalancedParens { line: last_line });
        }
        Ok(ast)
    }

    fn push_atom(stack: &mut Vec<Vec<Node>>, atom: Node, line: usize) -> Result<(), ParseError> {
        match stack.last_mut() {
            Some(children) => {
                children.push(atom);
                Ok(())
            }
            // Root context: only calls are allowed here
            None => Err(ParseError::NonCallAtRoot { line }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> Result<Ast, ParseError> {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_parse_nested_calls() {
        let ast = parse("(set x (+ 1 2))").unwrap();
        assert_eq!(ast.roots.len(), 1);
        let Node::Call(children) = &ast.roots[0] else {
            panic!("root should be a call");
        };
        assert_eq!(children[0], Node::Ident("set".to_string()));
        assert_eq!(children[1], Node::Ident("x".to_string()));
        assert_eq!(
            children[2],
            Node::Call(vec![
                Node::Ident("+".to_string()),
                Node::Int(1),
                Node::Int(2),
            ])
        );
    }

    #[test]
    fn test_multiple_roots() {
        let ast = parse("(set x 1) (set y 2)").unwrap();
        assert_eq!(ast.roots.len(), 2);
    }

    #[test]
    fn test_atom_at_root_rejected() {
        assert_eq!(parse("42"), Err(ParseError::NonCallAtRoot { line: 1 }));
        assert_eq!(parse("x"), Err(ParseError::NonCallAtRoot { line: 1 }));
    }

    #[test]
    fn test_empty_parens_rejected() {
        assert_eq!(parse("()"), Err(ParseError::EmptyParens { line: 1 }));
    }

    #[test]
    fn test_unbalanced_parens() {
        assert_eq!(
            parse("(set x 1))"),
            Err(ParseError::UnbalancedParens { line: 1 })
        );
        assert_eq!(
            parse("(progn (set x 1)"),
            Err(ParseError::UnbalancedParens { line: 1 })
        );
    }

    #[test]
    fn test_canonical_print_round_trip() {
        let source = "(if (= x 1) (write-mem 3 65) (print-str \"no\"))";
        let ast = parse(source).unwrap();
        assert_eq!(ast.roots[0].to_string(), source);
    }
}
