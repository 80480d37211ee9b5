//! Property-based tests for the front end.
//!
//! 1. Printing a random S-expression forest and re-parsing it preserves the
//!    in-order atom sequence (the parse round-trip invariant).
//! 2. The scanner and parser never panic on arbitrary input — they either
//!    produce a forest or report an error.

use proptest::prelude::*;
use wordlisp::{Node, Parser, Scanner};

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

fn ident() -> impl Strategy<Value = Node> {
    // A multi-character word starting with `+` or `-` is taken for an
    // integer attempt by the scanner, so those two only appear alone
    prop_oneof![
        prop::sample::select(vec!["+", "-", "*", "/", "<", ">", "="])
            .prop_map(|s| Node::Ident(s.to_string())),
        "[a-z][a-z0-9?!-]{0,8}".prop_map(Node::Ident),
    ]
}

fn int() -> impl Strategy<Value = Node> {
    any::<i32>().prop_map(Node::Int)
}

fn string() -> impl Strategy<Value = Node> {
    "[a-zA-Z0-9 .,!]{0,12}".prop_map(Node::Str)
}

fn atom() -> impl Strategy<Value = Node> {
    prop_oneof![ident(), int(), string()]
}

/// Arbitrary expression: atoms at the leaves, calls above them
fn node() -> impl Strategy<Value = Node> {
    atom().prop_recursive(4, 32, 6, |inner| {
        prop::collection::vec(inner, 1..6).prop_map(Node::Call)
    })
}

/// A printable forest: top level is calls only, as the parser demands
fn forest() -> impl Strategy<Value = Vec<Node>> {
    prop::collection::vec(
        prop::collection::vec(node(), 1..5).prop_map(Node::Call),
        1..5,
    )
}

fn print_forest(roots: &[Node]) -> String {
    roots
        .iter()
        .map(Node::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn atom_sequence(roots: &[Node]) -> Vec<Node> {
    roots
        .iter()
        .flat_map(|root| root.atoms().into_iter().cloned())
        .collect()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn parse_round_trip_preserves_atoms(roots in forest()) {
        let source = print_forest(&roots);

        let tokens = Scanner::new(&source).scan_tokens().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();

        prop_assert_eq!(atom_sequence(&ast.roots), atom_sequence(&roots));
    }

    #[test]
    fn second_round_trip_is_identity(roots in forest()) {
        let source = print_forest(&roots);
        let tokens = Scanner::new(&source).scan_tokens().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();

        // Printing the parsed forest and parsing again changes nothing
        let reprinted = print_forest(&ast.roots);
        let tokens = Scanner::new(&reprinted).scan_tokens().unwrap();
        let ast2 = Parser::new(tokens).parse().unwrap();
        prop_assert_eq!(ast2.roots, ast.roots);
    }

    #[test]
    fn front_end_never_panics(source in "[\\x20-\\x7e\\n]{0,200}") {
        if let Ok(tokens) = Scanner::new(&source).scan_tokens() {
            let _ = Parser::new(tokens).parse();
        }
    }

    #[test]
    fn compile_never_panics_on_token_soup(source in "[()a-z0-9+*<>=\" ;\\n-]{0,80}") {
        let _ = wordlisp::compile(&source);
    }
}
