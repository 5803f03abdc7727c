//! A derivative-based recognizer for Parsing Expression Grammars built on
//! backtrack-generation bookkeeping.
//!
//! The recognizer repeatedly takes the "derivative" of a parsing expression
//! with respect to the next input byte: an expression matching the suffixes
//! of all strings the original expression accepts which start with that
//! byte. Ordered choice and syntactic predicates make this trickier than the
//! regular-language construction — whether an alternative survives can
//! depend on arbitrarily many future bytes — so expressions carry *backtrack
//! generations* (small integers naming undecided lookahead points) and
//! per-node maps renaming them across composition boundaries. See the
//! [`expr`] module for the algebra and the derivative rules.
//!
//! Grammars are loaded from a [`peggram::ast::GrammarAST`] with
//! [`DerivGrammar::new`] (which normalizes away direct left recursion and
//! computes per-rule nullability and backtrack sets to a fixed point) and
//! run with [`recognize`]:
//!
//! ```
//! use pegderiv::{recognize, DerivGrammar};
//!
//! let ast = "s <- !'a' . 'c'* ;".parse().unwrap();
//! let grm = DerivGrammar::new(&ast).unwrap();
//! assert!(recognize(&grm, "s", b"bcc"));
//! assert!(!recognize(&grm, "s", b"ac"));
//! ```

pub mod expr;
pub mod genmap;
pub mod grammar;
pub mod parse;

pub use grammar::DerivGrammar;
pub use parse::recognize;
