//! A library for manipulating Parsing Expression Grammars (PEGs). It provides
//! the surface-syntax parser, the grammar AST, validation, normalization and
//! pretty-printing, together with the small leaf types (spans, rule indices
//! and dense index sets) shared by the derivative engines in the `pegderiv`
//! and `pegdag` crates.
//!
//! A note on the terminology we use:
//!
//!   * A rule is a mapping from a name to a single matcher (PEGs have no
//!     separate notion of productions: ordered choice lives inside the
//!     matcher tree).
//!   * The first rule of a grammar is its start rule unless a caller says
//!     otherwise.
//!
//! peggram makes the following guarantees about validated grammars:
//!
//!   * Every rule reference resolves to a rule in the grammar.
//!   * Rules are numbered in definition order from `0` to
//!     `rules.len() - 1` (inclusive), and `RuleIdx` values index that order.
//!
//! For most uses, the main entry points are `str::parse::<GrammarAST>()`,
//! [`GrammarAST::complete_and_validate`](ast/struct.GrammarAST.html) and
//! [`normalize`](normalize/fn.normalize.html).

pub mod ast;
mod idxnewtype;
mod idxset;
pub mod normalize;
pub mod parser;
mod span;

pub use idxnewtype::RuleIdx;
pub use idxset::IdxSet;
pub use span::Span;
