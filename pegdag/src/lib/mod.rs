//! A derivative-based recognizer for Parsing Expression Grammars built on a
//! shared node DAG with restriction (cut) bookkeeping.
//!
//! Where the `pegderiv` engine reconciles ordered choice with lookahead by
//! relabelling backtrack generations, this engine keeps every viable
//! alternative alive as an arc in a single graph and *cuts* the losers:
//! each arc carries the set of restrictions that block it and the set of
//! cuts it fires when traversed, and a [`state::StateMgr`] converges the
//! fired/unfirable sets after every derivative step. Rule bodies are built
//! once and cloned per invocation with their restriction indices shifted
//! into a fresh block; equivalent alternation successors are merged so that
//! shared prefixes are parsed once.
//!
//! ```
//! use pegdag::{recognize, DagGrammar};
//!
//! let ast = "s <- !'a' . 'c'* ;".parse().unwrap();
//! let grm = DagGrammar::new(&ast).unwrap();
//! assert!(recognize(&grm, "s", b"bcc"));
//! assert!(!recognize(&grm, "s", b"ac"));
//! ```

pub mod grammar;
pub mod node;
pub mod parse;
pub mod state;

pub use grammar::DagGrammar;
pub use parse::recognize;
