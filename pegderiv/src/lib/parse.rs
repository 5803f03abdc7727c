use crate::expr::{chr, deriv, match_set, rule, seq2, Expr};
use crate::grammar::DerivGrammar;

/// Decides whether `input` as a whole matches `start`.
///
/// The head expression is the start rule followed by an explicit
/// end-of-input matcher (the byte 0 sentinel), so a complete match always
/// surfaces at backtrack generation 0: the recognizer pulls one byte at a
/// time, replaces the head with its derivative, and reports a match exactly
/// when the sentinel derivative leaves generation 0 in the match set.
/// `FAIL` and `INF` heads (and unknown start rules) report no-match.
pub fn recognize(grm: &DerivGrammar, start: &str, input: &[u8]) -> bool {
    let ridx = match grm.rule_idx(start) {
        Some(ridx) => ridx,
        None => return false,
    };
    if input.is_empty() && grm.rule_nullable(ridx) {
        return true;
    }
    let mut e = seq2(grm, rule(ridx), chr(0));
    for &x in input {
        if x == 0 {
            // 0 is reserved as the end-of-input sentinel; no grammar
            // matches a literal NUL.
            return false;
        }
        e = deriv(grm, &e, x);
        if matches!(&*e, Expr::Fail | Expr::Inf) {
            return false;
        }
    }
    let e = deriv(grm, &e, 0);
    match_set(grm, &e).contains(0)
}
