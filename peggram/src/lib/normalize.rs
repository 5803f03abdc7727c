//! Grammar normalization, run by both engine loaders before lowering.
//!
//! The one rewrite performed here factors *direct* left recursion out of a
//! rule. For
//!
//! ```text
//! R <- R a1 / ... / R am / b1 / ... / bn ;
//! ```
//!
//! the alternatives are rewritten to
//!
//! ```text
//! R <- b1 R_tail / ... / bn R_tail ;
//! R_tail <- a1 R_tail / ... / am R_tail / () ;
//! ```
//!
//! which preserves alternative ordering (so the choice stays greedy) and
//! breaks the left recursion into its right-recursive equivalent. Degenerate
//! `R <- R` alternatives are dropped outright, and a rule consisting solely
//! of left-recursive alternatives can never make progress, so it is replaced
//! by a failing matcher. Indirect left recursion is not rewritten; the
//! engines' re-entry guards turn it into a non-match at parse time.

use crate::ast::{GrammarAST, Matcher};

/// If `m` is an alternative of `name` that starts by invoking `name` itself,
/// returns the remainder of the alternative.
fn strip_self(name: &str, m: &Matcher) -> Option<Matcher> {
    match m {
        Matcher::Rule(n) if n == name => Some(Matcher::Empty),
        Matcher::Seq(ms) if !ms.is_empty() && ms[0] == Matcher::Rule(name.to_string()) => {
            let rest = &ms[1..];
            Some(match rest.len() {
                0 => Matcher::Empty,
                1 => rest[0].clone(),
                _ => Matcher::Seq(rest.to_vec()),
            })
        }
        _ => None,
    }
}

/// Sequences `m` in front of a reference to `tail`, flattening nested
/// sequences as the surface parser would have produced them.
fn seq_before(m: Matcher, tail: &str) -> Matcher {
    let tail = Matcher::Rule(tail.to_string());
    match m {
        Matcher::Empty => tail,
        Matcher::Seq(mut ms) => {
            ms.push(tail);
            Matcher::Seq(ms)
        }
        m => Matcher::Seq(vec![m, tail]),
    }
}

fn alt_of(mut ms: Vec<Matcher>) -> Matcher {
    if ms.len() == 1 {
        ms.pop().unwrap()
    } else {
        Matcher::Alt(ms)
    }
}

/// Returns a copy of `ast` with direct left recursion factored out.
pub fn normalize(ast: &GrammarAST) -> GrammarAST {
    let mut out = GrammarAST::new();
    out.start = ast.start.clone();
    for rule in ast.rules.values() {
        let alts = match &rule.matcher {
            Matcher::Alt(ms) => ms.clone(),
            m => vec![m.clone()],
        };
        let mut recs = Vec::new();
        let mut bases = Vec::new();
        let mut dropped = false;
        for a in alts {
            match strip_self(&rule.name, &a) {
                Some(Matcher::Empty) => dropped = true,
                Some(alpha) => recs.push(alpha),
                None => bases.push(a),
            }
        }
        if recs.is_empty() && !dropped {
            out.rules.insert(rule.name.clone(), rule.clone());
            continue;
        }
        if recs.is_empty() {
            // Only degenerate self-alternatives were removed.
            let mut r = rule.clone();
            r.matcher = if bases.is_empty() {
                Matcher::Fail("unproductive left recursion".to_string())
            } else {
                alt_of(bases)
            };
            out.rules.insert(rule.name.clone(), r);
            continue;
        }
        if bases.is_empty() {
            // Every alternative re-enters the rule before consuming input, so
            // no string can ever complete a match.
            let mut r = rule.clone();
            r.matcher = Matcher::Fail("unproductive left recursion".to_string());
            out.rules.insert(rule.name.clone(), r);
            continue;
        }
        // Generate a guaranteed unique name for the tail rule. We simply keep
        // making the string longer until we've hit something unique.
        let mut tail = format!("{}_tail", rule.name);
        while ast.rules.contains_key(&tail) {
            tail.push('_');
        }
        let mut r = rule.clone();
        r.matcher = alt_of(
            bases
                .into_iter()
                .map(|b| seq_before(b, &tail))
                .collect::<Vec<_>>(),
        );
        out.rules.insert(rule.name.clone(), r);
        let mut tail_alts = recs
            .into_iter()
            .map(|a| seq_before(a, &tail))
            .collect::<Vec<_>>();
        tail_alts.push(Matcher::Empty);
        out.add_rule(tail.clone(), rule.name_span, Matcher::Alt(tail_alts));
    }
    out
}

#[cfg(test)]
mod test {
    use super::normalize;
    use crate::ast::{GrammarAST, Matcher};

    fn parse(s: &str) -> GrammarAST {
        let ast = s.parse::<GrammarAST>().unwrap();
        ast.complete_and_validate().unwrap();
        ast
    }

    #[test]
    fn test_untouched() {
        let ast = parse("a <- 'x' a? ; b <- a / 'y' ;");
        assert_eq!(normalize(&ast), ast);
    }

    #[test]
    fn test_direct_left_recursion() {
        let ast = normalize(&parse("r <- r 'a' / 'a' ;"));
        assert_eq!(
            ast.get_rule("r").unwrap().matcher,
            Matcher::Seq(vec![
                Matcher::Char(b'a'),
                Matcher::Rule("r_tail".to_string()),
            ])
        );
        assert_eq!(
            ast.get_rule("r_tail").unwrap().matcher,
            Matcher::Alt(vec![
                Matcher::Seq(vec![
                    Matcher::Char(b'a'),
                    Matcher::Rule("r_tail".to_string()),
                ]),
                Matcher::Empty,
            ])
        );
        assert!(ast.complete_and_validate().is_ok());
    }

    #[test]
    fn test_degenerate_self_alternative() {
        let ast = normalize(&parse("r <- r / 'a' ;"));
        assert_eq!(ast.get_rule("r").unwrap().matcher, Matcher::Char(b'a'));
        assert!(ast.get_rule("r_tail").is_none());
    }

    #[test]
    fn test_unproductive() {
        let ast = normalize(&parse("r <- r 'a' ;"));
        assert!(matches!(
            ast.get_rule("r").unwrap().matcher,
            Matcher::Fail(_)
        ));
    }

    #[test]
    fn test_tail_name_collision() {
        let ast = normalize(&parse("r <- r 'a' / 'b' ; r_tail <- 'x' ;"));
        assert!(ast.get_rule("r_tail_").is_some());
        assert_eq!(
            ast.get_rule("r").unwrap().matcher,
            Matcher::Seq(vec![
                Matcher::Char(b'b'),
                Matcher::Rule("r_tail_".to_string()),
            ])
        );
    }

    #[test]
    fn test_multiple_alternatives() {
        let ast = normalize(&parse("r <- r 'a' / r 'b' / 'c' / 'd' ;"));
        assert_eq!(
            ast.get_rule("r").unwrap().matcher,
            Matcher::Alt(vec![
                Matcher::Seq(vec![
                    Matcher::Char(b'c'),
                    Matcher::Rule("r_tail".to_string()),
                ]),
                Matcher::Seq(vec![
                    Matcher::Char(b'd'),
                    Matcher::Rule("r_tail".to_string()),
                ]),
            ])
        );
        assert_eq!(
            ast.get_rule("r_tail").unwrap().matcher,
            Matcher::Alt(vec![
                Matcher::Seq(vec![
                    Matcher::Char(b'a'),
                    Matcher::Rule("r_tail".to_string()),
                ]),
                Matcher::Seq(vec![
                    Matcher::Char(b'b'),
                    Matcher::Rule("r_tail".to_string()),
                ]),
                Matcher::Empty,
            ])
        );
    }
}
