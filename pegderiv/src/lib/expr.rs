//! The parsing expression algebra and its per-character derivative.
//!
//! An [`Expr`] denotes, at every point of the parse, exactly the set of
//! suffixes the original grammar would still accept. Consuming one byte
//! replaces the current expression with its derivative (see [`deriv`]), an
//! expression for the suffixes of all accepted strings beginning with that
//! byte. Ordered choice and lookahead are made sound under this rewriting by
//! *backtrack generations*: small integers naming lookahead points whose
//! success or failure has been observed but not yet committed. Every
//! expression exposes
//!
//!   * `match_set`: the generations at which it currently matches the empty
//!     string (0 meaning "unconditionally"), and
//!   * `back_set`: the generations it may yet resume on failure or lookahead
//!     commitment (never empty; 0 present whenever plain failure is
//!     possible).
//!
//! Composite nodes carry [`GenMap`]s renaming their children's generations
//! into their own namespace, and derivative steps allocate a fresh
//! generation whenever a newly exposed lookahead would otherwise alias an
//! existing one.

use std::rc::Rc;

use peggram::{IdxSet, RuleIdx};

use crate::genmap::GenMap;
use crate::grammar::DerivGrammar;

/// A backtrack generation.
pub type Gen = usize;

/// A parsing expression. Immutable by contract once constructed; derivative
/// steps build new expressions, sharing unchanged subtrees.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Matches no string.
    Fail,
    /// Left-recursive non-termination; fails like `Fail` but survives
    /// negation (`!INF = INF`).
    Inf,
    /// Matches only the empty string.
    Eps,
    /// An empty match tagged with backtrack generation `g >= 1`.
    Look(Gen),
    /// Matches one specific byte.
    Char(u8),
    /// Matches one byte in the inclusive range.
    Range(u8, u8),
    /// Matches any single byte (but not end-of-input).
    Any,
    /// Matches the literal string `s[i..]`, of length >= 2. The buffer is
    /// interred and shared; derivatives advance the index.
    Str(Rc<[u8]>, usize),
    /// A reference to a named rule.
    Rule(RuleIdx),
    /// Negative lookahead.
    Not(Rc<Expr>),
    /// Renames the generations of `e` via `eg`, with maximum generation `gm`.
    Map {
        e: Rc<Expr>,
        gm: Gen,
        eg: GenMap,
    },
    /// Ordered choice between `a` and `b`, whose generations map into this
    /// node's namespace via `ag` and `bg`.
    Alt {
        a: Rc<Expr>,
        b: Rc<Expr>,
        ag: GenMap,
        bg: GenMap,
        gm: Gen,
    },
    /// `a` followed by its followers: `b` for a plain (generation-zero)
    /// match, one `Follower` per lookahead generation exposed by `a`, and
    /// the match-fail follower `c` continuing the parse of an earlier match
    /// of `a` that has since stopped matching.
    Seq {
        a: Rc<Expr>,
        b: Rc<Expr>,
        bs: Vec<Follower>,
        c: Rc<Expr>,
        cg: GenMap,
        gm: Gen,
    },
}

/// Follower of a `Seq`'s predecessor for one lookahead generation.
#[derive(Clone, Debug, PartialEq)]
pub struct Follower {
    /// Backtrack generation of `a` this follower corresponds to.
    pub g: Gen,
    /// Follower expression for this generation.
    pub e: Rc<Expr>,
    /// Map from the follower's generations to the containing node's.
    pub eg: GenMap,
    /// Generation of the follower's last match, 0 if none.
    pub gl: Gen,
}

pub fn fail() -> Rc<Expr> {
    Rc::new(Expr::Fail)
}

pub fn inf() -> Rc<Expr> {
    Rc::new(Expr::Inf)
}

pub fn eps() -> Rc<Expr> {
    Rc::new(Expr::Eps)
}

/// A lookahead success at generation `g`; generation 0 is an unconditional
/// match, i.e. `Eps`.
pub fn look(g: Gen) -> Rc<Expr> {
    if g == 0 {
        eps()
    } else {
        Rc::new(Expr::Look(g))
    }
}

pub fn chr(c: u8) -> Rc<Expr> {
    Rc::new(Expr::Char(c))
}

pub fn range(b: u8, e: u8) -> Rc<Expr> {
    Rc::new(Expr::Range(b, e))
}

pub fn any() -> Rc<Expr> {
    Rc::new(Expr::Any)
}

/// Makes an appropriate expression node for the length of the string.
pub fn str_lit(s: &[u8]) -> Rc<Expr> {
    match s.len() {
        0 => eps(),
        1 => chr(s[0]),
        _ => Rc::new(Expr::Str(s.into(), 0)),
    }
}

fn str_tail(sp: &Rc<[u8]>, i: usize) -> Rc<Expr> {
    if sp.len() - i == 1 {
        chr(sp[i])
    } else {
        Rc::new(Expr::Str(Rc::clone(sp), i))
    }
}

pub fn rule(r: RuleIdx) -> Rc<Expr> {
    Rc::new(Expr::Rule(r))
}

/// At what backtrack generations does `e` currently match the empty string?
pub fn match_set(grm: &DerivGrammar, e: &Expr) -> IdxSet {
    match e {
        Expr::Fail
        | Expr::Inf
        | Expr::Char(_)
        | Expr::Range(..)
        | Expr::Any
        | Expr::Str(..)
        | Expr::Not(_) => IdxSet::new(),
        Expr::Eps => IdxSet::of(&[0]),
        Expr::Look(g) => IdxSet::of(&[*g]),
        Expr::Rule(r) => grm.rule_match(*r),
        Expr::Map { e, eg, .. } => eg.image(&match_set(grm, e)),
        Expr::Alt { a, b, ag, bg, .. } => {
            &ag.image(&match_set(grm, a)) | &bg.image(&match_set(grm, b))
        }
        Expr::Seq { a, bs, c, cg, .. } => {
            // Matches from the match-fail follower...
            let mut x = cg.image(&match_set(grm, c));
            // ...plus those of followers whose lookahead generation is
            // currently matching, and their stored last-match generations.
            let am = match_set(grm, a);
            let mut bit = bs.iter().peekable();
            for ai in am.iter() {
                while bit.peek().is_some_and(|bi| bi.g < ai) {
                    bit.next();
                }
                if bit.peek().is_some_and(|bi| bi.g == ai) {
                    let bi = bit.next().unwrap();
                    x.union_with(&bi.eg.image(&match_set(grm, &bi.e)));
                    if bi.gl > 0 {
                        x.insert(bi.gl);
                    }
                }
            }
            x
        }
    }
}

/// What backtrack generations does `e` expose?
pub fn back_set(grm: &DerivGrammar, e: &Expr) -> IdxSet {
    match e {
        Expr::Fail
        | Expr::Inf
        | Expr::Eps
        | Expr::Char(_)
        | Expr::Range(..)
        | Expr::Any
        | Expr::Str(..) => IdxSet::of(&[0]),
        Expr::Look(g) => IdxSet::of(&[*g]),
        Expr::Not(_) => IdxSet::of(&[1]),
        Expr::Rule(r) => grm.rule_back(*r),
        Expr::Map { e, eg, .. } => eg.image(&back_set(grm, e)),
        Expr::Alt { a, b, ag, bg, .. } => {
            &ag.image(&back_set(grm, a)) | &bg.image(&back_set(grm, b))
        }
        Expr::Seq { a, bs, c, cg, .. } => {
            let mut x = if back_set(grm, a).min() == Some(0) {
                IdxSet::of(&[0])
            } else {
                IdxSet::new()
            };
            x.union_with(&cg.image(&back_set(grm, c)));
            for bi in bs {
                x.union_with(&bi.eg.image(&back_set(grm, &bi.e)));
                if bi.gl > 0 {
                    x.insert(bi.gl);
                }
            }
            x
        }
    }
}

fn back_max(grm: &DerivGrammar, e: &Expr) -> Gen {
    back_set(grm, e).max().expect("backtrack set is never empty")
}

/// The backtrack map for an expression about to be wrapped: `{0 -> 0}`, or
/// `{0 -> 0, 1 -> gm+1}` when `e` exposes a lookahead generation (in which
/// case `did_inc` is raised so the caller bumps its maximum).
fn new_back_map(grm: &DerivGrammar, e: &Expr, gm: Gen, did_inc: &mut bool) -> GenMap {
    let ebm = back_max(grm, e);
    if ebm > 0 {
        debug_assert_eq!(ebm, 1, "static lookahead gen <= 1");
        *did_inc = true;
        GenMap::pair(gm + 1)
    } else {
        GenMap::single()
    }
}

fn default_back_map(grm: &DerivGrammar, e: &Expr, did_inc: &mut bool) -> GenMap {
    new_back_map(grm, e, 0, did_inc)
}

/// Extends `eg` with a mapping for the generation a derivative newly
/// exposed, if any: the promotion `de_back_max -> gm+1` is appended iff
/// `de_back_max` exceeds the sub-expression's previous maximum `ebm`.
fn update_back_map(eg: &mut GenMap, ebm: Gen, de_back_max: Gen, gm: Gen, did_inc: &mut bool) {
    if de_back_max > ebm {
        debug_assert_eq!(de_back_max, ebm + 1, "generations grow by one");
        *did_inc = true;
        eg.add_back(de_back_max, gm + 1);
    }
}

/// Negative lookahead over `e`, simplified.
pub fn not_(grm: &DerivGrammar, e: Rc<Expr>) -> Rc<Expr> {
    match &*e {
        // Match on subexpression failure.
        Expr::Fail => look(1),
        // Propagate infinite loop.
        Expr::Inf => e,
        _ => {
            // Failure on subexpression success.
            if !match_set(grm, &e).is_empty() {
                fail()
            } else {
                Rc::new(Expr::Not(e))
            }
        }
    }
}

/// Wraps `e` in a generation renaming, simplified.
pub fn map_(grm: &DerivGrammar, e: Rc<Expr>, gm: Gen, eg: GenMap) -> Rc<Expr> {
    debug_assert!(back_max(grm, &e) <= eg.max_key(), "no unmapped generations");
    debug_assert!(eg.max() <= gm, "gm is the actual maximum");
    match &*e {
        // Map the expression's match generation into its exit generation.
        Expr::Eps => look(eg.get(0)),
        Expr::Look(g) => look(eg.get(*g)),
        // Propagate failure and infinite loops.
        Expr::Fail | Expr::Inf => e,
        _ => {
            // A map whose maximum equals its maximum key is the identity.
            if gm == eg.max_key() {
                e
            } else {
                Rc::new(Expr::Map { e, gm, eg })
            }
        }
    }
}

/// Ordered choice with the default generation maps.
pub fn alt2(grm: &DerivGrammar, a: Rc<Expr>, b: Rc<Expr>) -> Rc<Expr> {
    match &*a {
        // If the first alternative fails, use the second.
        Expr::Fail => return b,
        // If the first alternative is an infinite loop, propagate it.
        Expr::Inf => return a,
        _ => (),
    }
    // If the first alternative matches or the second fails, use the first.
    if matches!(&*b, Expr::Fail) || !match_set(grm, &a).is_empty() {
        return a;
    }
    let mut did_inc = false;
    let ag = default_back_map(grm, &a, &mut did_inc);
    let bg = default_back_map(grm, &b, &mut did_inc);
    let gm = if did_inc { 1 } else { 0 };
    Rc::new(Expr::Alt { a, b, ag, bg, gm })
}

/// Ordered choice with the given generation maps.
pub fn alt(
    grm: &DerivGrammar,
    a: Rc<Expr>,
    b: Rc<Expr>,
    ag: GenMap,
    bg: GenMap,
    gm: Gen,
) -> Rc<Expr> {
    debug_assert!(gm >= ag.max() && gm >= bg.max(), "gm is the actual maximum");
    match &*a {
        Expr::Fail => return map_(grm, b, gm, bg),
        Expr::Inf => return a,
        _ => (),
    }
    if matches!(&*b, Expr::Fail) || !match_set(grm, &a).is_empty() {
        return map_(grm, a, gm, ag);
    }
    Rc::new(Expr::Alt { a, b, ag, bg, gm })
}

/// Sequences `a` before `b`, simplified.
pub fn seq2(grm: &DerivGrammar, a: Rc<Expr>, b: Rc<Expr>) -> Rc<Expr> {
    match &*b {
        // An empty second element just leaves the first.
        Expr::Eps => return a,
        // A failing second element propagates.
        Expr::Fail => return b,
        _ => (),
    }
    match &*a {
        // An empty first element just leaves the follower, as does a
        // first-generation lookahead success.
        Expr::Eps => return b,
        Expr::Look(g) => {
            debug_assert_eq!(*g, 1, "static lookahead gen <= 1");
            return if *g == 1 { b } else { fail() };
        }
        // Failure or infinite loop propagates.
        Expr::Fail | Expr::Inf => return a,
        _ => (),
    }
    let mut did_inc = false;
    // Set up the match-fail follower: if `a` already matches plainly, an
    // alternative parse continues through `b` from here.
    let am = match_set(grm, &a);
    let (c, cg) = if am.contains(0) {
        let mut cg = GenMap::single();
        update_back_map(&mut cg, 0, back_max(grm, &b), 0, &mut did_inc);
        (Rc::clone(&b), cg)
    } else {
        (fail(), GenMap::single())
    };
    // Set up the lookahead follower.
    let mut bs = Vec::new();
    let abm = back_max(grm, &a);
    if abm > 0 {
        debug_assert_eq!(abm, 1, "static lookahead gen <= 1");
        let gl = if match_set(grm, &b).contains(0) {
            did_inc = true;
            1
        } else {
            0
        };
        let eg = default_back_map(grm, &b, &mut did_inc);
        bs.push(Follower {
            g: 1,
            e: Rc::clone(&b),
            eg,
            gl,
        });
    }
    let gm = if did_inc { 1 } else { 0 };
    Rc::new(Expr::Seq {
        a,
        b,
        bs,
        c,
        cg,
        gm,
    })
}

/// The derivative of `e` with respect to the byte `x` (0 = end of input):
/// an expression accepting `{ s | x.s in L(e) }`.
pub fn deriv(grm: &DerivGrammar, e: &Rc<Expr>, x: u8) -> Rc<Expr> {
    match &**e {
        // A failure expression can't un-fail.
        Expr::Fail => fail(),
        Expr::Inf => inf(),
        Expr::Eps => {
            if x == 0 {
                eps()
            } else {
                fail()
            }
        }
        Expr::Look(g) => {
            if x == 0 {
                look(*g)
            } else {
                fail()
            }
        }
        Expr::Char(c) => {
            if *c == x {
                eps()
            } else {
                fail()
            }
        }
        Expr::Range(b, en) => {
            if *b <= x && x <= *en {
                eps()
            } else {
                fail()
            }
        }
        Expr::Any => {
            if x == 0 {
                fail()
            } else {
                eps()
            }
        }
        Expr::Str(sp, i) => {
            if sp[*i] == x {
                str_tail(sp, i + 1)
            } else {
                fail()
            }
        }
        Expr::Rule(r) => {
            // Break left recursion by returning INF on re-entry.
            if grm.dirty(*r) {
                return inf();
            }
            grm.set_dirty(*r, true);
            let d = deriv(grm, &grm.rule_body(*r), x);
            grm.set_dirty(*r, false);
            d
        }
        Expr::Not(inner) => not_(grm, deriv(grm, inner, x)),
        Expr::Map { e, gm, eg } => deriv_map(grm, e, *gm, eg, x),
        Expr::Alt { a, b, ag, bg, gm } => deriv_alt(grm, a, b, ag, bg, *gm, x),
        Expr::Seq {
            a,
            b,
            bs,
            c,
            cg,
            gm,
        } => deriv_seq(grm, a, b, bs, c, cg, *gm, x),
    }
}

fn deriv_map(grm: &DerivGrammar, e: &Rc<Expr>, gm: Gen, eg: &GenMap, x: u8) -> Rc<Expr> {
    let ebm = back_max(grm, e);
    let de = deriv(grm, e, x);
    match &*de {
        Expr::Eps => return look(eg.get(0)),
        Expr::Look(g) => return look(eg.get(*g)),
        Expr::Fail | Expr::Inf => return de,
        _ => (),
    }
    let mut did_inc = false;
    let mut eg = eg.clone();
    update_back_map(&mut eg, ebm, back_max(grm, &de), gm, &mut did_inc);
    map_(grm, de, gm + did_inc as Gen, eg)
}

fn deriv_alt(
    grm: &DerivGrammar,
    a: &Rc<Expr>,
    b: &Rc<Expr>,
    ag: &GenMap,
    bg: &GenMap,
    gm: Gen,
    x: u8,
) -> Rc<Expr> {
    let mut did_inc = false;
    let abm = back_max(grm, a);
    let da = deriv(grm, a, x);
    match &*da {
        Expr::Fail => {
            // The first alternative is gone; the second stands alone.
            let bbm = back_max(grm, b);
            let db = deriv(grm, b, x);
            let mut bg = bg.clone();
            update_back_map(&mut bg, bbm, back_max(grm, &db), gm, &mut did_inc);
            return map_(grm, db, gm + did_inc as Gen, bg);
        }
        Expr::Inf => return inf(),
        _ => (),
    }
    // Map in new lookahead generations for the derivative.
    let mut ag = ag.clone();
    update_back_map(&mut ag, abm, back_max(grm, &da), gm, &mut did_inc);
    // Eliminate the second alternative once the first matches.
    if !match_set(grm, &da).is_empty() {
        return map_(grm, da, gm + did_inc as Gen, ag);
    }
    let bbm = back_max(grm, b);
    let db = deriv(grm, b, x);
    // Eliminate the second alternative if it fails.
    if matches!(&*db, Expr::Fail) {
        return map_(grm, da, gm + did_inc as Gen, ag);
    }
    let mut bg = bg.clone();
    update_back_map(&mut bg, bbm, back_max(grm, &db), gm, &mut did_inc);
    Rc::new(Expr::Alt {
        a: da,
        b: db,
        ag,
        bg,
        gm: gm + did_inc as Gen,
    })
}

#[allow(clippy::too_many_arguments)]
fn deriv_seq(
    grm: &DerivGrammar,
    a: &Rc<Expr>,
    b: &Rc<Expr>,
    bs: &[Follower],
    c: &Rc<Expr>,
    cg: &GenMap,
    gm: Gen,
    x: u8,
) -> Rc<Expr> {
    let abm = back_max(grm, a);
    let da = deriv(grm, a, x);
    match &*da {
        Expr::Eps => {
            // The sequence's first element is complete; take the follower
            // (or, at end-of-input, the follower's end-of-input derivative).
            let mut did_inc = false;
            let bb = if x == 0 {
                deriv(grm, b, 0)
            } else {
                Rc::clone(b)
            };
            let bg = new_back_map(grm, &bb, gm, &mut did_inc);
            return map_(grm, bb, gm + did_inc as Gen, bg);
        }
        Expr::Look(g) => {
            // A lookahead success leaves the corresponding follower.
            for bi in bs {
                if bi.g < *g {
                    continue;
                }
                if bi.g > *g {
                    break;
                }
                let bibm = back_max(grm, &bi.e);
                let dbi = deriv(grm, &bi.e, x);
                if matches!(&*dbi, Expr::Fail) {
                    // The straight path fails, but an earlier match of this
                    // generation may stand.
                    return if bi.gl > 0 { look(bi.gl) } else { fail() };
                }
                let mut did_inc = false;
                let mut sg = bi.eg.clone();
                update_back_map(&mut sg, bibm, back_max(grm, &dbi), gm, &mut did_inc);
                let gm2 = gm + did_inc as Gen;
                // If there is no match-fail backtrack (or this generation is
                // it) the follower stands alone...
                let dbim = match_set(grm, &dbi);
                if bi.gl == 0 || dbim.contains(0) {
                    return map_(grm, dbi, gm2, sg);
                }
                // ...otherwise keep both the follower and its last match.
                return alt(grm, dbi, look(1), sg, GenMap::pair(bi.gl), gm2);
            }
            // End-of-input is the only case where a lookahead success for an
            // unseen generation can appear.
            if x == 0 {
                let mut did_inc = false;
                let db = deriv(grm, b, 0);
                let bg = new_back_map(grm, &db, gm, &mut did_inc);
                return map_(grm, db, gm + did_inc as Gen, bg);
            }
            return fail();
        }
        Expr::Fail => {
            // Continue the parse of the previous match via the match-fail
            // follower.
            let mut did_inc = false;
            let cbm = back_max(grm, c);
            let dc = deriv(grm, c, x);
            let mut cg = cg.clone();
            update_back_map(&mut cg, cbm, back_max(grm, &dc), gm, &mut did_inc);
            return map_(grm, dc, gm + did_inc as Gen, cg);
        }
        Expr::Inf => return inf(),
        _ => (),
    }
    let mut did_inc = false;
    // Update the match-fail follower: restart it on a fresh plain match of
    // the first element, advance it otherwise.
    let dam = match_set(grm, &da);
    let (dc, dcg) = if dam.contains(0) {
        let cg2 = new_back_map(grm, b, gm, &mut did_inc);
        (Rc::clone(b), cg2)
    } else {
        let cbm = back_max(grm, c);
        let dc = deriv(grm, c, x);
        let mut cg2 = cg.clone();
        update_back_map(&mut cg2, cbm, back_max(grm, &dc), gm, &mut did_inc);
        (dc, cg2)
    };
    // Advance the lookahead followers, dropping those whose generation no
    // longer appears in the first element's backtrack set.
    let dab = back_set(grm, &da);
    let dab_gens = dab.iter().filter(|&g| g > 0).collect::<Vec<_>>();
    let mut dab_it = dab_gens.iter().copied().peekable();
    let mut dbs = Vec::new();
    for bi in bs {
        let dg = match dab_it.peek() {
            Some(&dg) => dg,
            None => break,
        };
        if bi.g < dg {
            continue;
        }
        debug_assert_eq!(bi.g, dg, "no generations missing from follower list");
        let bibm = back_max(grm, &bi.e);
        let dbi = deriv(grm, &bi.e, x);
        let mut sg = bi.eg.clone();
        update_back_map(&mut sg, bibm, back_max(grm, &dbi), gm, &mut did_inc);
        let dgl = if match_set(grm, &dbi).contains(0) {
            did_inc = true;
            gm + 1
        } else {
            bi.gl
        };
        dbs.push(Follower {
            g: bi.g,
            e: dbi,
            eg: sg,
            gl: dgl,
        });
        dab_it.next();
    }
    // Emplace a follower for a newly exposed lookahead generation.
    if let Some(dg) = dab_it.next() {
        debug_assert!(dab_it.peek().is_none(), "only one new lookahead generation");
        debug_assert!(dg > abm, "new generation exceeds the previous maximum");
        let gl = if match_set(grm, b).contains(0) {
            did_inc = true;
            gm + 1
        } else {
            0
        };
        let eg = new_back_map(grm, b, gm, &mut did_inc);
        dbs.push(Follower {
            g: dg,
            e: Rc::clone(b),
            eg,
            gl,
        });
    }
    Rc::new(Expr::Seq {
        a: da,
        b: Rc::clone(b),
        bs: dbs,
        c: dc,
        cg: dcg,
        gm: gm + did_inc as Gen,
    })
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use super::{
        alt2, any, back_set, chr, deriv, eps, fail, inf, look, map_, match_set, not_, range, seq2,
        str_lit, Expr,
    };
    use crate::genmap::GenMap;
    use crate::grammar::DerivGrammar;
    use peggram::IdxSet;

    fn grm() -> DerivGrammar {
        DerivGrammar::new(&"dummy <- 'd' ;".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_terminal_derivatives() {
        let g = grm();
        assert_eq!(*deriv(&g, &fail(), b'a'), Expr::Fail);
        assert_eq!(*deriv(&g, &inf(), b'a'), Expr::Inf);
        assert_eq!(*deriv(&g, &eps(), 0), Expr::Eps);
        assert_eq!(*deriv(&g, &eps(), b'a'), Expr::Fail);
        assert_eq!(*deriv(&g, &look(2), 0), Expr::Look(2));
        assert_eq!(*deriv(&g, &look(2), b'a'), Expr::Fail);
        assert_eq!(*deriv(&g, &chr(b'a'), b'a'), Expr::Eps);
        assert_eq!(*deriv(&g, &chr(b'a'), b'b'), Expr::Fail);
        assert_eq!(*deriv(&g, &range(b'a', b'z'), b'm'), Expr::Eps);
        assert_eq!(*deriv(&g, &range(b'a', b'z'), b'A'), Expr::Fail);
        assert_eq!(*deriv(&g, &any(), b'x'), Expr::Eps);
        assert_eq!(*deriv(&g, &any(), 0), Expr::Fail);
    }

    #[test]
    fn test_str_derivatives() {
        let g = grm();
        let s = str_lit(b"abc");
        let d1 = deriv(&g, &s, b'a');
        assert!(matches!(&*d1, Expr::Str(sp, 1) if &sp[..] == b"abc"));
        let d2 = deriv(&g, &d1, b'b');
        assert_eq!(*d2, Expr::Char(b'c'));
        assert_eq!(*deriv(&g, &s, b'b'), Expr::Fail);
        assert_eq!(*str_lit(b"x"), Expr::Char(b'x'));
        assert_eq!(*str_lit(b""), Expr::Eps);
    }

    #[test]
    fn test_not_simplification() {
        let g = grm();
        assert_eq!(*not_(&g, fail()), Expr::Look(1));
        assert_eq!(*not_(&g, inf()), Expr::Inf);
        assert_eq!(*not_(&g, eps()), Expr::Fail);
        assert_eq!(*not_(&g, look(1)), Expr::Fail);
        assert!(matches!(*not_(&g, chr(b'a')), Expr::Not(_)));
    }

    #[test]
    fn test_map_simplification() {
        let g = grm();
        assert_eq!(*map_(&g, eps(), 2, GenMap::pair(2)), Expr::Eps);
        assert_eq!(*map_(&g, look(1), 2, GenMap::pair(2)), Expr::Look(2));
        assert_eq!(*map_(&g, fail(), 2, GenMap::pair(2)), Expr::Fail);
        // Identity maps are elided.
        let e = chr(b'a');
        assert!(Rc::ptr_eq(&map_(&g, Rc::clone(&e), 0, GenMap::single()), &e));
        // Non-identity maps are kept.
        let n = not_(&g, chr(b'a'));
        assert!(matches!(
            *map_(&g, n, 2, GenMap::pair(2)),
            Expr::Map { .. }
        ));
    }

    #[test]
    fn test_alt_simplification() {
        let g = grm();
        let b = chr(b'b');
        assert!(Rc::ptr_eq(&alt2(&g, fail(), Rc::clone(&b)), &b));
        assert_eq!(*alt2(&g, inf(), b.clone()), Expr::Inf);
        let a = chr(b'a');
        assert!(Rc::ptr_eq(&alt2(&g, Rc::clone(&a), fail()), &a));
        // A matching first alternative wins outright.
        assert_eq!(*alt2(&g, eps(), b.clone()), Expr::Eps);
        assert!(matches!(*alt2(&g, a, b), Expr::Alt { .. }));
    }

    #[test]
    fn test_seq_simplification() {
        let g = grm();
        let a = chr(b'a');
        let b = chr(b'b');
        assert!(Rc::ptr_eq(&seq2(&g, Rc::clone(&a), eps()), &a));
        assert_eq!(*seq2(&g, a.clone(), fail()), Expr::Fail);
        assert!(Rc::ptr_eq(&seq2(&g, eps(), Rc::clone(&b)), &b));
        assert!(Rc::ptr_eq(&seq2(&g, look(1), Rc::clone(&b)), &b));
        assert_eq!(*seq2(&g, fail(), b.clone()), Expr::Fail);
        assert_eq!(*seq2(&g, inf(), b.clone()), Expr::Inf);
        assert!(matches!(*seq2(&g, a, b), Expr::Seq { .. }));
    }

    #[test]
    fn test_match_and_back_invariants() {
        // back() is never empty, and match() is dominated by back().
        let g = grm();
        let exprs = vec![
            fail(),
            inf(),
            eps(),
            look(1),
            chr(b'a'),
            str_lit(b"ab"),
            not_(&g, chr(b'a')),
            alt2(&g, chr(b'a'), chr(b'b')),
            seq2(&g, not_(&g, chr(b'a')), any()),
            seq2(&g, alt2(&g, chr(b'a'), eps()), chr(b'b')),
        ];
        for e in &exprs {
            let b = back_set(&g, e);
            assert!(!b.is_empty(), "back set empty for {:?}", e);
            for m in match_set(&g, e).iter() {
                assert!(b.contains(m), "match gen {} not in back set of {:?}", m, e);
            }
        }
    }

    #[test]
    fn test_lookahead_derivative() {
        // d('b', !'a' .) commits the lookahead and leaves the follower.
        let g = grm();
        let e = seq2(&g, not_(&g, chr(b'a')), any());
        let d = deriv(&g, &e, b'b');
        assert_eq!(*d, Expr::Eps);
        // d('a', !'a' .) fails.
        assert_eq!(*deriv(&g, &e, b'a'), Expr::Fail);
    }

    #[test]
    fn test_simplification_idempotent() {
        // Rebuilding an already-simplified node from its parts returns a
        // structurally equal expression.
        let g = grm();
        let e = seq2(&g, not_(&g, str_lit(b"ab")), any());
        if let Expr::Seq { a, b, .. } = &*e {
            let e2 = seq2(&g, Rc::clone(a), Rc::clone(b));
            assert_eq!(e, e2);
        } else {
            panic!("seq2 did not build a Seq");
        }
        let f = alt2(&g, chr(b'a'), chr(b'b'));
        if let Expr::Alt { a, b, .. } = &*f {
            let f2 = alt2(&g, Rc::clone(a), Rc::clone(b));
            assert_eq!(f, f2);
        } else {
            panic!("alt2 did not build an Alt");
        }
    }

    #[test]
    fn test_derivative_introduces_generation() {
        // After consuming 'x', the pending lookahead over "xy" is still
        // undecided, so the sequence retains a lookahead follower.
        let g = grm();
        let e = seq2(&g, not_(&g, str_lit(b"xy")), any());
        let d = deriv(&g, &e, b'x');
        match &*d {
            Expr::Seq { a, bs, .. } => {
                assert!(matches!(&**a, Expr::Not(_)));
                assert_eq!(bs.len(), 1);
                assert_eq!(bs[0].g, 1);
            }
            e => panic!("unexpected derivative {:?}", e),
        }
        // 'y' next: the lookahead matches, so the whole expression fails.
        assert_eq!(*deriv(&g, &d, b'y'), Expr::Fail);
        // Anything else: the lookahead fails and the any-matcher's earlier
        // match is remembered at its backtrack generation (an enclosing
        // sequence's follower decides whether that match stands).
        assert_eq!(match_set(&g, &deriv(&g, &d, b'z')), IdxSet::of(&[1]));
    }
}
