use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use peggram::{
    ast::{GrammarAST, GrammarValidationError, Matcher},
    normalize::normalize,
    IdxSet, RuleIdx,
};

use crate::expr::{
    alt2, any, back_set, chr, eps, fail, match_set, not_, range, rule, seq2, str_lit, Expr,
};

// The number of body-rebuild rounds and set-recomputation sweeps tolerated
// before concluding the grammar analysis has failed to converge. Generation
// depth is statically bounded at one, so in practice two rounds suffice.
const MAX_BUILD_ROUNDS: usize = 8;

/// A named rule of a loaded grammar: its lowered body plus the cached
/// match/backtrack sets and nullability derived from it. The body pointer is
/// patched while the grammar is loading (rules may be referenced before they
/// are defined) and never structurally modified thereafter.
#[derive(Debug)]
struct DerivRule {
    name: String,
    body: RefCell<Rc<Expr>>,
    matches: RefCell<IdxSet>,
    backs: RefCell<IdxSet>,
    /// Raised while this rule's derivative is being computed, to break left
    /// recursion (see `Expr::Rule` in [`crate::expr::deriv`]).
    dirty: Cell<bool>,
}

impl DerivRule {
    fn new(name: String) -> Self {
        DerivRule {
            name,
            body: RefCell::new(fail()),
            matches: RefCell::new(IdxSet::new()),
            backs: RefCell::new(IdxSet::of(&[0])),
            dirty: Cell::new(false),
        }
    }
}

/// A PEG lowered into the expression algebra: an ordered table of rules,
/// including anonymous rules generated for `*`/`+` repetition. Immutable
/// once `new` returns, apart from the per-rule dirty flags toggled during
/// derivative computation.
#[derive(Debug)]
pub struct DerivGrammar {
    rules: Vec<DerivRule>,
    names: IndexMap<String, RuleIdx>,
    start: String,
}

impl DerivGrammar {
    /// Normalizes and lowers `ast` into expression form, then computes each
    /// rule's match/backtrack sets to a fixed point (in the same style as a
    /// firsts-set analysis: sweep all rules until nothing changes).
    ///
    /// Because lowering consults the sets of rules referenced before they
    /// are defined, bodies are rebuilt and re-analysed until a rebuild
    /// leaves every rule's sets unchanged; the static bound of one lookahead
    /// generation makes this converge almost immediately.
    pub fn new(ast: &GrammarAST) -> Result<Self, GrammarValidationError> {
        ast.complete_and_validate()?;
        let ast = normalize(ast);
        let mut grm = DerivGrammar {
            rules: Vec::with_capacity(ast.rules.len()),
            names: IndexMap::new(),
            start: ast
                .start
                .as_ref()
                .map(|(name, _)| name.clone())
                .expect("validated grammar has a start rule"),
        };
        for rule in ast.rules.values() {
            grm.names
                .insert(rule.name.clone(), RuleIdx::from(grm.rules.len()));
            grm.rules.push(DerivRule::new(rule.name.clone()));
        }
        let mut prev: Option<Vec<(IdxSet, IdxSet)>> = None;
        for _ in 0..MAX_BUILD_ROUNDS {
            let mut anon = 0;
            for i in 0..ast.rules.len() {
                let (_, r) = ast.rules.get_index(i).expect("index within rules");
                let body = grm.lower(&r.matcher, &mut anon);
                *grm.rules[i].body.borrow_mut() = body;
            }
            grm.fixpoint_sets();
            let snap = grm
                .rules
                .iter()
                .map(|r| (r.matches.borrow().clone(), r.backs.borrow().clone()))
                .collect::<Vec<_>>();
            if prev.as_ref() == Some(&snap) {
                return Ok(grm);
            }
            prev = Some(snap);
        }
        debug_assert!(false, "grammar analysis failed to converge");
        Ok(grm)
    }

    /// Sweeps every rule, recomputing its match/backtrack sets from its
    /// body, until a sweep changes nothing.
    fn fixpoint_sets(&self) {
        for _ in 0..MAX_BUILD_ROUNDS * self.rules.len() + MAX_BUILD_ROUNDS {
            let mut changed = false;
            for r in &self.rules {
                let body = r.body.borrow().clone();
                let m = match_set(self, &body);
                let b = back_set(self, &body);
                let stale = *r.matches.borrow() != m;
                if stale {
                    *r.matches.borrow_mut() = m;
                    changed = true;
                }
                let stale = *r.backs.borrow() != b;
                if stale {
                    *r.backs.borrow_mut() = b;
                    changed = true;
                }
            }
            if !changed {
                return;
            }
        }
        debug_assert!(false, "match/backtrack sets failed to converge");
    }

    fn lower(&mut self, m: &Matcher, anon: &mut usize) -> Rc<Expr> {
        match m {
            Matcher::Empty => eps(),
            Matcher::Any => any(),
            Matcher::Char(c) => chr(*c),
            Matcher::Str(s) => str_lit(s),
            Matcher::Range(ranges) => {
                let mut e = fail();
                for &(b, en) in ranges.iter().rev() {
                    e = alt2(self, range(b, en), e);
                }
                e
            }
            Matcher::Rule(name) => rule(
                *self
                    .names
                    .get(name)
                    .expect("validated grammar has no unknown rule references"),
            ),
            Matcher::Seq(ms) => {
                let mut e = eps();
                for m in ms.iter().rev() {
                    let lowered = self.lower(m, anon);
                    e = seq2(self, lowered, e);
                }
                e
            }
            Matcher::Alt(ms) => {
                let mut e = fail();
                for m in ms.iter().rev() {
                    let lowered = self.lower(m, anon);
                    e = alt2(self, lowered, e);
                }
                e
            }
            Matcher::Opt(m) => {
                let lowered = self.lower(m, anon);
                alt2(self, lowered, eps())
            }
            Matcher::Many(m) => self.lower_many(m, anon),
            Matcher::Some(m) => {
                let r = self.lower_many(m, anon);
                let lowered = self.lower(m, anon);
                seq2(self, lowered, r)
            }
            Matcher::Look(m) => {
                let lowered = self.lower(m, anon);
                let inner = not_(self, lowered);
                not_(self, inner)
            }
            Matcher::Not(m) => {
                let lowered = self.lower(m, anon);
                not_(self, lowered)
            }
            // Captures and error naming are lowered to their inner matcher;
            // semantic actions match the empty string.
            Matcher::Capt(m) | Matcher::Named(m, _) => self.lower(m, anon),
            Matcher::Fail(_) => fail(),
            Matcher::Action(_) => eps(),
        }
    }

    /// Lowers `m*` to a fresh anonymous rule `R <- m R / ()`, returning a
    /// reference to it.
    fn lower_many(&mut self, m: &Matcher, anon: &mut usize) -> Rc<Expr> {
        let name = format!("*{}", anon);
        *anon += 1;
        let ridx = match self.names.get(&name) {
            Some(ridx) => *ridx,
            None => {
                let ridx = RuleIdx::from(self.rules.len());
                self.names.insert(name.clone(), ridx);
                self.rules.push(DerivRule::new(name));
                ridx
            }
        };
        let inner = self.lower(m, anon);
        let rec = seq2(self, inner, rule(ridx));
        let body = alt2(self, rec, eps());
        *self.rules[usize::from(ridx)].body.borrow_mut() = body;
        rule(ridx)
    }

    /// How many rules does this grammar have (anonymous repetition rules
    /// included)?
    pub fn rules_len(&self) -> usize {
        self.rules.len()
    }

    /// The index of the named rule, if any.
    pub fn rule_idx(&self, name: &str) -> Option<RuleIdx> {
        self.names.get(name).copied()
    }

    pub fn rule_name(&self, ridx: RuleIdx) -> &str {
        &self.rules[usize::from(ridx)].name
    }

    /// The grammar's default start rule.
    pub fn start_name(&self) -> &str {
        &self.start
    }

    /// Is the rule statically nullable (i.e. does it plainly match the
    /// empty string)?
    pub fn rule_nullable(&self, ridx: RuleIdx) -> bool {
        self.rule_match(ridx).contains(0)
    }

    pub(crate) fn rule_body(&self, ridx: RuleIdx) -> Rc<Expr> {
        self.rules[usize::from(ridx)].body.borrow().clone()
    }

    pub(crate) fn rule_match(&self, ridx: RuleIdx) -> IdxSet {
        self.rules[usize::from(ridx)].matches.borrow().clone()
    }

    pub(crate) fn rule_back(&self, ridx: RuleIdx) -> IdxSet {
        self.rules[usize::from(ridx)].backs.borrow().clone()
    }

    pub(crate) fn dirty(&self, ridx: RuleIdx) -> bool {
        self.rules[usize::from(ridx)].dirty.get()
    }

    pub(crate) fn set_dirty(&self, ridx: RuleIdx, v: bool) {
        self.rules[usize::from(ridx)].dirty.set(v);
    }
}
