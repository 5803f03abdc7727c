use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use peggram::{
    ast::{GrammarAST, GrammarValidationError, Matcher},
    normalize::normalize,
    IdxSet, RuleIdx,
};

use crate::node::{alt_make, Arc, Node};
use crate::state::StateMgr;

/// A named rule of a loaded DAG grammar: the body graph (terminated by an
/// `End` node), the count of restriction indices its arcs use, and its
/// cached nullability. Built once at load time and never modified.
#[derive(Debug)]
pub struct DagRule {
    pub name: String,
    body: Rc<Node>,
    nrestrict: usize,
    nullable: bool,
}

/// A PEG lowered into a shared node DAG, one sub-graph per rule (anonymous
/// rules for `*`/`+` repetition included). Rule bodies use rule-local
/// restriction indices `0..nrestrict`; each invocation of a rule clones its
/// body with the indices shifted into a freshly reserved block.
#[derive(Debug)]
pub struct DagGrammar {
    rules: Vec<DagRule>,
    names: IndexMap<String, RuleIdx>,
    start: String,
}

impl DagGrammar {
    pub fn new(ast: &GrammarAST) -> Result<Self, GrammarValidationError> {
        ast.complete_and_validate()?;
        let ast = normalize(ast);
        let mut loader = Loader {
            rules: Vec::with_capacity(ast.rules.len()),
            names: IndexMap::new(),
            next: Rc::new(Node::End),
            next_cuts: IdxSet::new(),
            ri: 0,
            anon: 0,
            // Nothing is enforced at load time; the manager only feeds the
            // alternation builder's dead-arc checks.
            mgr: StateMgr::new(0),
        };
        for rule in ast.rules.values() {
            loader
                .names
                .insert(rule.name.clone(), RuleIdx::from(loader.rules.len()));
            loader.rules.push(DagRule {
                name: rule.name.clone(),
                body: Rc::new(Node::Fail),
                nrestrict: 0,
                nullable: false,
            });
        }
        for (i, rule) in ast.rules.values().enumerate() {
            loader.set_next(Rc::new(Node::End));
            loader.ri = 0;
            loader.lower(&rule.matcher);
            loader.rules[i].body = Rc::clone(&loader.next);
            loader.rules[i].nrestrict = loader.ri;
        }
        let mut grm = DagGrammar {
            rules: loader.rules,
            names: loader.names,
            start: ast
                .start
                .as_ref()
                .map(|(name, _)| name.clone())
                .expect("validated grammar has a start rule"),
        };
        for i in 0..grm.rules.len() {
            let mut visiting = HashSet::new();
            let body = Rc::clone(&grm.rules[i].body);
            let nullable = grm.node_nullable(&body, &mut visiting);
            grm.rules[i].nullable = nullable;
        }
        Ok(grm)
    }

    pub fn rules_len(&self) -> usize {
        self.rules.len()
    }

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

    /// Is the rule's body an unrestricted match of the empty string?
    pub fn rule_nullable(&self, ridx: RuleIdx) -> bool {
        self.rules[usize::from(ridx)].nullable
    }

    /// Clones the rule's body into the caller's context: restriction
    /// indices are shifted into a freshly reserved block, and arcs to the
    /// body's `End` node are rewired to the caller's continuation `cont`.
    /// Rule references inside the body are re-emitted without descent, so
    /// the clone walks the body exactly once even for recursive rules.
    pub(crate) fn clone_rule(&self, ridx: RuleIdx, cont: &Arc, mgr: &mut StateMgr) -> Rc<Node> {
        let r = &self.rules[usize::from(ridx)];
        let base = mgr.reserve(r.nrestrict);
        let mut seen = HashMap::new();
        clone_node(&r.body, base, cont, &mut seen)
    }

    /// A conservative emptiness check: can the body reach its `End` through
    /// arcs with no blockers and no consuming nodes? Rules currently being
    /// checked are treated as non-nullable, which breaks reference cycles.
    fn node_nullable(&self, n: &Rc<Node>, visiting: &mut HashSet<RuleIdx>) -> bool {
        match &**n {
            Node::End | Node::Match => true,
            Node::Fail | Node::Inf => false,
            Node::Char { .. } | Node::Range { .. } | Node::Any { .. } | Node::Str { .. } => false,
            Node::Rule { out, ridx } => {
                if !out.blocking.is_empty() || !visiting.insert(*ridx) {
                    return false;
                }
                let r = self.node_nullable(&self.rules[usize::from(*ridx)].body, visiting)
                    && self.node_nullable(&out.succ, visiting);
                visiting.remove(ridx);
                r
            }
            Node::Alt { arcs } => arcs
                .iter()
                .any(|a| a.blocking.is_empty() && self.node_nullable(&a.succ, visiting)),
        }
    }
}

fn shift(s: &IdxSet, base: usize) -> IdxSet {
    s.iter().map(|i| i + base).collect()
}

fn clone_arc(
    a: &Arc,
    base: usize,
    cont: &Arc,
    seen: &mut HashMap<*const Node, Rc<Node>>,
) -> Arc {
    let mut blocking = shift(&a.blocking, base);
    let mut cuts = shift(&a.cuts, base);
    if matches!(&*a.succ, Node::End) {
        blocking.union_with(&cont.blocking);
        cuts.union_with(&cont.cuts);
        Arc {
            succ: Rc::clone(&cont.succ),
            blocking,
            cuts,
        }
    } else {
        Arc {
            succ: clone_node(&a.succ, base, cont, seen),
            blocking,
            cuts,
        }
    }
}

fn clone_node(
    n: &Rc<Node>,
    base: usize,
    cont: &Arc,
    seen: &mut HashMap<*const Node, Rc<Node>>,
) -> Rc<Node> {
    if let Some(c) = seen.get(&Rc::as_ptr(n)) {
        return Rc::clone(c);
    }
    let cloned = match &**n {
        Node::Match | Node::Fail | Node::Inf => Rc::clone(n),
        // A body that is just `End` reduces to the caller's continuation.
        Node::End => {
            if cont.blocking.is_empty() && cont.cuts.is_empty() {
                Rc::clone(&cont.succ)
            } else {
                Rc::new(Node::Alt {
                    arcs: vec![cont.clone()],
                })
            }
        }
        Node::Char { out, c } => Rc::new(Node::Char {
            out: clone_arc(out, base, cont, seen),
            c: *c,
        }),
        Node::Range { out, b, e } => Rc::new(Node::Range {
            out: clone_arc(out, base, cont, seen),
            b: *b,
            e: *e,
        }),
        Node::Any { out } => Rc::new(Node::Any {
            out: clone_arc(out, base, cont, seen),
        }),
        Node::Str { out, s, i } => Rc::new(Node::Str {
            out: clone_arc(out, base, cont, seen),
            s: Rc::clone(s),
            i: *i,
        }),
        Node::Rule { out, ridx } => Rc::new(Node::Rule {
            out: clone_arc(out, base, cont, seen),
            ridx: *ridx,
        }),
        Node::Alt { arcs } => Rc::new(Node::Alt {
            arcs: arcs.iter().map(|a| clone_arc(a, base, cont, seen)).collect(),
        }),
    };
    seen.insert(Rc::as_ptr(n), Rc::clone(&cloned));
    cloned
}

/// Builds the rule DAGs backwards: `next` is the node everything built so
/// far continues into, and `next_cuts` the cuts the arc into it must fire.
struct Loader {
    rules: Vec<DagRule>,
    names: IndexMap<String, RuleIdx>,
    next: Rc<Node>,
    next_cuts: IdxSet,
    ri: usize,
    anon: usize,
    mgr: StateMgr,
}

impl Loader {
    /// A new arc to the next node with the given blockers.
    fn out(&self, blocking: IdxSet) -> Arc {
        Arc {
            succ: Rc::clone(&self.next),
            blocking,
            cuts: self.next_cuts.clone(),
        }
    }

    fn set_next(&mut self, n: Rc<Node>) {
        self.next = n;
        self.next_cuts = IdxSet::new();
    }

    fn set_next_with_cuts(&mut self, n: Rc<Node>, cuts: IdxSet) {
        self.next = n;
        self.next_cuts = cuts;
    }

    fn lower(&mut self, m: &Matcher) {
        match m {
            // An empty matcher leaves `next` as it is.
            Matcher::Empty | Matcher::Action(_) => (),
            Matcher::Any => {
                let out = self.out(IdxSet::new());
                self.set_next(Rc::new(Node::Any { out }));
            }
            Matcher::Char(c) => {
                let out = self.out(IdxSet::new());
                self.set_next(Rc::new(Node::Char { out, c: *c }));
            }
            Matcher::Str(s) => match s.len() {
                0 => (),
                1 => {
                    let out = self.out(IdxSet::new());
                    self.set_next(Rc::new(Node::Char { out, c: s[0] }));
                }
                _ => {
                    let out = self.out(IdxSet::new());
                    self.set_next(Rc::new(Node::Str {
                        out,
                        s: s.clone().into(),
                        i: 0,
                    }));
                }
            },
            Matcher::Range(ranges) => match ranges.len() {
                0 => self.set_next(Rc::new(Node::Fail)),
                1 => {
                    let out = self.out(IdxSet::new());
                    self.set_next(Rc::new(Node::Range {
                        out,
                        b: ranges[0].0,
                        e: ranges[0].1,
                    }));
                }
                _ => {
                    let arcs = ranges
                        .iter()
                        .map(|&(b, e)| {
                            Arc::to(Rc::new(Node::Range {
                                out: self.out(IdxSet::new()),
                                b,
                                e,
                            }))
                        })
                        .collect::<Vec<_>>();
                    self.set_next(alt_make(arcs, &self.mgr));
                }
            },
            Matcher::Rule(name) => {
                let ridx = *self
                    .names
                    .get(name)
                    .expect("validated grammar has no unknown rule references");
                let out = self.out(IdxSet::new());
                self.set_next(Rc::new(Node::Rule { out, ridx }));
            }
            Matcher::Seq(ms) => {
                for m in ms.iter().rev() {
                    self.lower(m);
                }
            }
            Matcher::Alt(ms) => {
                // m0 [^c0] next | [c0] m1 [^c1] next | ... : each branch
                // cuts away the ones after it once it matches.
                let alt_next = Rc::clone(&self.next);
                let alt_cuts = self.next_cuts.clone();
                let mut blocking = IdxSet::new();
                let mut arcs = Vec::with_capacity(ms.len());
                for m in ms {
                    let i = self.ri;
                    self.ri += 1;
                    self.next_cuts.insert(i);
                    self.lower(m);
                    arcs.push(self.out(blocking.clone()));
                    self.set_next_with_cuts(Rc::clone(&alt_next), alt_cuts.clone());
                    blocking.insert(i);
                }
                self.set_next(alt_make(arcs, &self.mgr));
            }
            Matcher::Opt(m) => {
                // m [^i] next | [i] next
                let i = self.ri;
                self.ri += 1;
                let skip = self.out(IdxSet::of(&[i]));
                self.next_cuts.insert(i);
                self.lower(m);
                let thru = self.out(IdxSet::new());
                self.set_next(alt_make(vec![thru, skip], &self.mgr));
            }
            Matcher::Many(m) => {
                let nt = self.make_many(m);
                self.set_next(nt);
            }
            Matcher::Some(m) => {
                let nt = self.make_many(m);
                self.set_next(nt);
                self.lower(m);
            }
            Matcher::Look(m) => {
                // !!m: m [^j] fail | [j ^i] fail | [i] next. A match of m
                // cuts j, killing the branch that would cut i, freeing the
                // continuation.
                let j = self.ri;
                let i = self.ri + 1;
                self.ri += 2;
                let cont = self.out(IdxSet::of(&[i]));
                self.set_next_with_cuts(Rc::new(Node::Fail), IdxSet::of(&[i]));
                let cut = self.out(IdxSet::of(&[j]));
                self.set_next_with_cuts(Rc::new(Node::Fail), IdxSet::of(&[j]));
                self.lower(m);
                let thru = self.out(IdxSet::new());
                self.set_next(alt_make(vec![cont, cut, thru], &self.mgr));
            }
            Matcher::Not(m) => {
                // m [^i] fail | [i] next: both paths proceed concurrently,
                // and a match of m cuts the continuation away.
                let i = self.ri;
                self.ri += 1;
                let cont = self.out(IdxSet::of(&[i]));
                self.set_next_with_cuts(Rc::new(Node::Fail), IdxSet::of(&[i]));
                self.lower(m);
                let thru = self.out(IdxSet::new());
                self.set_next(alt_make(vec![cont, thru], &self.mgr));
            }
            Matcher::Capt(m) | Matcher::Named(m, _) => self.lower(m),
            Matcher::Fail(_) => self.set_next(Rc::new(Node::Fail)),
        }
    }

    /// Builds the anonymous rule `R <- m [^i] R | [i] ()` for `m*` and
    /// returns a reference node for it, pointed at the current
    /// continuation.
    fn make_many(&mut self, m: &Matcher) -> Rc<Node> {
        let name = format!("*{}", self.anon);
        self.anon += 1;
        let ridx = RuleIdx::from(self.rules.len());
        self.names.insert(name.clone(), ridx);
        self.rules.push(DagRule {
            name,
            body: Rc::new(Node::Fail),
            nrestrict: 0,
            nullable: false,
        });
        let out = self.out(IdxSet::new());
        let nt = Rc::new(Node::Rule { out, ridx });
        let save_next = Rc::clone(&self.next);
        let save_cuts = self.next_cuts.clone();
        let save_ri = self.ri;
        self.ri = 0;
        let i = self.ri;
        self.ri += 1;
        self.set_next(Rc::new(Node::End));
        let skip = self.out(IdxSet::of(&[i]));
        let rec_out = self.out(IdxSet::new());
        self.set_next_with_cuts(Rc::new(Node::Rule { out: rec_out, ridx }), IdxSet::of(&[i]));
        self.lower(m);
        let thru = self.out(IdxSet::new());
        let body = alt_make(vec![thru, skip], &self.mgr);
        self.rules[usize::from(ridx)].body = body;
        self.rules[usize::from(ridx)].nrestrict = self.ri;
        self.ri = save_ri;
        self.set_next_with_cuts(save_next, save_cuts);
        nt
    }
}

#[cfg(test)]
mod test {
    use super::DagGrammar;
    use peggram::ast::GrammarValidationErrorKind;

    fn load(s: &str) -> DagGrammar {
        DagGrammar::new(&s.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_rule_table() {
        let grm = load("a <- 'x' b ; b <- 'y' ;");
        assert_eq!(grm.rules_len(), 2);
        assert_eq!(grm.start_name(), "a");
        assert_eq!(grm.rule_name(grm.rule_idx("a").unwrap()), "a");
        assert!(grm.rule_idx("c").is_none());
    }

    #[test]
    fn test_validation_propagates() {
        let err = DagGrammar::new(&"a <- b ;".parse().unwrap()).unwrap_err();
        assert_eq!(
            err.kind,
            GrammarValidationErrorKind::UnknownRuleRef("b".to_string())
        );
    }

    #[test]
    fn test_repetition_creates_anonymous_rules() {
        let grm = load("a <- 'x'* ;");
        assert_eq!(grm.rules_len(), 2);
        assert!(grm.rule_idx("*0").is_some());
    }

    #[test]
    fn test_nullable() {
        let grm = load("a <- '' ; b <- 'x' ; c <- a ;");
        assert!(grm.rule_nullable(grm.rule_idx("a").unwrap()));
        assert!(!grm.rule_nullable(grm.rule_idx("b").unwrap()));
        assert!(grm.rule_nullable(grm.rule_idx("c").unwrap()));
    }

    #[test]
    fn test_left_recursion_normalized() {
        let grm = load("r <- r 'a' / 'a' ;");
        assert!(grm.rule_idx("r_tail").is_some());
    }
}
