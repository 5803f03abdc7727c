//! The shared node DAG and its per-byte derivative.
//!
//! A grammar is built once as a directed graph of nodes joined by [`Arc`]s;
//! the live state of a parse is a single head arc. Alternation is a node
//! with several outgoing arcs explored concurrently; ordered choice is
//! recovered through the arcs' *blocking* and *cut* sets: traversing an arc
//! fires its cuts, and an arc whose blocking set gains an enforced cut is
//! dead. Equivalent alternation successors are merged so that shared
//! prefixes are parsed once, with the choice pushed past the prefix.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use peggram::{IdxSet, RuleIdx};

use crate::grammar::DagGrammar;
use crate::state::StateMgr;

/// An expression node. Nodes are immutable; derivative steps build new
/// nodes, sharing unchanged subgraphs.
#[derive(Debug)]
pub enum Node {
    /// The whole input has been recognized.
    Match,
    /// This path can never match.
    Fail,
    /// Left-recursive non-termination.
    Inf,
    /// Placeholder terminating a rule body, replaced by the caller's
    /// continuation when the body is cloned.
    End,
    Char {
        out: Arc,
        c: u8,
    },
    Range {
        out: Arc,
        b: u8,
        e: u8,
    },
    Any {
        out: Arc,
    },
    /// A literal string; the buffer is interred and shared, with `i` the
    /// index of the next byte to match.
    Str {
        out: Arc,
        s: Rc<[u8]>,
        i: usize,
    },
    /// A non-terminal reference, cloned into the caller's context when the
    /// head reaches it.
    Rule {
        out: Arc,
        ridx: RuleIdx,
    },
    /// Subexpressions parsed concurrently.
    Alt {
        arcs: Vec<Arc>,
    },
}

/// A directed arc between nodes: a successor, the restrictions blocking the
/// arc, and the cuts fired when it is traversed.
#[derive(Clone, Debug)]
pub struct Arc {
    pub succ: Rc<Node>,
    pub blocking: IdxSet,
    pub cuts: IdxSet,
}

impl Arc {
    /// An unrestricted arc to `succ`.
    pub fn to(succ: Rc<Node>) -> Self {
        Arc {
            succ,
            blocking: IdxSet::new(),
            cuts: IdxSet::new(),
        }
    }
}

pub fn fail_arc() -> Arc {
    Arc::to(Rc::new(Node::Fail))
}

pub fn inf_arc() -> Arc {
    Arc::to(Rc::new(Node::Inf))
}

impl Node {
    /// The node's outgoing arc, for the node types that have exactly one.
    fn out_arc(&self) -> Option<&Arc> {
        match self {
            Node::Char { out, .. }
            | Node::Range { out, .. }
            | Node::Any { out }
            | Node::Str { out, .. }
            | Node::Rule { out, .. } => Some(out),
            _ => None,
        }
    }

    /// Rebuilds this node with a different outgoing arc.
    fn with_out(&self, out: Arc) -> Rc<Node> {
        match self {
            Node::Char { c, .. } => Rc::new(Node::Char { out, c: *c }),
            Node::Range { b, e, .. } => Rc::new(Node::Range { out, b: *b, e: *e }),
            Node::Any { .. } => Rc::new(Node::Any { out }),
            Node::Str { s, i, .. } => Rc::new(Node::Str {
                out,
                s: Rc::clone(s),
                i: *i,
            }),
            Node::Rule { ridx, .. } => Rc::new(Node::Rule { out, ridx: *ridx }),
            _ => unreachable!("node has no outgoing arc"),
        }
    }

    /// Polymorphic hash; doesn't account for successor nodes.
    pub fn hash_shallow(&self) -> u64 {
        let mut h = DefaultHasher::new();
        match self {
            Node::Match => 0x0u8.hash(&mut h),
            Node::Fail => 0x1u8.hash(&mut h),
            Node::Inf => 0x2u8.hash(&mut h),
            Node::End => 0x3u8.hash(&mut h),
            Node::Char { c, .. } => {
                0x4u8.hash(&mut h);
                c.hash(&mut h);
            }
            Node::Range { b, e, .. } => {
                0x5u8.hash(&mut h);
                b.hash(&mut h);
                e.hash(&mut h);
            }
            Node::Any { .. } => 0x6u8.hash(&mut h),
            Node::Str { s, i, .. } => {
                0x7u8.hash(&mut h);
                s[*i..].hash(&mut h);
            }
            Node::Rule { ridx, .. } => {
                0x8u8.hash(&mut h);
                usize::from(*ridx).hash(&mut h);
            }
            Node::Alt { arcs } => {
                0x9u8.hash(&mut h);
                arcs.len().hash(&mut h);
            }
        }
        h.finish()
    }

    /// Structural equivalence; doesn't account for successor nodes.
    pub fn equiv(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Match, Node::Match)
            | (Node::Fail, Node::Fail)
            | (Node::Inf, Node::Inf)
            | (Node::End, Node::End)
            | (Node::Any { .. }, Node::Any { .. }) => true,
            (Node::Char { c: c1, .. }, Node::Char { c: c2, .. }) => c1 == c2,
            (Node::Range { b: b1, e: e1, .. }, Node::Range { b: b2, e: e2, .. }) => {
                b1 == b2 && e1 == e2
            }
            (Node::Str { s: s1, i: i1, .. }, Node::Str { s: s2, i: i2, .. }) => {
                s1[*i1..] == s2[*i2..]
            }
            (Node::Rule { ridx: r1, .. }, Node::Rule { ridx: r2, .. }) => r1 == r2,
            _ => false,
        }
    }
}

/// Builds an alternation node from `arcs`, flattening nested alternations
/// and merging arcs whose successors are structurally equivalent. Inserting
/// an unrestricted match arc short-circuits the whole alternation to the
/// match node; no surviving arcs yield a failure node.
pub fn alt_make(arcs: Vec<Arc>, mgr: &StateMgr) -> Rc<Node> {
    let mut set: Vec<Arc> = Vec::new();
    for a in arcs {
        if merge_into(&mut set, a, mgr) {
            return Rc::new(Node::Match);
        }
    }
    match set.len() {
        0 => Rc::new(Node::Fail),
        _ => Rc::new(Node::Alt { arcs: set }),
    }
}

/// Merges `a` into `set`. Returns true iff `a` is an unrestricted match,
/// which dominates the alternation.
fn merge_into(set: &mut Vec<Arc>, mut a: Arc, mgr: &StateMgr) -> bool {
    if mgr.forbidden(&a.blocking) {
        return false;
    }
    a.blocking.remove_all(mgr.unenforceable());
    match &*a.succ {
        Node::Fail => return false,
        Node::Match if a.blocking.is_empty() => return true,
        Node::Alt { arcs } => {
            // Flatten, pushing the outer blockers and cuts onto the inner
            // arcs.
            for sub in arcs.clone() {
                let mut s = sub;
                s.blocking.union_with(&a.blocking);
                s.cuts.union_with(&a.cuts);
                if merge_into(set, s, mgr) {
                    return true;
                }
            }
            return false;
        }
        _ => (),
    }
    let ah = a.succ.hash_shallow();
    for ex in set.iter_mut() {
        if ex.succ.hash_shallow() == ah && ex.succ.equiv(&a.succ) {
            merge(ex, a, mgr);
            return false;
        }
    }
    set.push(a);
    false
}

/// Merges `add` into the existing equivalent arc `ex`, pushing the
/// alternation past the shared successor: each arc's blockers move onto its
/// continuation, the merged arc is blocked by their intersection, and cuts
/// accumulate.
fn merge(ex: &mut Arc, add: Arc, mgr: &StateMgr) {
    if let Some(ex_out) = ex.succ.out_arc() {
        let mut ex_out = ex_out.clone();
        ex_out.blocking.union_with(&ex.blocking);
        let mut add_out = add
            .succ
            .out_arc()
            .expect("equivalent nodes have the same shape")
            .clone();
        add_out.blocking.union_with(&add.blocking);
        let inner = alt_make(vec![ex_out, add_out], mgr);
        ex.succ = ex.succ.with_out(Arc::to(inner));
    }
    ex.blocking.intersect_with(&add.blocking);
    ex.cuts.union_with(&add.cuts);
}

/// Traverses `thru` with the head's accumulated blockers: a dead arc
/// returns `None`, otherwise the arc's cuts fire (conditioned on the
/// combined blockers) and the walk continues at its successor.
fn advance(thru: &Arc, inherited: &IdxSet, mgr: &mut StateMgr) -> Option<Arc> {
    let mut blocking = &thru.blocking | inherited;
    if mgr.forbidden(&blocking) {
        return None;
    }
    for i in thru.cuts.iter() {
        mgr.enforce_unless(i, &blocking);
    }
    blocking.remove_all(mgr.unenforceable());
    Some(Arc {
        succ: Rc::clone(&thru.succ),
        blocking,
        cuts: IdxSet::new(),
    })
}

/// The derivative of the parse state `head` by the byte `x` (0 = end of
/// input): the new head arc after every live path has consumed `x`.
pub fn d_arc(head: Arc, x: u8, grm: &DagGrammar, mgr: &mut StateMgr) -> Arc {
    debug_assert!(head.cuts.is_empty(), "head cuts fire on traversal");
    match &*head.succ {
        Node::Fail | Node::Inf => head,
        Node::Match => {
            // A match stands only at end-of-input; trailing bytes kill it.
            if x == 0 {
                head
            } else {
                fail_arc()
            }
        }
        Node::End => {
            debug_assert!(false, "END nodes are replaced when rule bodies are cloned");
            fail_arc()
        }
        Node::Char { out, c } => {
            if *c == x {
                advance(out, &head.blocking, mgr).unwrap_or_else(fail_arc)
            } else {
                fail_arc()
            }
        }
        Node::Range { out, b, e } => {
            if *b <= x && x <= *e {
                advance(out, &head.blocking, mgr).unwrap_or_else(fail_arc)
            } else {
                fail_arc()
            }
        }
        Node::Any { out } => {
            if x != 0 {
                advance(out, &head.blocking, mgr).unwrap_or_else(fail_arc)
            } else {
                fail_arc()
            }
        }
        Node::Str { out, s, i } => {
            if s[*i] != x {
                fail_arc()
            } else if s.len() - i == 2 {
                Arc {
                    succ: Rc::new(Node::Char {
                        out: out.clone(),
                        c: s[i + 1],
                    }),
                    blocking: head.blocking.clone(),
                    cuts: IdxSet::new(),
                }
            } else {
                Arc {
                    succ: Rc::new(Node::Str {
                        out: out.clone(),
                        s: Rc::clone(s),
                        i: i + 1,
                    }),
                    blocking: head.blocking.clone(),
                    cuts: IdxSet::new(),
                }
            }
        }
        Node::Rule { out, ridx } => {
            // Refuse to re-enter a rule whose derivative is already being
            // computed: that is left recursion.
            if mgr.is_dirty(*ridx) {
                return inf_arc();
            }
            mgr.set_dirty(*ridx, true);
            let expanded = grm.clone_rule(*ridx, out, mgr);
            let d = d_arc(
                Arc {
                    succ: expanded,
                    blocking: head.blocking.clone(),
                    cuts: IdxSet::new(),
                },
                x,
                grm,
                mgr,
            );
            mgr.set_dirty(*ridx, false);
            d
        }
        Node::Alt { arcs } => {
            let mut outs = Vec::with_capacity(arcs.len());
            for a in arcs {
                let entered = match advance(a, &head.blocking, mgr) {
                    Some(entered) => entered,
                    None => continue,
                };
                let db = d_arc(entered, x, grm, mgr);
                if !matches!(&*db.succ, Node::Fail) {
                    outs.push(db);
                }
            }
            Arc::to(alt_make(outs, mgr))
        }
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use super::{alt_make, Arc, Node};
    use crate::state::StateMgr;
    use peggram::IdxSet;

    fn chr_node(c: u8, succ: Rc<Node>) -> Rc<Node> {
        Rc::new(Node::Char {
            out: Arc::to(succ),
            c,
        })
    }

    #[test]
    fn test_equiv_is_shallow() {
        let a1 = chr_node(b'a', Rc::new(Node::Match));
        let a2 = chr_node(b'a', Rc::new(Node::Fail));
        let b = chr_node(b'b', Rc::new(Node::Match));
        assert!(a1.equiv(&a2));
        assert!(!a1.equiv(&b));
        assert_eq!(a1.hash_shallow(), a2.hash_shallow());
    }

    #[test]
    fn test_str_equiv_by_suffix() {
        let s1 = Node::Str {
            out: Arc::to(Rc::new(Node::End)),
            s: b"xab".to_vec().into(),
            i: 1,
        };
        let s2 = Node::Str {
            out: Arc::to(Rc::new(Node::End)),
            s: b"ab".to_vec().into(),
            i: 0,
        };
        assert!(s1.equiv(&s2));
        assert_eq!(s1.hash_shallow(), s2.hash_shallow());
    }

    #[test]
    fn test_alt_make_drops_fail() {
        let mgr = StateMgr::new(0);
        let n = alt_make(vec![Arc::to(Rc::new(Node::Fail))], &mgr);
        assert!(matches!(&*n, Node::Fail));
    }

    #[test]
    fn test_alt_make_short_circuits_match() {
        let mgr = StateMgr::new(0);
        let n = alt_make(
            vec![
                Arc::to(chr_node(b'a', Rc::new(Node::Match))),
                Arc::to(Rc::new(Node::Match)),
            ],
            &mgr,
        );
        assert!(matches!(&*n, Node::Match));
    }

    #[test]
    fn test_restricted_match_does_not_short_circuit() {
        let mut mgr = StateMgr::new(0);
        mgr.reserve(1);
        let n = alt_make(
            vec![
                Arc::to(chr_node(b'a', Rc::new(Node::Match))),
                Arc {
                    succ: Rc::new(Node::Match),
                    blocking: IdxSet::of(&[0]),
                    cuts: IdxSet::new(),
                },
            ],
            &mgr,
        );
        match &*n {
            Node::Alt { arcs } => assert_eq!(arcs.len(), 2),
            n => panic!("unexpected node {:?}", n),
        }
    }

    #[test]
    fn test_merge_shared_prefix() {
        // 'a'->'b' | 'a'->'c' merges into 'a'->('b' | 'c').
        let mgr = StateMgr::new(0);
        let n = alt_make(
            vec![
                Arc::to(chr_node(b'a', chr_node(b'b', Rc::new(Node::Match)))),
                Arc::to(chr_node(b'a', chr_node(b'c', Rc::new(Node::Match)))),
            ],
            &mgr,
        );
        match &*n {
            Node::Alt { arcs } => {
                assert_eq!(arcs.len(), 1);
                match &*arcs[0].succ {
                    Node::Char { out, c: b'a' } => match &*out.succ {
                        Node::Alt { arcs } => assert_eq!(arcs.len(), 2),
                        n => panic!("prefix continuation not an alt: {:?}", n),
                    },
                    n => panic!("merged successor not 'a': {:?}", n),
                }
            }
            n => panic!("unexpected node {:?}", n),
        }
    }

    #[test]
    fn test_merge_intersects_blocking_and_unions_cuts() {
        let mut mgr = StateMgr::new(0);
        mgr.reserve(3);
        let a1 = Arc {
            succ: chr_node(b'a', Rc::new(Node::Match)),
            blocking: IdxSet::of(&[0, 1]),
            cuts: IdxSet::of(&[2]),
        };
        let a2 = Arc {
            succ: chr_node(b'a', Rc::new(Node::Fail)),
            blocking: IdxSet::of(&[1]),
            cuts: IdxSet::new(),
        };
        let n = alt_make(vec![a1, a2], &mgr);
        match &*n {
            Node::Alt { arcs } => {
                assert_eq!(arcs.len(), 1);
                assert_eq!(arcs[0].blocking, IdxSet::of(&[1]));
                assert_eq!(arcs[0].cuts, IdxSet::of(&[2]));
            }
            n => panic!("unexpected node {:?}", n),
        }
    }

    #[test]
    fn test_flatten_nested_alt() {
        let mut mgr = StateMgr::new(0);
        mgr.reserve(1);
        let inner = alt_make(
            vec![
                Arc::to(chr_node(b'a', Rc::new(Node::Match))),
                Arc::to(chr_node(b'b', Rc::new(Node::Match))),
            ],
            &mgr,
        );
        let outer = alt_make(
            vec![
                Arc {
                    succ: inner,
                    blocking: IdxSet::of(&[0]),
                    cuts: IdxSet::new(),
                },
                Arc::to(chr_node(b'c', Rc::new(Node::Match))),
            ],
            &mgr,
        );
        match &*outer {
            Node::Alt { arcs } => {
                assert_eq!(arcs.len(), 3);
                // the inner arcs inherited the outer blocker
                assert_eq!(arcs[0].blocking, IdxSet::of(&[0]));
                assert_eq!(arcs[1].blocking, IdxSet::of(&[0]));
                assert!(arcs[2].blocking.is_empty());
            }
            n => panic!("unexpected node {:?}", n),
        }
    }
}
