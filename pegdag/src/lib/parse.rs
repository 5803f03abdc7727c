use std::collections::HashSet;
use std::rc::Rc;

use peggram::IdxSet;

use crate::grammar::DagGrammar;
use crate::node::{d_arc, Arc, Node};
use crate::state::StateMgr;

/// Walks the live graph from `head`, collecting the cuts that can still
/// fire and whether the match node is still reachable, then releases every
/// restriction with no remaining fire source. Releasing may enforce pending
/// cuts, which kills arcs and can strand further cuts, so the walk repeats
/// until nothing changes.
fn sweep(head: &Arc, mgr: &mut StateMgr) {
    loop {
        let mut live_cuts = IdxSet::new();
        let mut match_seen = false;
        let mut visited: HashSet<*const Node> = HashSet::new();
        let mut stack: Vec<Rc<Node>> = Vec::new();
        let visit_arc = |a: &Arc, stack: &mut Vec<Rc<Node>>, mgr: &StateMgr| {
            if mgr.forbidden(&a.blocking) {
                return;
            }
            stack.push(Rc::clone(&a.succ));
        };
        visit_arc(head, &mut stack, mgr);
        live_cuts.union_with(&head.cuts);
        while let Some(n) = stack.pop() {
            if !visited.insert(Rc::as_ptr(&n)) {
                continue;
            }
            match &*n {
                Node::Match => match_seen = true,
                Node::Fail | Node::Inf | Node::End => (),
                Node::Char { out, .. }
                | Node::Range { out, .. }
                | Node::Any { out }
                | Node::Str { out, .. }
                | Node::Rule { out, .. } => {
                    live_cuts.union_with(&out.cuts);
                    visit_arc(out, &mut stack, mgr);
                }
                Node::Alt { arcs } => {
                    for a in arcs {
                        live_cuts.union_with(&a.cuts);
                        visit_arc(a, &mut stack, mgr);
                    }
                }
            }
        }
        mgr.match_reachable = match_seen;
        let pend = mgr.pending_fires();
        let mut changed = false;
        for i in 0..mgr.reserved() {
            if !mgr.enforced().contains(i)
                && !mgr.unenforceable().contains(i)
                && !live_cuts.contains(i)
                && !pend.contains(i)
            {
                mgr.release(i);
                changed = true;
            }
        }
        mgr.resolve();
        if !changed {
            return;
        }
    }
}

/// After the end-of-input derivative no cut can fire any more: release
/// everything still undecided and converge the conditional fires.
fn finalize(mgr: &mut StateMgr) {
    loop {
        let pend = mgr.pending_fires();
        let mut changed = false;
        for i in 0..mgr.reserved() {
            if !mgr.enforced().contains(i)
                && !mgr.unenforceable().contains(i)
                && !pend.contains(i)
            {
                mgr.release(i);
                changed = true;
            }
        }
        mgr.resolve();
        if !changed {
            return;
        }
    }
}

/// Is the head an unrestricted match?
fn is_matched(arc: &Arc, inherited: &IdxSet, mgr: &StateMgr) -> bool {
    let b = &arc.blocking | inherited;
    if mgr.forbidden(&b) || !mgr.allowed(&b) {
        return false;
    }
    match &*arc.succ {
        Node::Match => true,
        Node::Alt { arcs } => arcs.iter().any(|a| is_matched(a, &b, mgr)),
        _ => false,
    }
}

/// Decides whether `input` as a whole matches `start`.
///
/// The initial head arc invokes the start rule with the match node as its
/// continuation. Each step takes the derivative by the next byte, then
/// sweeps the graph so that cuts which can no longer fire free the arcs
/// they blocked. The input matches exactly when, after the end-of-input
/// sentinel's derivative, the match node is reachable through arcs whose
/// every remaining blocker is unenforceable.
pub fn recognize(grm: &DagGrammar, start: &str, input: &[u8]) -> bool {
    let ridx = match grm.rule_idx(start) {
        Some(ridx) => ridx,
        None => return false,
    };
    if input.is_empty() && grm.rule_nullable(ridx) {
        return true;
    }
    let mut mgr = StateMgr::new(grm.rules_len());
    let mut head = Arc::to(Rc::new(Node::Rule {
        out: Arc::to(Rc::new(Node::Match)),
        ridx,
    }));
    for &x in input {
        if x == 0 {
            // 0 is reserved as the end-of-input sentinel; no grammar
            // matches a literal NUL.
            return false;
        }
        head = d_arc(head, x, grm, &mut mgr);
        sweep(&head, &mut mgr);
        if mgr.forbidden(&head.blocking) || matches!(&*head.succ, Node::Fail | Node::Inf) {
            return false;
        }
        if !mgr.match_reachable {
            return false;
        }
    }
    head = d_arc(head, 0, grm, &mut mgr);
    sweep(&head, &mut mgr);
    finalize(&mut mgr);
    is_matched(&head, &IdxSet::new(), &mgr)
}

#[cfg(test)]
mod test {
    use super::recognize;
    use crate::grammar::DagGrammar;

    fn load(s: &str) -> DagGrammar {
        DagGrammar::new(&s.parse().unwrap()).unwrap()
    }

    fn accepts(grm: &DagGrammar, input: &str) -> bool {
        recognize(grm, grm.start_name(), input.as_bytes())
    }

    #[test]
    fn test_literal() {
        let grm = load("s <- \"ab\" ;");
        assert!(accepts(&grm, "ab"));
        assert!(!accepts(&grm, "a"));
        assert!(!accepts(&grm, "abc"));
        assert!(!accepts(&grm, ""));
    }

    #[test]
    fn test_repetition_then_literal() {
        let grm = load("s <- [a-z]+ '!' ;");
        assert!(accepts(&grm, "hi!"));
        assert!(accepts(&grm, "x!"));
        assert!(!accepts(&grm, "!"));
        assert!(!accepts(&grm, "hi"));
        assert!(!accepts(&grm, "hi!!"));
    }

    #[test]
    fn test_ordered_choice_shared_prefix() {
        let grm = load("s <- 'a' 'b' / 'a' 'c' ;");
        assert!(accepts(&grm, "ab"));
        assert!(accepts(&grm, "ac"));
        assert!(!accepts(&grm, "ad"));
        assert!(!accepts(&grm, "a"));
    }

    #[test]
    fn test_negative_lookahead() {
        let grm = load("s <- !'a' . ;");
        assert!(accepts(&grm, "b"));
        assert!(!accepts(&grm, "a"));
        assert!(!accepts(&grm, ""));
        assert!(!accepts(&grm, "bb"));
    }

    #[test]
    fn test_left_recursion() {
        let grm = load("s <- r ; r <- r 'a' / 'a' ;");
        assert!(accepts(&grm, "a"));
        assert!(accepts(&grm, "aa"));
        assert!(accepts(&grm, "aaa"));
        assert!(!accepts(&grm, ""));
        assert!(!accepts(&grm, "ab"));
    }

    #[test]
    fn test_degenerate_left_recursion() {
        let grm = load("r <- r / 'a' ;");
        assert!(accepts(&grm, "a"));
        assert!(!accepts(&grm, ""));
    }

    #[test]
    fn test_positive_lookahead() {
        let grm = load("s <- &\"ab\" [a-z]+ ;");
        assert!(accepts(&grm, "abc"));
        assert!(accepts(&grm, "ab"));
        assert!(!accepts(&grm, "bc"));
        assert!(!accepts(&grm, "a"));
    }

    #[test]
    fn test_trailing_lookahead() {
        let grm = load("s <- \"ab\" !. ;");
        assert!(accepts(&grm, "ab"));
        assert!(!accepts(&grm, "abc"));
        let grm = load("s <- . !'a' ;");
        assert!(accepts(&grm, "x"));
        assert!(!accepts(&grm, "xa"));
        assert!(!accepts(&grm, "xb"));
    }

    #[test]
    fn test_lookahead_trailing_garbage() {
        let grm = load("s <- !\"xy\" . ;");
        assert!(accepts(&grm, "x"));
        assert!(accepts(&grm, "z"));
        assert!(!accepts(&grm, "xy"));
        assert!(!accepts(&grm, "xz"));
    }

    #[test]
    fn test_ordered_choice_commitment() {
        let grm = load("s <- 'a' / \"ab\" ;");
        assert!(accepts(&grm, "a"));
        assert!(!accepts(&grm, "ab"));
        let grm = load("s <- \"ab\" / 'a' ;");
        assert!(accepts(&grm, "ab"));
        assert!(accepts(&grm, "a"));
    }

    #[test]
    fn test_greedy_repetition() {
        let grm = load("s <- 'a'* 'a' ;");
        assert!(!accepts(&grm, "a"));
        assert!(!accepts(&grm, "aa"));
        let grm = load("s <- 'a'* 'b' ;");
        assert!(accepts(&grm, "b"));
        assert!(accepts(&grm, "aab"));
    }

    #[test]
    fn test_optional() {
        let grm = load("s <- 'a'? 'b' ;");
        assert!(accepts(&grm, "b"));
        assert!(accepts(&grm, "ab"));
        assert!(!accepts(&grm, "aab"));
        assert!(!accepts(&grm, ""));
    }

    #[test]
    fn test_nullable_start_on_empty_input() {
        let grm = load("s <- 'a'? ;");
        assert!(accepts(&grm, ""));
        assert!(accepts(&grm, "a"));
        assert!(!accepts(&grm, "b"));
    }

    #[test]
    fn test_bare_lookahead_rule() {
        let grm = load("s <- !'a' ;");
        assert!(accepts(&grm, ""));
        assert!(!accepts(&grm, "a"));
        assert!(!accepts(&grm, "b"));
    }

    #[test]
    fn test_unknown_start_rule() {
        let grm = load("s <- 'a' ;");
        assert!(!recognize(&grm, "t", b"a"));
    }

    #[test]
    fn test_nul_input() {
        let grm = load("s <- . ;");
        assert!(!recognize(&grm, "s", b"\0"));
    }

    #[test]
    fn test_rule_indirection() {
        let grm = load("s <- a b ; a <- 'x' ; b <- a / 'y' ;");
        assert!(accepts(&grm, "xx"));
        assert!(accepts(&grm, "xy"));
        assert!(!accepts(&grm, "yx"));
        assert!(!accepts(&grm, "x"));
    }

    #[test]
    fn test_indirect_left_recursion_halts() {
        // Indirect left recursion is not normalized; the re-entry guard
        // turns the diverging branch into an INF node, and the surviving
        // alternatives proceed.
        let grm = load("s <- t 'x' / 'y' ; t <- s 'z' ;");
        assert!(accepts(&grm, "y"));
        assert!(!accepts(&grm, "x"));
        assert!(!accepts(&grm, "yzx"));
    }
}
