use peggram::{IdxSet, RuleIdx};

/// Manages the global state of a DAG parse: the restriction (cut) indices
/// and the per-rule re-entry flags.
///
/// A restriction index is *enforced* once its cut has fired (every arc
/// blocked by it is then dead), *unenforceable* once it can never fire
/// (blocked arcs are then freed), and *pending* while neither is decided. A
/// cut fired while traversing an arc whose own blockers are still pending is
/// recorded as a conditional fire and converges via [`StateMgr::resolve`].
pub struct StateMgr {
    enforced: IdxSet,
    unenforceable: IdxSet,
    /// Conditional fires: `(i, blockers)` enforces `i` once every blocker is
    /// unenforceable, and is discarded if a blocker is enforced first.
    pending: Vec<(usize, IdxSet)>,
    /// Next restriction index to hand out.
    next: usize,
    /// Is the match node still reachable from the head arc? Maintained by
    /// the driver's reachability sweep.
    pub match_reachable: bool,
    dirty: Vec<bool>,
}

impl StateMgr {
    pub fn new(rules_len: usize) -> Self {
        StateMgr {
            enforced: IdxSet::new(),
            unenforceable: IdxSet::new(),
            pending: Vec::new(),
            next: 0,
            match_reachable: true,
            dirty: vec![false; rules_len],
        }
    }

    /// Reserve `n` consecutive restriction indices, returning the first.
    pub fn reserve(&mut self, n: usize) -> usize {
        let base = self.next;
        self.next += n;
        base
    }

    /// How many restriction indices have been reserved so far?
    pub fn reserved(&self) -> usize {
        self.next
    }

    /// Fire the cut `i`, unless one of `blocking` is (or later becomes)
    /// enforced.
    pub fn enforce_unless(&mut self, i: usize, blocking: &IdxSet) {
        if self.enforced.contains(i) || self.unenforceable.contains(i) {
            return;
        }
        let b = blocking - &self.unenforceable;
        if b.intersects(&self.enforced) {
            // The arc this cut sat on was already dead.
            return;
        }
        if b.is_empty() {
            self.enforced.insert(i);
            self.resolve();
        } else {
            self.pending.push((i, b));
        }
    }

    /// Mark `i` as never able to fire.
    pub fn release(&mut self, i: usize) {
        if !self.enforced.contains(i) {
            self.unenforceable.insert(i);
        }
    }

    /// Converge the conditional fires: a fire whose blockers are all
    /// unenforceable enforces its index; a fire with an enforced blocker is
    /// void. Runs to a fixed point.
    pub fn resolve(&mut self) {
        loop {
            let mut changed = false;
            let mut still = Vec::new();
            for (i, mut b) in self.pending.drain(..) {
                if self.enforced.contains(i) || self.unenforceable.contains(i) {
                    changed = true;
                    continue;
                }
                b.remove_all(&self.unenforceable);
                if b.intersects(&self.enforced) {
                    changed = true;
                    continue;
                }
                if b.is_empty() {
                    self.enforced.insert(i);
                    changed = true;
                    continue;
                }
                still.push((i, b));
            }
            self.pending = still;
            if !changed {
                return;
            }
        }
    }

    pub fn enforced(&self) -> &IdxSet {
        &self.enforced
    }

    pub fn unenforceable(&self) -> &IdxSet {
        &self.unenforceable
    }

    /// Is any restriction in `s` enforced (i.e. is an arc blocked by `s`
    /// dead)?
    pub fn forbidden(&self, s: &IdxSet) -> bool {
        s.intersects(&self.enforced)
    }

    /// Is every restriction in `s` unenforceable (i.e. is an arc blocked by
    /// `s` unconditionally free)?
    pub fn allowed(&self, s: &IdxSet) -> bool {
        s.is_subset(&self.unenforceable)
    }

    /// The indices with a conditional fire outstanding.
    pub fn pending_fires(&self) -> IdxSet {
        self.pending.iter().map(|(i, _)| *i).collect()
    }

    pub fn is_dirty(&self, ridx: RuleIdx) -> bool {
        self.dirty[usize::from(ridx)]
    }

    pub fn set_dirty(&mut self, ridx: RuleIdx, v: bool) {
        self.dirty[usize::from(ridx)] = v;
    }
}

#[cfg(test)]
mod test {
    use super::StateMgr;
    use peggram::IdxSet;

    #[test]
    fn test_reserve() {
        let mut mgr = StateMgr::new(0);
        assert_eq!(mgr.reserve(3), 0);
        assert_eq!(mgr.reserve(2), 3);
        assert_eq!(mgr.reserved(), 5);
    }

    #[test]
    fn test_unconditional_fire() {
        let mut mgr = StateMgr::new(0);
        mgr.reserve(2);
        mgr.enforce_unless(0, &IdxSet::new());
        assert!(mgr.forbidden(&IdxSet::of(&[0, 1])));
        assert!(!mgr.forbidden(&IdxSet::of(&[1])));
    }

    #[test]
    fn test_conditional_fire_enforced() {
        // i fires unless j; j becomes unenforceable, so i is enforced.
        let mut mgr = StateMgr::new(0);
        mgr.reserve(2);
        mgr.enforce_unless(0, &IdxSet::of(&[1]));
        assert!(!mgr.forbidden(&IdxSet::of(&[0])));
        mgr.release(1);
        mgr.resolve();
        assert!(mgr.forbidden(&IdxSet::of(&[0])));
    }

    #[test]
    fn test_conditional_fire_void() {
        // i fires unless j; j is enforced first, so the fire is void.
        let mut mgr = StateMgr::new(0);
        mgr.reserve(2);
        mgr.enforce_unless(0, &IdxSet::of(&[1]));
        mgr.enforce_unless(1, &IdxSet::new());
        assert!(mgr.forbidden(&IdxSet::of(&[1])));
        assert!(!mgr.forbidden(&IdxSet::of(&[0])));
        assert!(mgr.pending_fires().is_empty());
    }

    #[test]
    fn test_release_then_allowed() {
        let mut mgr = StateMgr::new(0);
        mgr.reserve(1);
        assert!(!mgr.allowed(&IdxSet::of(&[0])));
        mgr.release(0);
        assert!(mgr.allowed(&IdxSet::of(&[0])));
    }

    #[test]
    fn test_enforced_wins_over_release() {
        let mut mgr = StateMgr::new(0);
        mgr.reserve(1);
        mgr.enforce_unless(0, &IdxSet::new());
        mgr.release(0);
        assert!(mgr.forbidden(&IdxSet::of(&[0])));
        assert!(!mgr.allowed(&IdxSet::of(&[0])));
    }

    #[test]
    fn test_chained_resolution() {
        // k fires unless j, j fires unless i; releasing i enforces j, which
        // voids k's fire.
        let mut mgr = StateMgr::new(0);
        mgr.reserve(3);
        mgr.enforce_unless(2, &IdxSet::of(&[1]));
        mgr.enforce_unless(1, &IdxSet::of(&[0]));
        mgr.release(0);
        mgr.resolve();
        assert!(mgr.forbidden(&IdxSet::of(&[1])));
        assert!(!mgr.forbidden(&IdxSet::of(&[2])));
        assert!(mgr.pending_fires().is_empty());
    }
}
