use num_traits;

/// An index into a grammar's rule table.
///
/// Rule tables are indexed by `usize` internally but stored as `u32`: no
/// practical grammar (anonymous repetition rules included) gets anywhere
/// near four billion rules, and the narrow type keeps it `Copy`-cheap
/// inside expression nodes. Conversions in both directions go through
/// checked casts, so a table that somehow outgrew the storage type would
/// abort rather than alias rules.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RuleIdx(pub u32);

impl From<RuleIdx> for usize {
    fn from(ridx: RuleIdx) -> usize {
        num_traits::cast(ridx.0).expect("RuleIdx fits in usize")
    }
}

impl From<usize> for RuleIdx {
    fn from(i: usize) -> RuleIdx {
        match num_traits::cast(i) {
            Some(st) => RuleIdx(st),
            None => panic!("rule index {} overflows the rule table's storage type", i),
        }
    }
}
