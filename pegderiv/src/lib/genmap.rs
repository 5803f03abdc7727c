use peggram::IdxSet;

use crate::expr::Gen;

/// A monotone partial function from backtrack generations to backtrack
/// generations, used to translate a sub-expression's generations into the
/// namespace of its parent `MAP`/`ALT`/`SEQ` node.
///
/// Keys are always the contiguous range `0..=max_key()`, which lets the map
/// be stored as a plain vector of values; values are strictly increasing.
/// New mappings are only ever appended (see [`GenMap::add_back`]), mirroring
/// the way derivative steps introduce at most one fresh generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenMap(Vec<Gen>);

impl GenMap {
    /// The map `{0 -> 0}`.
    pub fn single() -> Self {
        GenMap(vec![0])
    }

    /// The map `{0 -> 0, 1 -> v}`.
    pub fn pair(v: Gen) -> Self {
        debug_assert!(v > 0);
        GenMap(vec![0, v])
    }

    pub fn from_vals(vals: &[Gen]) -> Self {
        debug_assert!(!vals.is_empty(), "generation map never empty");
        debug_assert!(
            vals.windows(2).all(|w| w[0] < w[1]),
            "generation map values strictly increase"
        );
        GenMap(vals.to_vec())
    }

    /// Looks up the generation `k` maps to. Looking up an unmapped
    /// generation is a programmer error.
    pub fn get(&self, k: Gen) -> Gen {
        self.0[k]
    }

    pub fn max_key(&self) -> Gen {
        self.0.len() - 1
    }

    /// The largest value in the map's image.
    pub fn max(&self) -> Gen {
        *self.0.last().unwrap()
    }

    /// Appends the mapping `k -> v`, preserving monotonicity. `k` must be
    /// one beyond the current maximum key.
    pub fn add_back(&mut self, k: Gen, v: Gen) {
        debug_assert_eq!(k, self.0.len(), "generations grow by one");
        debug_assert!(v >= self.max(), "generation map values strictly increase");
        self.0.push(v);
    }

    /// The image of `s` through this map.
    pub fn image(&self, s: &IdxSet) -> IdxSet {
        s.iter().map(|k| self.get(k)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::GenMap;
    use peggram::IdxSet;

    #[test]
    fn test_lookup() {
        let m = GenMap::from_vals(&[0, 2, 3]);
        assert_eq!(m.get(0), 0);
        assert_eq!(m.get(1), 2);
        assert_eq!(m.max_key(), 2);
        assert_eq!(m.max(), 3);
    }

    #[test]
    fn test_add_back() {
        let mut m = GenMap::single();
        m.add_back(1, 4);
        assert_eq!(m, GenMap::from_vals(&[0, 4]));
        m.add_back(2, 5);
        assert_eq!(m.max(), 5);
    }

    #[test]
    fn test_image() {
        let m = GenMap::from_vals(&[0, 3, 7]);
        assert_eq!(m.image(&IdxSet::of(&[0, 2])), IdxSet::of(&[0, 7]));
        assert_eq!(m.image(&IdxSet::new()), IdxSet::new());
    }
}
