use std::{cell::Cell, collections::BTreeMap};

/// Disjoint sets over an arbitrary ordered key.
///
/// Keys are compared by their `Ord` implementation, not by identity. Elements are inserted
/// lazily: [`UnionFind::union`] inserts missing keys, while [`UnionFind::find`] reports `None` for
/// keys that were never inserted.
#[derive(Clone, Debug, Default)]
pub struct UnionFind<K: Ord + Clone> {
    index: BTreeMap<K, usize>,
    keys: Vec<K>,
    /// Compressed on `find`, hence `Cell`.
    parent: Vec<Cell<usize>>,
    rank: Vec<u32>,
}

impl<K: Ord + Clone> UnionFind<K> {
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
            keys: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }
    pub fn empty() -> Self {
        Self::new()
    }

    /// Insert `x` as a singleton, no-op if present.
    pub fn make_set(&mut self, x: K) {
        let _: usize = self.insert(x);
    }
    pub fn make_sets(&mut self, xs: impl IntoIterator<Item = K>) {
        for x in xs {
            self.make_set(x);
        }
    }
    fn insert(&mut self, x: K) -> usize {
        if let Some(&i) = self.index.get(&x) {
            return i;
        }
        let i = self.keys.len();
        self.keys.push(x.clone());
        self.parent.push(Cell::new(i));
        self.rank.push(0);
        self.index.insert(x, i);
        i
    }

    fn root(&self, i: usize) -> usize {
        let parent = self.parent[i].get();
        if parent == i {
            i
        } else {
            let root = self.root(parent);
            self.parent[i].set(root);
            root
        }
    }

    /// Representative of `x`, or `None` if `x` was never inserted.
    pub fn find(&self, x: &K) -> Option<&K> {
        let &i = self.index.get(x)?;
        Some(&self.keys[self.root(i)])
    }

    /// Merge the sets of `x` and `y`, inserting them first if needed.
    ///
    /// Links by rank. On equal rank the root of `x` is placed below the root of `y`.
    pub fn union(&mut self, x: K, y: K) {
        let x = self.insert(x);
        let y = self.insert(y);
        let (rx, ry) = (self.root(x), self.root(y));
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx].set(ry),
            std::cmp::Ordering::Greater => self.parent[ry].set(rx),
            std::cmp::Ordering::Equal => {
                self.parent[rx].set(ry);
                self.rank[ry] += 1;
            }
        }
    }

    /// False if either element is missing.
    pub fn equivalent(&self, x: &K, y: &K) -> bool {
        match (self.find(x), self.find(y)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
    pub fn member_of(&self, x: &K) -> bool {
        self.index.contains_key(x)
    }
    pub fn size(&self) -> usize {
        self.keys.len()
    }
    /// Every inserted key, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }
}
