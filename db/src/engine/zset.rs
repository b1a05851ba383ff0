//! Sorted set: a hash index over member names joined with an ordered tree
//! over (score, name).
//!
//! The hash side maps a member name to its tree node id, which is stable
//! across rebalancing and score updates, so each member is stored exactly
//! once (in the tree slot) and reachable both by name in O(1) amortized
//! and by rank in O(log n).

use super::avl::{NodeId, OrderedTree};
use super::hash::{HashIndex, hash_bytes};

pub(crate) struct Member {
    pub(crate) score: f64,
    pub(crate) name: Box<[u8]>,
}

/// Total order among members: score ascending, ties by lexicographic byte
/// comparison of the name (which breaks prefix ties by length).
fn member_before(member: &Member, score: f64, name: &[u8]) -> bool {
    if member.score != score {
        return member.score < score;
    }
    member.name.as_ref() < name
}

fn member_less(a: &Member, b: &Member) -> bool {
    member_before(a, b.score, &b.name)
}

pub(crate) struct SortedSet {
    index: HashIndex<NodeId>,
    tree: OrderedTree<Member>,
}

impl SortedSet {
    pub(crate) fn new() -> Self {
        SortedSet {
            index: HashIndex::new(),
            tree: OrderedTree::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tree.len()
    }

    /// Adds a member or updates the score of an existing one. Returns true
    /// only when the member is new. A score change reorders the existing
    /// tree node in place: detach, rewrite, reattach, same node id.
    pub(crate) fn add(&mut self, name: &[u8], score: f64) -> bool {
        match self.member_id(name) {
            Some(id) => {
                if self.tree.get(id).score != score {
                    self.tree.detach(id);
                    self.tree.get_mut(id).score = score;
                    self.tree.attach(id, member_less);
                }
                false
            }
            None => {
                let id = self.tree.insert(
                    Member {
                        score,
                        name: name.into(),
                    },
                    member_less,
                );
                self.index.insert(hash_bytes(name), id);
                true
            }
        }
    }

    pub(crate) fn score(&mut self, name: &[u8]) -> Option<f64> {
        let id = self.member_id(name)?;
        Some(self.tree.get(id).score)
    }

    /// Finds the first member at or after `(score, name)`, then steps
    /// `offset` in-order positions (negative steps go backward).
    pub(crate) fn query(&self, score: f64, name: &[u8], offset: i64) -> Option<(&[u8], f64)> {
        let found = self.tree.lower_bound(|m| member_before(m, score, name))?;
        let id = self.tree.offset(found, offset)?;
        let member = self.tree.get(id);
        Some((member.name.as_ref(), member.score))
    }

    /// Members with rank in `[start, stop]`, both inclusive. Negative
    /// indices count from the end; out-of-range bounds are clamped.
    pub(crate) fn range(&self, start: i64, stop: i64) -> Vec<(&[u8], f64)> {
        let size = self.tree.len() as i64;
        let mut start = if start < 0 { size + start } else { start };
        let mut stop = if stop < 0 { size + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= size {
            stop = size - 1;
        }
        if start > stop || start >= size {
            return Vec::new();
        }
        let count = (stop - start + 1) as usize;
        let mut members = Vec::with_capacity(count);
        let Some(first) = self.tree.leftmost() else {
            return members;
        };
        let Some(mut cursor) = self.tree.offset(first, start) else {
            return members;
        };
        loop {
            let member = self.tree.get(cursor);
            members.push((member.name.as_ref(), member.score));
            if members.len() == count {
                break;
            }
            match self.tree.successor(cursor) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        members
    }

    fn member_id(&mut self, name: &[u8]) -> Option<NodeId> {
        let tree = &self.tree;
        self.index
            .lookup(hash_bytes(name), |id| tree.get(*id).name.as_ref() == name)
            .copied()
    }
}
