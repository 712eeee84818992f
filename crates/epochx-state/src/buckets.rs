//! Ordered token-bucket list.
//!
//! Buckets live in an arena (`Vec<Slot>`) and are chained in position order
//! through `prev`/`next` slot handles. A position → slot index gives O(1)
//! lookup and removal; freed slots are recycled. Since positions come from a
//! timeline that only moves forward, inserts almost always append at the tail.
//!
//! The persisted form is the plain sorted `Vec<Bucket>`; the arena layout is
//! rebuilt on load.

use std::collections::HashMap;

use epochx_core::types::{Balance, Bucket, Position};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
struct Slot {
    position: Position,
    amount: Balance,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Buckets of one `(epoch, account)`, sorted by position, oldest first.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Bucket>", into = "Vec<Bucket>")]
pub struct BucketList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<Position, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl BucketList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Oldest position, if any.
    pub fn front(&self) -> Option<Position> {
        self.head.map(|i| self.slots[i].position)
    }

    /// Newest position, if any.
    pub fn back(&self) -> Option<Position> {
        self.tail.map(|i| self.slots[i].position)
    }

    pub fn get(&self, position: Position) -> Option<Balance> {
        self.index.get(&position).map(|&i| self.slots[i].amount)
    }

    pub fn contains(&self, position: Position) -> bool {
        self.index.contains_key(&position)
    }

    /// Position following `position`. `None` at the end or when `position`
    /// is not in the list.
    pub fn next(&self, position: Position) -> Option<Position> {
        let i = *self.index.get(&position)?;
        self.slots[i].next.map(|n| self.slots[n].position)
    }

    /// Position preceding `position`. `None` at the front or when `position`
    /// is not in the list.
    pub fn previous(&self, position: Position) -> Option<Position> {
        let i = *self.index.get(&position)?;
        self.slots[i].prev.map(|p| self.slots[p].position)
    }

    /// Add `amount` at `position`, accumulating into an existing bucket.
    /// Zero amounts are ignored.
    pub fn insert(&mut self, position: Position, amount: Balance) {
        if amount == 0 {
            return;
        }
        if let Some(&i) = self.index.get(&position) {
            self.slots[i].amount = self.slots[i].amount.saturating_add(amount);
            return;
        }

        // Find the last slot with a smaller position, scanning from the tail.
        let mut after = self.tail;
        while let Some(i) = after {
            if self.slots[i].position < position {
                break;
            }
            after = self.slots[i].prev;
        }

        let next = match after {
            Some(a) => self.slots[a].next,
            None => self.head,
        };
        let slot = Slot { position, amount, prev: after, next };
        let i = match self.free.pop() {
            Some(i) => {
                self.slots[i] = slot;
                i
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };

        match after {
            Some(a) => self.slots[a].next = Some(i),
            None => self.head = Some(i),
        }
        match next {
            Some(n) => self.slots[n].prev = Some(i),
            None => self.tail = Some(i),
        }
        self.index.insert(position, i);
    }

    /// Take up to `amount` from the bucket at `position`, unlinking it when it
    /// empties. Returns the amount actually taken.
    pub fn decrease(&mut self, position: Position, amount: Balance) -> Balance {
        let Some(&i) = self.index.get(&position) else {
            return 0;
        };
        let taken = amount.min(self.slots[i].amount);
        self.slots[i].amount -= taken;
        if self.slots[i].amount == 0 {
            self.unlink(i);
        }
        taken
    }

    /// Unlink the bucket at `position`, returning its amount.
    pub fn remove(&mut self, position: Position) -> Option<Balance> {
        let i = *self.index.get(&position)?;
        let amount = self.slots[i].amount;
        self.unlink(i);
        Some(amount)
    }

    /// Drop every bucket with `position < cutoff`. Returns the sum dropped.
    pub fn shrink(&mut self, cutoff: Position) -> Balance {
        let mut dropped: Balance = 0;
        while let Some(h) = self.head {
            if self.slots[h].position >= cutoff {
                break;
            }
            dropped = dropped.saturating_add(self.slots[h].amount);
            self.unlink(h);
        }
        dropped
    }

    /// Sum of buckets with `position >= cutoff`.
    pub fn sum_from(&self, cutoff: Position) -> Balance {
        self.iter()
            .filter(|b| b.position >= cutoff)
            .fold(0, |acc: Balance, b| acc.saturating_add(b.amount))
    }

    /// Front-to-back iteration.
    pub fn iter(&self) -> Iter<'_> {
        Iter { list: self, cursor: self.head }
    }

    pub fn to_vec(&self) -> Vec<Bucket> {
        self.iter().collect()
    }

    /// Buckets at or after `start`.
    pub fn to_vec_from(&self, start: Position) -> Vec<Bucket> {
        self.iter().skip_while(|b| b.position < start).collect()
    }

    fn unlink(&mut self, i: usize) {
        let Slot { position, prev, next, .. } = self.slots[i];
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[i].amount = 0;
        self.slots[i].prev = None;
        self.slots[i].next = None;
        self.index.remove(&position);
        self.free.push(i);
    }
}

pub struct Iter<'a> {
    list: &'a BucketList,
    cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        let i = self.cursor?;
        let slot = &self.list.slots[i];
        self.cursor = slot.next;
        Some(Bucket { position: slot.position, amount: slot.amount })
    }
}

// Equal when the visible buckets are; slot layout is irrelevant.
impl PartialEq for BucketList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for BucketList {}

impl From<Vec<Bucket>> for BucketList {
    fn from(buckets: Vec<Bucket>) -> Self {
        let mut list = BucketList::new();
        for b in buckets {
            list.insert(b.position, b.amount);
        }
        list
    }
}

impl From<BucketList> for Vec<Bucket> {
    fn from(list: BucketList) -> Self {
        list.to_vec()
    }
}

// ── EpochBalance ──────────────────────────────────────────────────────────────

/// State of one `(epoch, account)`: the bucket list and its running total.
/// `total` always equals the sum of the buckets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochBalance {
    total: Balance,
    buckets: BucketList,
}

impl EpochBalance {
    pub fn total(&self) -> Balance {
        self.total
    }

    pub fn buckets(&self) -> &BucketList {
        &self.buckets
    }

    pub fn credit(&mut self, position: Position, amount: Balance) {
        self.buckets.insert(position, amount);
        self.total = self.total.saturating_add(amount);
    }

    /// Take up to `amount` from the bucket at `position`; returns the amount
    /// taken.
    pub fn debit(&mut self, position: Position, amount: Balance) -> Balance {
        let taken = self.buckets.decrease(position, amount);
        self.total -= taken;
        taken
    }

    /// Drop buckets older than `cutoff`; returns the amount evicted.
    pub fn evict_before(&mut self, cutoff: Position) -> Balance {
        let evicted = self.buckets.shrink(cutoff);
        self.total -= evicted;
        evicted
    }

    /// Spendable part when some buckets may be older than `cutoff`.
    pub fn live_from(&self, cutoff: Position) -> Balance {
        self.buckets.sum_from(cutoff)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(list: &BucketList) -> Vec<Position> {
        list.iter().map(|b| b.position).collect()
    }

    #[test]
    fn empty_list_navigation_is_none() {
        let list = BucketList::new();
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
        assert_eq!(list.back(), None);
        assert_eq!(list.next(5), None);
        assert_eq!(list.previous(5), None);
    }

    #[test]
    fn appends_keep_order() {
        let mut list = BucketList::new();
        list.insert(10, 1);
        list.insert(20, 2);
        list.insert(30, 3);
        assert_eq!(positions(&list), vec![10, 20, 30]);
        assert_eq!(list.front(), Some(10));
        assert_eq!(list.back(), Some(30));
        assert_eq!(list.next(10), Some(20));
        assert_eq!(list.previous(30), Some(20));
        assert_eq!(list.next(30), None);
        assert_eq!(list.previous(10), None);
    }

    #[test]
    fn out_of_order_insert_is_sorted() {
        let mut list = BucketList::new();
        list.insert(30, 3);
        list.insert(10, 1);
        list.insert(20, 2);
        list.insert(5, 9);
        assert_eq!(positions(&list), vec![5, 10, 20, 30]);
        assert_eq!(list.previous(10), Some(5));
    }

    #[test]
    fn same_position_accumulates() {
        let mut list = BucketList::new();
        list.insert(10, 4);
        list.insert(10, 6);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(10), Some(10));
    }

    #[test]
    fn zero_insert_is_ignored() {
        let mut list = BucketList::new();
        list.insert(10, 0);
        assert!(list.is_empty());
    }

    #[test]
    fn remove_middle_relinks_neighbours() {
        let mut list = BucketList::new();
        for p in [1, 2, 3] {
            list.insert(p, p as Balance);
        }
        assert_eq!(list.remove(2), Some(2));
        assert_eq!(positions(&list), vec![1, 3]);
        assert_eq!(list.next(1), Some(3));
        assert_eq!(list.previous(3), Some(1));
        assert_eq!(list.remove(2), None);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut list = BucketList::new();
        list.insert(1, 1);
        list.insert(2, 1);
        list.remove(1);
        list.insert(3, 1);
        assert_eq!(list.slots.len(), 2);
        assert_eq!(positions(&list), vec![2, 3]);
    }

    #[test]
    fn decrease_partially_then_fully() {
        let mut list = BucketList::new();
        list.insert(7, 10);
        assert_eq!(list.decrease(7, 4), 4);
        assert_eq!(list.get(7), Some(6));
        assert_eq!(list.decrease(7, 100), 6);
        assert!(list.is_empty());
        assert_eq!(list.decrease(7, 1), 0);
    }

    #[test]
    fn shrink_drops_prefix_only() {
        let mut list = BucketList::new();
        for p in [5, 10, 15, 20] {
            list.insert(p, 1);
        }
        assert_eq!(list.shrink(15), 2);
        assert_eq!(positions(&list), vec![15, 20]);
        assert_eq!(list.shrink(0), 0);
        assert_eq!(list.shrink(100), 2);
        assert!(list.is_empty());
        assert_eq!(list.back(), None);
    }

    #[test]
    fn to_vec_from_skips_older() {
        let mut list = BucketList::new();
        for p in [5, 10, 15] {
            list.insert(p, p as Balance);
        }
        let tail = list.to_vec_from(8);
        assert_eq!(
            tail,
            vec![Bucket { position: 10, amount: 10 }, Bucket { position: 15, amount: 15 }]
        );
        assert_eq!(list.sum_from(8), 25);
    }

    #[test]
    fn persisted_form_is_sorted_buckets() {
        let mut list = BucketList::new();
        list.insert(2, 20);
        list.insert(1, 10);
        list.remove(2);
        list.insert(3, 30);
        let bytes = bincode::serialize(&list).unwrap();
        let flat: Vec<Bucket> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(flat, vec![Bucket { position: 1, amount: 10 }, Bucket { position: 3, amount: 30 }]);
        let back: BucketList = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.to_vec(), list.to_vec());
    }

    #[test]
    fn epoch_balance_total_tracks_buckets() {
        let mut eb = EpochBalance::default();
        eb.credit(5, 100);
        eb.credit(8, 50);
        eb.credit(5, 1);
        assert_eq!(eb.total(), 151);
        assert_eq!(eb.debit(5, 60), 60);
        assert_eq!(eb.total(), 91);
        assert_eq!(eb.evict_before(6), 41);
        assert_eq!(eb.total(), 50);
        let sum: Balance = eb.buckets().iter().map(|b| b.amount).sum();
        assert_eq!(sum, eb.total());
        assert_eq!(eb.live_from(9), 0);
    }
}
