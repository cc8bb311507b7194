//! Fixed-width node bitmap: the single authority for "which nodes".
//!
//! All node sets in the controller — partition membership, a job's
//! allocation, the scheduler's working set during selection — are
//! represented as a bitmap over Node Registry ordinals (spec §3). Set
//! operations are core primitives and must not allocate; every method here
//! either writes in place or takes an explicit pre-sized destination.
//! Copy-on-write is deliberately not used: callers own their copies, so a
//! `NodeBitmap` can be handed to an agent RPC or stashed on a `Job` without
//! aliasing the registry's live state.

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-width bitset over node ordinals `[0, capacity)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBitmap {
    words: Box<[u64]>,
    capacity: usize,
}

/// A maximal run of consecutive set ordinals, with its aggregate capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContiguousSet {
    /// First ordinal in the run.
    pub start: usize,
    /// Number of consecutive set ordinals in the run.
    pub node_count: usize,
    /// Sum of `cpu_count` over the run, filled in by the caller.
    pub cpu_count: u32,
}

impl ContiguousSet {
    fn word_len(capacity: usize) -> usize {
        capacity.div_ceil(WORD_BITS)
    }
}

impl NodeBitmap {
    /// Allocate a zeroed bitmap sized for `capacity` ordinals. This is the
    /// only method on this type that allocates; it is called once per
    /// registry (re)size, never per scheduling decision.
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0u64; ContiguousSet::word_len(capacity)].into_boxed_slice(),
            capacity,
        }
    }

    /// Grow in place to a new, larger capacity, preserving existing bits.
    /// Still the single allocation point — called only when the Node
    /// Registry itself grows.
    pub fn grow(&mut self, new_capacity: usize) {
        assert!(new_capacity >= self.capacity, "bitmap cannot shrink");
        let mut words = vec![0u64; ContiguousSet::word_len(new_capacity)].into_boxed_slice();
        words[..self.words.len()].copy_from_slice(&self.words);
        self.words = words;
        self.capacity = new_capacity;
    }

    /// Capacity in ordinals (not necessarily all meaningful — the caller
    /// tracks how many ordinals the registry has actually assigned).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn check(&self, idx: usize) {
        debug_assert!(idx < self.capacity, "ordinal {idx} out of bitmap range");
    }

    /// Set bit `idx`.
    pub fn set(&mut self, idx: usize) {
        self.check(idx);
        self.words[idx / WORD_BITS] |= 1u64 << (idx % WORD_BITS);
    }

    /// Clear bit `idx`.
    pub fn clear(&mut self, idx: usize) {
        self.check(idx);
        self.words[idx / WORD_BITS] &= !(1u64 << (idx % WORD_BITS));
    }

    /// Test bit `idx`.
    #[inline]
    pub fn test(&self, idx: usize) -> bool {
        self.check(idx);
        self.words[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) != 0
    }

    /// Clear every bit.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Set every bit in `[0, capacity)`.
    pub fn set_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = u64::MAX);
        self.mask_tail();
    }

    /// Zero out bits beyond `capacity` in the last word so popcount/iteration
    /// never see phantom set bits from a non-multiple-of-64 capacity.
    fn mask_tail(&mut self) {
        let rem = self.capacity % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    /// `self &= other`, in place. Panics if capacities differ.
    pub fn and_assign(&mut self, other: &NodeBitmap) {
        assert_eq!(self.capacity, other.capacity);
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= b;
        }
    }

    /// `self |= other`, in place. Panics if capacities differ.
    pub fn or_assign(&mut self, other: &NodeBitmap) {
        assert_eq!(self.capacity, other.capacity);
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// `self &= !other` — clear every bit that is set in `other`.
    pub fn andnot_assign(&mut self, other: &NodeBitmap) {
        assert_eq!(self.capacity, other.capacity);
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
    }

    /// Number of set bits.
    pub fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if no bits are set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate set ordinals in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            let base = wi * WORD_BITS;
            IterBits { word: w, base }
        })
    }

    /// Group the set bits into maximal runs of consecutive ordinals (spec
    /// §4.F step 4). `cpu_count` in each run is left at 0 — the scheduler
    /// fills it in from per-node CPU counts, since this type has no notion
    /// of per-node capacity.
    pub fn contiguous_sets(&self) -> Vec<ContiguousSet> {
        let mut sets = Vec::new();
        let mut run_start: Option<usize> = None;
        let mut prev = 0usize;
        for idx in self.iter_ones() {
            match run_start {
                None => run_start = Some(idx),
                Some(start) if idx == prev + 1 => {
                    let _ = start;
                }
                Some(start) => {
                    sets.push(ContiguousSet {
                        start,
                        node_count: prev - start + 1,
                        cpu_count: 0,
                    });
                    run_start = Some(idx);
                }
            }
            prev = idx;
        }
        if let Some(start) = run_start {
            sets.push(ContiguousSet {
                start,
                node_count: prev - start + 1,
                cpu_count: 0,
            });
        }
        sets
    }
}

struct IterBits {
    word: u64,
    base: usize,
}

impl Iterator for IterBits {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        if self.word == 0 {
            return None;
        }
        let tz = self.word.trailing_zeros() as usize;
        self.word &= self.word - 1; // clear lowest set bit
        Some(self.base + tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_test_round_trip() {
        let mut bm = NodeBitmap::new(20);
        bm.set(3);
        bm.set(17);
        assert!(bm.test(3));
        assert!(bm.test(17));
        assert!(!bm.test(4));
        bm.clear(3);
        assert!(!bm.test(3));
        assert_eq!(bm.popcount(), 1);
    }

    #[test]
    fn tail_bits_not_phantom_set() {
        let mut bm = NodeBitmap::new(5);
        bm.set_all();
        assert_eq!(bm.popcount(), 5);
        assert_eq!(bm.iter_ones().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn and_or_andnot() {
        let mut a = NodeBitmap::new(8);
        let mut b = NodeBitmap::new(8);
        a.set(0);
        a.set(1);
        a.set(2);
        b.set(1);
        b.set(2);
        b.set(3);

        let mut and = a.clone();
        and.and_assign(&b);
        assert_eq!(and.iter_ones().collect::<Vec<_>>(), vec![1, 2]);

        let mut or = a.clone();
        or.or_assign(&b);
        assert_eq!(or.iter_ones().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        let mut andnot = a.clone();
        andnot.andnot_assign(&b);
        assert_eq!(andnot.iter_ones().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn contiguous_sets_groups_runs() {
        let mut bm = NodeBitmap::new(16);
        for i in 0..4 {
            bm.set(i);
        }
        for i in 8..16 {
            bm.set(i);
        }
        let sets = bm.contiguous_sets();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], ContiguousSet { start: 0, node_count: 4, cpu_count: 0 });
        assert_eq!(sets[1], ContiguousSet { start: 8, node_count: 8, cpu_count: 0 });
    }

    #[test]
    fn grow_preserves_bits() {
        let mut bm = NodeBitmap::new(4);
        bm.set(2);
        bm.grow(100);
        assert!(bm.test(2));
        assert_eq!(bm.capacity(), 100);
        bm.set(99);
        assert!(bm.test(99));
    }
}
