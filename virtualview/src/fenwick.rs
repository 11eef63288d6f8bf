use alloc::vec::Vec;

/// Prefix sums over group extents, used to map group index ↔ main-axis offset.
#[derive(Clone, Debug, Default)]
pub(crate) struct Fenwick {
    tree: Vec<u64>, // 1-indexed
    values: Vec<u64>,
    top_bit: usize,
}

impl Fenwick {
    pub(crate) fn from_values(values: &[u64]) -> Self {
        let n = values.len();
        let mut tree = alloc::vec![0u64; n + 1];
        for i in 1..=n {
            tree[i] = tree[i].saturating_add(values[i - 1]);
            let parent = i + lowest_bit(i);
            if parent <= n {
                tree[parent] = tree[parent].saturating_add(tree[i]);
            }
        }
        Self {
            tree,
            values: values.to_vec(),
            top_bit: top_bit(n),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// Replaces the value at `index`.
    pub(crate) fn set(&mut self, index: usize, value: u64) {
        let Some(old) = self.values.get(index).copied() else {
            return;
        };
        if old == value {
            return;
        }
        self.values[index] = value;
        let n = self.values.len();
        let mut i = index + 1;
        while i <= n {
            self.tree[i] = if value >= old {
                self.tree[i].saturating_add(value - old)
            } else {
                self.tree[i].saturating_sub(old - value)
            };
            i += lowest_bit(i);
        }
    }

    /// Sum of the first `count` values.
    pub(crate) fn prefix_sum(&self, count: usize) -> u64 {
        let mut i = count.min(self.values.len());
        let mut sum = 0u64;
        while i > 0 {
            sum = sum.saturating_add(self.tree[i]);
            i &= i - 1;
        }
        sum
    }

    pub(crate) fn total(&self) -> u64 {
        self.prefix_sum(self.values.len())
    }

    /// Index of the entry containing `offset`, i.e. the number of entries whose prefix sum is
    /// `<= offset`, clamped to the last entry. `None` when empty.
    pub(crate) fn index_at(&self, mut offset: u64) -> Option<usize> {
        let n = self.values.len();
        if n == 0 {
            return None;
        }
        let mut idx = 0usize;
        let mut bit = self.top_bit;
        while bit != 0 {
            let next = idx + bit;
            if next <= n && self.tree[next] <= offset {
                offset -= self.tree[next];
                idx = next;
            }
            bit >>= 1;
        }
        Some(idx.min(n - 1))
    }
}

fn lowest_bit(i: usize) -> usize {
    i & i.wrapping_neg()
}

fn top_bit(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    1usize << (usize::BITS - 1 - n.leading_zeros())
}
