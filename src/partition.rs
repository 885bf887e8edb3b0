//! Groups many small items into a few batches and puts them back.
//!
//! Items are dealt out round-robin: original index `k` goes to group
//! `k % m`. Interleaving bounds every group to `ceil(n / m)` items
//! without leaving a short remainder group at the end.

use serde::{Deserialize, Serialize};

/// How to batch the items of a chunked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Make at least this many groups (never more than there are items).
    pub min_groups: usize,
    /// Put at most this many items in one group.
    pub max_group_size: usize,
}

impl ChunkOptions {
    pub fn new(min_groups: usize, max_group_size: usize) -> Self {
        Self {
            min_groups: min_groups.max(1),
            max_group_size: max_group_size.max(1),
        }
    }

    /// Number of groups used for `n` items.
    pub fn group_count(&self, n: usize) -> usize {
        group_count(n, self.min_groups, self.max_group_size)
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

fn ceil_div(p: usize, q: usize) -> usize {
    (p + q - 1) / q
}

/// `max(ceil(n / max_group_size), min(min_groups, n))`, with both limits
/// treated as at least 1.
pub fn group_count(n: usize, min_groups: usize, max_group_size: usize) -> usize {
    let min_groups = min_groups.max(1);
    let max_group_size = max_group_size.max(1);
    ceil_div(n, max_group_size).max(min_groups.min(n))
}

/// Original indices held by each group, in group order.
pub fn split_indices(n: usize, min_groups: usize, max_group_size: usize) -> Vec<Vec<usize>> {
    let m = group_count(n, min_groups, max_group_size);
    (0..m).map(|i| (i..n).step_by(m).collect()).collect()
}

/// Splits `x` into round-robin groups, keeping relative order within a
/// group.
pub fn split<T>(x: Vec<T>, min_groups: usize, max_group_size: usize) -> Vec<Vec<T>> {
    let n = x.len();
    let m = group_count(n, min_groups, max_group_size);
    let mut groups: Vec<Vec<T>> = (0..m).map(|_| Vec::with_capacity(ceil_div(n, m.max(1)))).collect();
    for (k, item) in x.into_iter().enumerate() {
        groups[k % m].push(item);
    }
    groups
}

/// Inverse of [`split`]: takes row `j` from every group in turn, for
/// `j = 0, 1, ...`, skipping groups that are too short.
pub fn merge<T>(groups: Vec<Vec<T>>) -> Vec<T> {
    let total = groups.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut iters: Vec<_> = groups.into_iter().map(Vec::into_iter).collect();
    while out.len() < total {
        for it in iters.iter_mut() {
            if let Some(item) = it.next() {
                out.push(item);
            }
        }
    }
    out
}

/// Like [`merge`] but writes into a destination already sized to hold
/// every element. Elements beyond `dst.len()` are dropped.
pub fn merge_to<T>(dst: &mut [T], groups: Vec<Vec<T>>) {
    let m = groups.len();
    for (i, group) in groups.into_iter().enumerate() {
        for (j, item) in group.into_iter().enumerate() {
            if let Some(slot) = dst.get_mut(m * j + i) {
                *slot = item;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_cases() -> Vec<(usize, usize, Vec<i32>, Vec<Vec<i32>>)> {
        vec![
            (1, 3, vec![1, 2, 3, 4, 5, 6], vec![vec![1, 3, 5], vec![2, 4, 6]]),
            (1, 2, vec![1, 2, 3, 4, 5, 6], vec![vec![1, 4], vec![2, 5], vec![3, 6]]),
            (1, 3, vec![1, 2, 3, 4, 5], vec![vec![1, 3, 5], vec![2, 4]]),
            (1, 3, vec![1, 2, 3, 4, 5, 6, 7], vec![vec![1, 4, 7], vec![2, 5], vec![3, 6]]),
            (3, 3, vec![1, 2, 3, 4, 5, 6, 7], vec![vec![1, 4, 7], vec![2, 5], vec![3, 6]]),
            (4, 3, vec![1, 2, 3, 4, 5, 6, 7], vec![vec![1, 5], vec![2, 6], vec![3, 7], vec![4]]),
            (10, 1, vec![1, 2], vec![vec![1], vec![2]]),
        ]
    }

    #[test]
    fn split_deals_round_robin() {
        for (min_groups, max_size, input, want) in split_cases() {
            let got = split(input.clone(), min_groups, max_size);
            assert_eq!(got, want, "split({:?}, {}, {})", input, min_groups, max_size);
        }
    }

    #[test]
    fn merge_after_split_is_identity() {
        for (min_groups, max_size, input, _) in split_cases() {
            let got = merge(split(input.clone(), min_groups, max_size));
            assert_eq!(got, input);
        }
        for n in 1..40 {
            let input: Vec<usize> = (0..n).collect();
            for min_groups in 1..6 {
                for max_size in 1..6 {
                    assert_eq!(merge(split(input.clone(), min_groups, max_size)), input);
                }
            }
        }
    }

    #[test]
    fn merge_to_fills_destination() {
        let input = vec!['a', 'b', 'c', 'd', 'e', 'f', 'g'];
        let groups = split(input.clone(), 1, 3);
        let mut dst = vec![' '; input.len()];
        merge_to(&mut dst, groups);
        assert_eq!(dst, input);
    }

    #[test]
    fn split_indices_matches_split() {
        let groups = split_indices(7, 1, 3);
        assert_eq!(groups, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
        let largest = groups.iter().map(Vec::len).max().unwrap();
        assert_eq!(largest, 3);
    }

    #[test]
    fn empty_input_has_no_groups() {
        assert_eq!(group_count(0, 3, 2), 0);
        assert!(split(Vec::<u8>::new(), 3, 2).is_empty());
        assert!(merge(Vec::<Vec<u8>>::new()).is_empty());
    }

    #[test]
    fn zero_limits_are_clamped() {
        assert_eq!(group_count(5, 0, 0), 5);
        assert_eq!(ChunkOptions::new(0, 0), ChunkOptions::new(1, 1));
    }
}
