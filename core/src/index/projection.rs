//! The slice-projection engine.
//!
//! Given one normalized axis entry and the blocks a distributed axis is split into, work out for
//! every block:
//!
//! 1. whether it contributes any element at all,
//! 2. the entry re-expressed in the block's *local* frame (indices relative to `block.begin`),
//! 3. where its contribution lands along the result axis.
//!
//! For a slice `start:stop:step` the selected positions are `start + k * step` for
//! `k in 0..len`. A block `[b, e)` contributes the contiguous run of `k` whose positions fall in
//! the block, which is why the result of a slice over blocks is again a set of blocks. Negative
//! steps use the same parametrization, so blocks simply appear in the result in reverse order.
//!
//! ```text
//!  global axis:  0 1 2 3 | 4 5 6 | 7 8 9      blocks (0,4) (4,7) (7,10)
//!  slice 2:9         2 3 | 4 5 6 | 7 8
//!  local           2:4   | 0:3   | 0:2
//!  result            0 1 | 2 3 4 | 5 6        result blocks (0,2) (2,5) (5,7)
//! ```

use super::range::Span;
use super::slice::{AxisIndex, Slice};

/// How one block sees an axis entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSelection {
    /// The entry relative to the block's first index.
    pub local: AxisIndex,
    /// Positions along the result axis covered by this block. `None` for an integer entry, whose
    /// axis is dropped from the result.
    pub result: Option<Span>,
}

/// Projects `entry` onto every block of an axis.
///
/// Returns one item per block, in block order; `None` marks a block that holds no selected
/// element.
pub fn project_axis(entry: &AxisIndex, blocks: &[Span]) -> Vec<Option<BlockSelection>> {
    blocks
        .iter()
        .map(|block| match *entry {
            AxisIndex::Index(index) => block.contains(index).then(|| BlockSelection {
                local: AxisIndex::Index(index - block.begin),
                result: None,
            }),
            AxisIndex::Slice(slice) => project_slice(&slice, block),
        })
        .collect()
}

fn project_slice(slice: &Slice, block: &Span) -> Option<BlockSelection> {
    let count = slice.len() as isize;
    if count == 0 || block.is_empty() {
        return None;
    }

    let (start, step) = (slice.start, slice.step);
    let (begin, last) = (block.begin as isize, block.end as isize - 1);

    // [k_lo, k_hi] is the run of selection counters whose position lies in [begin, last].
    let (k_lo, k_hi) = if step > 0 {
        if start > last {
            return None;
        }
        let k_lo = if start >= begin {
            0
        } else {
            div_ceil(begin - start, step)
        };
        (k_lo, (last - start) / step)
    } else {
        let stride = -step;
        if start < begin {
            return None;
        }
        let k_lo = if start <= last {
            0
        } else {
            div_ceil(start - last, stride)
        };
        (k_lo, (start - begin) / stride)
    };
    let k_hi = k_hi.min(count - 1);
    if k_lo > k_hi {
        return None;
    }

    let len = k_hi - k_lo + 1;
    let local_start = start + k_lo * step - begin;
    let local = Slice::new(local_start, local_start + len * step, step);
    Some(BlockSelection {
        local: AxisIndex::Slice(local),
        result: Some(Span::new(k_lo as usize, (k_hi + 1) as usize)),
    })
}

fn div_ceil(a: isize, b: isize) -> isize {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::range::split;

    fn local(selection: &Option<BlockSelection>) -> Slice {
        match selection.map(|s| s.local) {
            Some(AxisIndex::Slice(s)) => s,
            other => panic!("expected a local slice, got {other:?}"),
        }
    }

    #[test]
    fn test_contiguous_slice_over_three_blocks() {
        let blocks = split(10, 3).unwrap();
        let projected = project_axis(&AxisIndex::Slice(Slice::new(2, 9, 1)), &blocks);

        assert_eq!(local(&projected[0]), Slice::new(2, 4, 1));
        assert_eq!(local(&projected[1]), Slice::new(0, 3, 1));
        assert_eq!(local(&projected[2]), Slice::new(0, 2, 1));

        let results: Vec<Span> = projected.iter().map(|p| p.unwrap().result.unwrap()).collect();
        assert_eq!(results, vec![Span::new(0, 2), Span::new(2, 5), Span::new(5, 7)]);
    }

    #[test]
    fn test_slice_excludes_blocks_without_elements() {
        let blocks = split(10, 3).unwrap();
        let projected = project_axis(&AxisIndex::Slice(Slice::new(5, 7, 1)), &blocks);
        assert!(projected[0].is_none());
        assert_eq!(local(&projected[1]), Slice::new(1, 3, 1));
        assert!(projected[2].is_none());
    }

    #[test]
    fn test_strided_slice_skips_block() {
        // positions 0, 5: the middle block [4, 7) has 5, block [7, 10) has none
        let blocks = split(10, 3).unwrap();
        let projected = project_axis(&AxisIndex::Slice(Slice::new(0, 10, 5)), &blocks);
        assert_eq!(local(&projected[0]), Slice::new(0, 5, 5));
        assert_eq!(local(&projected[1]), Slice::new(1, 6, 5));
        assert!(projected[2].is_none());
        assert_eq!(projected[1].unwrap().result, Some(Span::new(1, 2)));
    }

    #[test]
    fn test_integer_index_selects_owner_only() {
        let blocks = split(10, 3).unwrap();
        let projected = project_axis(&AxisIndex::Index(5), &blocks);
        assert!(projected[0].is_none());
        assert_eq!(
            projected[1],
            Some(BlockSelection {
                local: AxisIndex::Index(1),
                result: None
            })
        );
        assert!(projected[2].is_none());
    }

    #[test]
    fn test_negative_step_mirrors_positive() {
        // positions 9, 7, 5, 3, 1
        let blocks = split(10, 3).unwrap();
        let projected = project_axis(&AxisIndex::Slice(Slice::new(9, -1, -2)), &blocks);

        // block [7, 10): 9, 7
        let last = local(&projected[2]);
        assert_eq!(last.start, 2);
        assert_eq!(last.len(), 2);
        assert_eq!(projected[2].unwrap().result, Some(Span::new(0, 2)));

        // block [4, 7): 5
        let middle = local(&projected[1]);
        assert_eq!(middle.start, 1);
        assert_eq!(middle.len(), 1);
        assert_eq!(projected[1].unwrap().result, Some(Span::new(2, 3)));

        // block [0, 4): 3, 1
        let first = local(&projected[0]);
        assert_eq!(first.indices().collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(projected[0].unwrap().result, Some(Span::new(3, 5)));
    }

    #[test]
    fn test_projection_reproduces_selection() {
        // Every selected position must appear exactly once, in result order.
        let blocks = split(17, 4).unwrap();
        let slices = [
            Slice::new(0, 17, 1),
            Slice::new(3, 15, 4),
            Slice::new(16, -1, -3),
            Slice::new(12, 2, -1),
            Slice::new(1, 2, 1),
        ];
        for slice in slices {
            let expected: Vec<usize> = slice.indices().collect();
            let mut got = vec![usize::MAX; expected.len()];
            let selections = project_axis(&AxisIndex::Slice(slice), &blocks);
            for (block, selection) in blocks.iter().zip(selections) {
                let Some(selection) = selection else { continue };
                let AxisIndex::Slice(local) = selection.local else { unreachable!() };
                let result = selection.result.unwrap();
                assert_eq!(local.len(), result.len());
                for (k, position) in local.indices().enumerate() {
                    got[result.begin + k] = block.begin + position;
                }
            }
            assert_eq!(got, expected, "slice {slice:?}");
        }
    }

    #[test]
    fn test_empty_slice_selects_nothing() {
        let blocks = split(10, 3).unwrap();
        let projected = project_axis(&AxisIndex::Slice(Slice::new(4, 4, 1)), &blocks);
        assert!(projected.iter().all(Option::is_none));
    }
}
