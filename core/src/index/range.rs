//! Contiguous blocks of an axis.

use crate::error::{Error, Result};
use crate::WorkerId;
use serde::{Deserialize, Serialize};

/// Half-open interval `[begin, end)` of indices along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

impl Span {
    pub fn new(begin: usize, end: usize) -> Self {
        debug_assert!(begin <= end);
        Self { begin, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.begin <= index && index < self.end
    }
}

/// The block of one axis owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub worker: WorkerId,
    pub begin: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn span(&self) -> Span {
        Span::new(self.begin, self.end)
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Splits `[0, axis_length)` into `worker_count` contiguous, non-empty blocks.
///
/// Every block has `axis_length / worker_count` elements; the first `axis_length % worker_count`
/// blocks get one more. Blocks are returned in ascending order.
///
/// # Errors
///
/// Returns `Error::Configuration` if `worker_count` is zero or exceeds `axis_length`.
///
/// # Examples
///
/// ```rust
/// use distarray::index::{split, Span};
///
/// let blocks = split(10, 3).unwrap();
/// assert_eq!(blocks, vec![Span::new(0, 4), Span::new(4, 7), Span::new(7, 10)]);
/// ```
pub fn split(axis_length: usize, worker_count: usize) -> Result<Vec<Span>> {
    if worker_count == 0 {
        return Err(Error::Configuration(
            "cannot split an axis over zero workers".to_string(),
        ));
    }
    if worker_count > axis_length {
        return Err(Error::Configuration(format!(
            "cannot split an axis of length {axis_length} over {worker_count} workers"
        )));
    }

    let base = axis_length / worker_count;
    let remainder = axis_length % worker_count;
    let mut begin = 0;
    let blocks = (0..worker_count)
        .map(|i| {
            let len = base + usize::from(i < remainder);
            let span = Span::new(begin, begin + len);
            begin += len;
            span
        })
        .collect();
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_with_remainder() {
        let blocks = split(10, 3).unwrap();
        assert_eq!(
            blocks,
            vec![Span::new(0, 4), Span::new(4, 7), Span::new(7, 10)]
        );
    }

    #[test]
    fn test_split_exact() {
        let blocks = split(8, 4).unwrap();
        assert!(blocks.iter().all(|b| b.len() == 2));
        assert_eq!(blocks.last().unwrap().end, 8);
    }

    #[test]
    fn test_split_one_per_worker() {
        let blocks = split(3, 3).unwrap();
        assert_eq!(blocks, vec![Span::new(0, 1), Span::new(1, 2), Span::new(2, 3)]);
    }

    #[test]
    fn test_split_properties() {
        for length in 1..40 {
            for workers in 1..=length {
                let blocks = split(length, workers).unwrap();
                assert_eq!(blocks.len(), workers);
                assert_eq!(blocks[0].begin, 0);
                assert_eq!(blocks[workers - 1].end, length);
                for pair in blocks.windows(2) {
                    assert_eq!(pair[0].end, pair[1].begin);
                }
                let min = blocks.iter().map(Span::len).min().unwrap();
                let max = blocks.iter().map(Span::len).max().unwrap();
                assert!(min >= 1);
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn test_split_too_many_workers() {
        assert!(matches!(split(2, 3), Err(Error::Configuration(_))));
        assert!(matches!(split(5, 0), Err(Error::Configuration(_))));
    }
}
