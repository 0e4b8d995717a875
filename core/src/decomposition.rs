//! Block placement of a global array over workers.
//!
//! A [`Decomposition`] records, for every distributed axis, the blocks that axis is cut into
//! and, for every worker, which block of each distributed axis it holds. Axes that are not
//! distributed are held whole by every worker.
//!
//! With several distributed axes the workers form a grid, one grid dimension per distributed
//! axis. Worker `i` of the worker list sits at the `i`-th grid coordinate in row-major order:
//!
//! ```text
//!  shape [6, 4], axes [0, 1], grid [3, 2], workers [w0..w5]
//!
//!             cols 0..2   cols 2..4
//!  rows 0..2     w0          w1
//!  rows 2..4     w2          w3
//!  rows 4..6     w4          w5
//! ```
//!
//! Decompositions are plain metadata. Two arrays can be combined element-wise on the workers
//! only when their decompositions compare equal.

use crate::error::{Error, Result};
use crate::index::{
    project_axis, result_shape, span_selection, split, AxisIndex, BlockSelection, IndexRange,
    Span,
};
use crate::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One distributed axis and the blocks it is split into, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributedAxis {
    pub axis: usize,
    pub blocks: Vec<Span>,
}

/// Where one worker sits: the block index it holds on each distributed axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub worker: WorkerId,
    pub coordinate: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decomposition {
    shape: Vec<usize>,
    axes: Vec<DistributedAxis>,
    placement: Vec<Placement>,
}

impl Decomposition {
    /// Splits `shape` evenly over `workers` along `distributed_axes`.
    ///
    /// With a single distributed axis every worker gets one block, in worker order. With more,
    /// the grid shape is chosen by [`default_grid`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the axes are invalid, the worker list is empty or has
    /// duplicates, or the workers cannot be spread without empty blocks.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use distarray::Decomposition;
    ///
    /// let d = Decomposition::new(&[10], &[0], &[0, 1, 2]).unwrap();
    /// let ranges = d.ranges(0).unwrap();
    /// assert_eq!((ranges[1].begin, ranges[1].end), (4, 7));
    /// ```
    pub fn new(shape: &[usize], distributed_axes: &[usize], workers: &[WorkerId]) -> Result<Self> {
        let axes = check_axes(shape, distributed_axes)?;
        let lengths: Vec<usize> = axes.iter().map(|&a| shape[a]).collect();
        let grid = default_grid(&lengths, workers.len())?;
        Self::with_grid(shape, &axes, &grid, workers)
    }

    /// Like [`Decomposition::new`] with an explicit grid: `grid[i]` blocks along
    /// `distributed_axes[i]`.
    pub fn with_grid(
        shape: &[usize],
        distributed_axes: &[usize],
        grid: &[usize],
        workers: &[WorkerId],
    ) -> Result<Self> {
        let axes = check_axes(shape, distributed_axes)?;
        if axes.as_slice() != distributed_axes {
            return Err(Error::Configuration(
                "distributed axes must be given in ascending order".to_string(),
            ));
        }
        if grid.len() != axes.len() {
            return Err(Error::Configuration(format!(
                "grid has {} dimensions for {} distributed axes",
                grid.len(),
                axes.len()
            )));
        }
        let cells: usize = grid.iter().product();
        if cells != workers.len() {
            return Err(Error::Configuration(format!(
                "grid {grid:?} has {cells} cells for {} workers",
                workers.len()
            )));
        }

        let axes = axes
            .iter()
            .zip(grid.iter())
            .map(|(&axis, &parts)| {
                Ok(DistributedAxis {
                    axis,
                    blocks: split(shape[axis], parts)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let placement = workers
            .iter()
            .enumerate()
            .map(|(linear, &worker)| Placement {
                worker,
                coordinate: grid_coordinate(linear, grid),
            })
            .collect();

        Self::from_parts(shape.to_vec(), axes, placement)
    }

    /// Builds a decomposition from explicit blocks and placement.
    ///
    /// Blocks must tile each distributed axis, every worker must appear once and every grid
    /// coordinate must be in range and used once.
    pub fn from_parts(
        shape: Vec<usize>,
        axes: Vec<DistributedAxis>,
        placement: Vec<Placement>,
    ) -> Result<Self> {
        let axis_ids: Vec<usize> = axes.iter().map(|a| a.axis).collect();
        check_axes(&shape, &axis_ids)?;
        if axis_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Configuration(
                "distributed axes must be given in ascending order".to_string(),
            ));
        }
        for a in &axes {
            check_tiling(a, shape[a.axis])?;
        }
        if placement.is_empty() {
            return Err(Error::Configuration(
                "a decomposition needs at least one worker".to_string(),
            ));
        }

        let mut workers = HashSet::new();
        let mut cells = HashSet::new();
        for p in &placement {
            if !workers.insert(p.worker) {
                return Err(Error::Configuration(format!(
                    "worker {} appears more than once",
                    p.worker
                )));
            }
            let in_range = p.coordinate.len() == axes.len()
                && p.coordinate
                    .iter()
                    .zip(axes.iter())
                    .all(|(&c, a)| c < a.blocks.len());
            if !in_range || !cells.insert(p.coordinate.clone()) {
                return Err(Error::Configuration(format!(
                    "invalid grid coordinate {:?} for worker {}",
                    p.coordinate, p.worker
                )));
            }
        }

        Ok(Self {
            shape,
            axes,
            placement,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn distributed_axes(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.axis).collect()
    }

    pub fn axes(&self) -> &[DistributedAxis] {
        &self.axes
    }

    pub fn placement(&self) -> &[Placement] {
        &self.placement
    }

    /// Workers in placement order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.placement.iter().map(|p| p.worker).collect()
    }

    /// Number of blocks along each distributed axis.
    pub fn grid(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.blocks.len()).collect()
    }

    /// One range per worker along distributed `axis`, sorted by `begin`.
    ///
    /// Returns `None` if `axis` is not distributed.
    pub fn ranges(&self, axis: usize) -> Option<Vec<IndexRange>> {
        let slot = self.axes.iter().position(|a| a.axis == axis)?;
        let blocks = &self.axes[slot].blocks;
        let mut ranges: Vec<IndexRange> = self
            .placement
            .iter()
            .map(|p| {
                let span = blocks[p.coordinate[slot]];
                IndexRange {
                    worker: p.worker,
                    begin: span.begin,
                    end: span.end,
                }
            })
            .collect();
        ranges.sort_by_key(|r| r.begin);
        Some(ranges)
    }

    fn placement_of(&self, worker: WorkerId) -> Option<&Placement> {
        self.placement.iter().find(|p| p.worker == worker)
    }

    fn spans_at(&self, coordinate: &[usize]) -> Vec<Span> {
        let mut spans: Vec<Span> = self.shape.iter().map(|&len| Span::new(0, len)).collect();
        for (a, &c) in self.axes.iter().zip(coordinate.iter()) {
            spans[a.axis] = a.blocks[c];
        }
        spans
    }

    /// The part of the global array held by `worker`, one span per axis.
    pub fn local_spans(&self, worker: WorkerId) -> Option<Vec<Span>> {
        self.placement_of(worker)
            .map(|placement| self.spans_at(&placement.coordinate))
    }

    /// Every worker with the spans it holds, in placement order.
    pub fn partitions(&self) -> Vec<(WorkerId, Vec<Span>)> {
        self.placement
            .iter()
            .map(|p| (p.worker, self.spans_at(&p.coordinate)))
            .collect()
    }

    /// Shape of `worker`'s local partition.
    pub fn local_shape(&self, worker: WorkerId) -> Option<Vec<usize>> {
        self.local_spans(worker)
            .map(|spans| spans.iter().map(Span::len).collect())
    }

    /// Translates a normalized global index expression into per-worker local expressions.
    ///
    /// # Errors
    ///
    /// Returns `Error::Dimension` if `entries` does not have one entry per axis.
    pub fn project(&self, entries: &[AxisIndex]) -> Result<Projection> {
        if entries.len() != self.rank() {
            return Err(Error::Dimension {
                expected: self.rank(),
                got: entries.len(),
            });
        }

        // result_axis[a] = position of source axis `a` in the result, if it survives
        let mut result_axis = vec![None; self.rank()];
        let mut next = 0;
        for (a, entry) in entries.iter().enumerate() {
            if !entry.is_index() {
                result_axis[a] = Some(next);
                next += 1;
            }
        }

        let per_axis: Vec<Vec<Option<BlockSelection>>> = self
            .axes
            .iter()
            .map(|a| project_axis(&entries[a.axis], &a.blocks))
            .collect();

        let shape = result_shape(entries);
        let mut parts = Vec::new();
        'workers: for placement in &self.placement {
            let mut local = entries.to_vec();
            let mut window: Vec<Span> = shape.iter().map(|&len| Span::new(0, len)).collect();
            for ((a, selections), &c) in self.axes.iter().zip(&per_axis).zip(&placement.coordinate) {
                let Some(selection) = selections[c] else {
                    continue 'workers;
                };
                local[a.axis] = selection.local;
                if let (Some(r), Some(span)) = (result_axis[a.axis], selection.result) {
                    window[r] = span;
                }
            }
            parts.push(ProjectedPart {
                worker: placement.worker,
                local,
                window,
            });
        }

        let distributed = self
            .axes
            .iter()
            .filter_map(|a| result_axis[a.axis])
            .collect();

        Ok(Projection {
            shape,
            distributed,
            parts,
        })
    }
}

/// The contribution of one worker to a projected selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedPart {
    pub worker: WorkerId,
    /// The selection in the worker's local frame, one entry per source axis.
    pub local: Vec<AxisIndex>,
    /// Where the selected elements land in the result, one span per result axis.
    pub window: Vec<Span>,
}

impl ProjectedPart {
    /// [`window`](Self::window) as an index expression over the result.
    pub fn result_selection(&self) -> Vec<AxisIndex> {
        span_selection(&self.window)
    }
}

/// A global selection split into per-worker pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    shape: Vec<usize>,
    /// Result axes that come from distributed source axes.
    distributed: Vec<usize>,
    parts: Vec<ProjectedPart>,
}

impl Projection {
    /// Shape of the selected array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Participating workers in placement order. Workers holding nothing are left out.
    pub fn parts(&self) -> &[ProjectedPart] {
        &self.parts
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.parts.iter().map(|p| p.worker).collect()
    }

    /// Result axes that are still distributed.
    pub fn distributed_axes(&self) -> &[usize] {
        &self.distributed
    }

    /// The decomposition of the selected array, or `None` if every distributed axis was
    /// indexed away (the selection then lives on a single worker).
    pub fn decomposition(&self) -> Result<Option<Decomposition>> {
        if self.distributed.is_empty() || self.parts.is_empty() {
            return Ok(None);
        }

        let axes: Vec<DistributedAxis> = self
            .distributed
            .iter()
            .map(|&axis| {
                let mut blocks: Vec<Span> = self.parts.iter().map(|p| p.window[axis]).collect();
                blocks.sort();
                blocks.dedup();
                DistributedAxis { axis, blocks }
            })
            .collect();

        let placement = self
            .parts
            .iter()
            .map(|p| Placement {
                worker: p.worker,
                coordinate: axes
                    .iter()
                    .map(|a| {
                        a.blocks
                            .binary_search(&p.window[a.axis])
                            .unwrap_or_default()
                    })
                    .collect(),
            })
            .collect();

        Decomposition::from_parts(self.shape.clone(), axes, placement).map(Some)
    }
}

/// Sorts and checks distributed axes against `shape`.
fn check_axes(shape: &[usize], distributed_axes: &[usize]) -> Result<Vec<usize>> {
    if distributed_axes.is_empty() {
        return Err(Error::Configuration(
            "at least one axis must be distributed".to_string(),
        ));
    }
    let mut axes = distributed_axes.to_vec();
    axes.sort_unstable();
    if axes.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::Configuration(format!(
            "distributed axes {distributed_axes:?} contain duplicates"
        )));
    }
    if let Some(&axis) = axes.iter().find(|&&a| a >= shape.len()) {
        return Err(Error::Configuration(format!(
            "axis {axis} is out of range for an array of rank {}",
            shape.len()
        )));
    }
    Ok(axes)
}

fn check_tiling(axis: &DistributedAxis, len: usize) -> Result<()> {
    let mut expected = 0;
    for block in &axis.blocks {
        if block.begin != expected || block.end <= block.begin {
            return Err(Error::Configuration(format!(
                "blocks {:?} do not tile axis {} of length {len}",
                axis.blocks, axis.axis
            )));
        }
        expected = block.end;
    }
    if expected != len {
        return Err(Error::Configuration(format!(
            "blocks {:?} do not tile axis {} of length {len}",
            axis.blocks, axis.axis
        )));
    }
    Ok(())
}

/// Converts a linear index into a row-major grid coordinate.
fn grid_coordinate(mut linear: usize, grid: &[usize]) -> Vec<usize> {
    let mut coordinate = vec![0; grid.len()];
    for (c, &dim) in coordinate.iter_mut().zip(grid.iter()).rev() {
        *c = linear % dim;
        linear /= dim;
    }
    coordinate
}

/// Chooses how many blocks each distributed axis gets for `workers` workers.
///
/// The worker count is factored into primes, largest first, and each factor goes to the axis
/// with the most elements per block so far (the first such axis on ties), as long as that axis
/// still has at least one element per block afterwards.
///
/// # Errors
///
/// Returns `Error::Configuration` if `workers` is zero or some factor fits no axis.
pub fn default_grid(lengths: &[usize], workers: usize) -> Result<Vec<usize>> {
    if workers == 0 {
        return Err(Error::Configuration(
            "cannot distribute over zero workers".to_string(),
        ));
    }

    let mut grid = vec![1; lengths.len()];
    for factor in prime_factors(workers).into_iter().rev() {
        let mut best: Option<usize> = None;
        for (i, (&len, &parts)) in lengths.iter().zip(grid.iter()).enumerate() {
            if parts * factor > len {
                continue;
            }
            // len / parts > best_len / best_parts, without rounding
            let better = best.map_or(true, |b| len * grid[b] > lengths[b] * parts);
            if better {
                best = Some(i);
            }
        }
        let Some(i) = best else {
            return Err(Error::Configuration(format!(
                "cannot spread {workers} workers over axes of lengths {lengths:?}"
            )));
        };
        grid[i] *= factor;
    }
    Ok(grid)
}

/// Prime factors in ascending order, with multiplicity.
fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{normalize, Slice};
    use crate::s;

    #[test]
    fn test_single_axis() {
        let d = Decomposition::new(&[10, 3], &[0], &[4, 5, 6]).unwrap();
        assert_eq!(d.grid(), vec![3]);
        assert_eq!(d.worker_ids(), vec![4, 5, 6]);
        assert_eq!(d.local_shape(5), Some(vec![3, 3]));
        assert_eq!(d.local_shape(6), Some(vec![3, 3]));
        assert_eq!(d.local_shape(4), Some(vec![4, 3]));
        assert_eq!(d.local_shape(7), None);
        assert!(d.ranges(1).is_none());
    }

    #[test]
    fn test_too_many_workers() {
        let err = Decomposition::new(&[2], &[0], &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_axes_and_workers() {
        assert!(Decomposition::new(&[4], &[1], &[0]).is_err());
        assert!(Decomposition::new(&[4, 4], &[0, 0], &[0]).is_err());
        assert!(Decomposition::new(&[4], &[], &[0]).is_err());
        assert!(Decomposition::new(&[4], &[0], &[]).is_err());
        assert!(Decomposition::new(&[4], &[0], &[1, 1]).is_err());
    }

    #[test]
    fn test_default_grid() {
        assert_eq!(default_grid(&[10], 3).unwrap(), vec![3]);
        assert_eq!(default_grid(&[8, 8], 4).unwrap(), vec![2, 2]);
        assert_eq!(default_grid(&[100, 4], 6).unwrap(), vec![6, 1]);
        assert_eq!(default_grid(&[2, 3], 6).unwrap(), vec![2, 3]);
        assert!(default_grid(&[2, 2], 5).is_err());
    }

    #[test]
    fn test_two_axis_grid_placement() {
        let d = Decomposition::with_grid(&[6, 4], &[0, 1], &[3, 2], &[0, 1, 2, 3, 4, 5]).unwrap();
        let spans = d.local_spans(3).unwrap();
        assert_eq!(spans, vec![Span::new(2, 4), Span::new(2, 4)]);

        let ranges = d.ranges(1).unwrap();
        assert_eq!(ranges.len(), 6);
        assert!(ranges.windows(2).all(|w| w[0].begin <= w[1].begin));
        assert_eq!(
            ranges.iter().filter(|r| r.begin == 0).map(|r| r.worker).collect::<Vec<_>>(),
            vec![0, 2, 4]
        );
    }

    #[test]
    fn test_equality() {
        let a = Decomposition::new(&[10], &[0], &[0, 1, 2]).unwrap();
        let b = Decomposition::new(&[10], &[0], &[0, 1, 2]).unwrap();
        let c = Decomposition::new(&[10], &[0], &[2, 1, 0]).unwrap();
        let d = Decomposition::new(&[10], &[0], &[0, 1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_project_slice() {
        let d = Decomposition::new(&[10], &[0], &[0, 1, 2]).unwrap();
        let entries = normalize(d.shape(), &s![2..9]).unwrap();
        let p = d.project(&entries).unwrap();

        assert_eq!(p.shape(), &[7]);
        let locals: Vec<AxisIndex> = p.parts().iter().map(|part| part.local[0]).collect();
        assert_eq!(
            locals,
            vec![
                AxisIndex::Slice(Slice::new(2, 4, 1)),
                AxisIndex::Slice(Slice::new(0, 3, 1)),
                AxisIndex::Slice(Slice::new(0, 2, 1)),
            ]
        );

        let result = p.decomposition().unwrap().unwrap();
        let ranges = result.ranges(0).unwrap();
        let spans: Vec<(usize, usize)> = ranges.iter().map(|r| (r.begin, r.end)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 5), (5, 7)]);
    }

    #[test]
    fn test_project_integer_on_distributed_axis() {
        let d = Decomposition::new(&[10, 4], &[0], &[0, 1, 2]).unwrap();
        let entries = normalize(d.shape(), &s![8, ..]).unwrap();
        let p = d.project(&entries).unwrap();

        assert_eq!(p.shape(), &[4]);
        assert_eq!(p.worker_ids(), vec![2]);
        assert_eq!(p.parts()[0].local[0], AxisIndex::Index(1));
        assert!(p.decomposition().unwrap().is_none());
    }

    #[test]
    fn test_project_keeps_other_distributed_axis() {
        let workers = [0, 1, 2, 3];
        let d = Decomposition::with_grid(&[4, 6], &[0, 1], &[2, 2], &workers).unwrap();
        let entries = normalize(d.shape(), &s![3, 1..6]).unwrap();
        let p = d.project(&entries).unwrap();

        // row 3 lives in the second row of the grid: workers 2 and 3
        assert_eq!(p.worker_ids(), vec![2, 3]);
        assert_eq!(p.distributed_axes(), &[0]);
        let result = p.decomposition().unwrap().unwrap();
        assert_eq!(result.shape(), &[5]);
        assert_eq!(result.distributed_axes(), vec![0]);
        assert_eq!(result.local_shape(2), Some(vec![2]));
        assert_eq!(result.local_shape(3), Some(vec![3]));
    }

    #[test]
    fn test_project_rank_mismatch() {
        let d = Decomposition::new(&[10, 4], &[0], &[0, 1]).unwrap();
        let err = d.project(&[AxisIndex::Index(0)]).unwrap_err();
        assert!(matches!(err, Error::Dimension { expected: 2, got: 1 }));
    }

    #[test]
    fn test_full_projection_reproduces_decomposition() {
        let d = Decomposition::with_grid(&[7, 5], &[0, 1], &[3, 2], &[5, 4, 3, 2, 1, 0]).unwrap();
        let entries = normalize(d.shape(), &s![.., ..]).unwrap();
        let again = d.project(&entries).unwrap().decomposition().unwrap().unwrap();
        assert_eq!(again, d);
    }

    #[test]
    fn test_reversed_projection_reverses_blocks() {
        let d = Decomposition::new(&[10], &[0], &[0, 1, 2]).unwrap();
        let entries = normalize(d.shape(), &[crate::index::AxisArg::full().step(-1)]).unwrap();
        let result = d.project(&entries).unwrap().decomposition().unwrap().unwrap();
        let ranges = result.ranges(0).unwrap();
        let order: Vec<_> = ranges.iter().map(|r| (r.worker, r.begin, r.end)).collect();
        assert_eq!(order, vec![(2, 0, 3), (1, 3, 6), (0, 6, 10)]);
    }
}
