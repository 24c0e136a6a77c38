//! Cache-blocked matmul with emulated flush-to-zero inside the pipeline.
//!
//! `B` is transposed once up front so that every dot product walks two
//! contiguous rows. Work is tiled over rows, columns and the inner dimension
//! with one block extent. Every (row block, column block) pair is an
//! independent task that owns one output tile; inner blocks for a given cell
//! are always visited in increasing order, which fixes the reduction order of
//! every cell regardless of scheduling.

use rayon::prelude::*;

use crate::counter::FlushCounter;
use crate::error::Result;
use crate::ftz::flush_to_zero;

/// Transpose a row-major `[rows, cols]` matrix into `[cols, rows]`.
pub fn transpose(src: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    debug_assert_eq!(src.len(), rows * cols);
    let mut dst = vec![0.0f32; src.len()];
    for (r, row) in src.chunks_exact(cols.max(1)).take(rows).enumerate() {
        for (c, &v) in row.iter().enumerate() {
            dst[c * rows + r] = v;
        }
    }
    dst
}

/// Tiled product of `a` ([m, k]) and `b` ([k, n]) with tile extent `block`.
///
/// Runs on whichever rayon pool is current. Each tile task counts its
/// flushes locally and commits them to its worker's slot once.
#[allow(clippy::too_many_arguments)]
pub fn tiled_matmul(
    a: &[f32],
    b: &[f32],
    m: usize,
    k: usize,
    n: usize,
    block: usize,
    threshold: u32,
    counter: &FlushCounter,
) -> Result<Vec<f32>> {
    debug_assert!(block > 0);
    let mut c = vec![0.0f32; m * n];
    if c.is_empty() {
        return Ok(c);
    }
    let bt = transpose(b, k, n);
    let ctx = Operands {
        a,
        bt: &bt,
        k,
        threshold,
    };

    let row_blocks = m.div_ceil(block);
    let col_blocks = n.div_ceil(block);
    let tiles = (0..row_blocks * col_blocks)
        .into_par_iter()
        .map(|idx| {
            let row_start = (idx / col_blocks) * block;
            let col_start = (idx % col_blocks) * block;
            let tile = Tile {
                row_start,
                rows: block.min(m - row_start),
                col_start,
                cols: block.min(n - col_start),
            };
            let mut flushed = 0u64;
            let values = ctx.compute(&tile, block, &mut flushed);
            counter.record_current(flushed)?;
            Ok((tile, values))
        })
        .collect::<Result<Vec<_>>>()?;

    for (tile, values) in tiles {
        for (local_row, src) in values.chunks_exact(tile.cols).enumerate() {
            let off = (tile.row_start + local_row) * n + tile.col_start;
            c[off..off + tile.cols].copy_from_slice(src);
        }
    }

    Ok(c)
}

/// Inputs shared by every tile task.
struct Operands<'a> {
    a: &'a [f32],
    bt: &'a [f32],
    k: usize,
    threshold: u32,
}

/// One rectangular region of the output.
struct Tile {
    row_start: usize,
    rows: usize,
    col_start: usize,
    cols: usize,
}

impl Operands<'_> {
    /// Computes `tile` into a `rows * cols` buffer.
    fn compute(&self, tile: &Tile, block: usize, flushed: &mut u64) -> Vec<f32> {
        let (k, t) = (self.k, self.threshold);
        let mut out = vec![0.0f32; tile.rows * tile.cols];

        for inner_start in (0..k).step_by(block) {
            let inner_end = (inner_start + block).min(k);
            for local_row in 0..tile.rows {
                let a_off = (tile.row_start + local_row) * k;
                let a_seg = &self.a[a_off + inner_start..a_off + inner_end];
                for local_col in 0..tile.cols {
                    let b_off = (tile.col_start + local_col) * k;
                    let b_seg = &self.bt[b_off + inner_start..b_off + inner_end];
                    let mut s = 0.0f32;
                    for (&x, &y) in a_seg.iter().zip(b_seg) {
                        let p = flush_to_zero(x * y, t, flushed);
                        s = flush_to_zero(s + p, t, flushed);
                    }
                    let cell = &mut out[local_row * tile.cols + local_col];
                    *cell = flush_to_zero(*cell + s, t, flushed);
                }
            }
        }
        out
    }
}
