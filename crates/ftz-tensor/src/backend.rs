use std::fmt::Debug;

use crate::conv::Conv2dGeometry;
use crate::counter::FlushCounter;
use crate::error::Result;

/// Trait for pluggable flush-aware compute backends.
///
/// Data is passed in as row-major f32 slices and results are returned as
/// owned vectors (or written in place for elementwise ops). Every operation
/// takes a flush `threshold` (0 disables flushing) and the caller's
/// [`FlushCounter`], into which the backend commits the flush events it
/// emulated.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "reference").
    fn name(&self) -> &str;

    /// Number of workers that may record into the counter concurrently.
    /// The counter passed to every call must have at least this many slots.
    fn num_workers(&self) -> usize;

    /// Flush every element of `data` in place.
    fn flush(&self, data: &mut [f32], threshold: u32, counter: &FlushCounter) -> Result<()>;

    /// Matrix multiplication with flushing after every multiply and add.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    #[allow(clippy::too_many_arguments)]
    fn matmul(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
        threshold: u32,
        counter: &FlushCounter,
    ) -> Result<Vec<f32>>;

    /// 2-D convolution of NHWC `input` with a `[KH, KW, Cin, Cout]` `kernel`.
    ///
    /// Returns NHWC data of shape `geom.output_shape()`.
    fn conv2d(
        &self,
        input: &[f32],
        kernel: &[f32],
        geom: &Conv2dGeometry,
        threshold: u32,
        counter: &FlushCounter,
    ) -> Result<Vec<f32>>;

    /// Flushed bias add along the innermost axis:
    /// `data[r, c] = flush(data[r, c] + flush(bias[c]))`.
    fn add_bias(
        &self,
        data: &mut [f32],
        bias: &[f32],
        threshold: u32,
        counter: &FlushCounter,
    ) -> Result<()>;
}
