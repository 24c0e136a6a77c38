pub mod kn2row;
pub mod matmul;
pub mod reference;
pub mod unary;

pub use reference::ReferenceBackend;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::config::KernelConfig;
use crate::conv::Conv2dGeometry;
use crate::counter::FlushCounter;
use crate::error::{Result, TensorError};

/// Multi-threaded CPU backend: tiled matmul and kn2row convolution with
/// emulated flush-to-zero.
///
/// Owns a dedicated worker pool of `config.num_workers` threads; every
/// parallel loop runs inside it, so the worker index doubles as the flush
/// counter slot.
#[derive(Debug)]
pub struct CpuBackend {
    config: KernelConfig,
    pool: ThreadPool,
}

impl CpuBackend {
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .thread_name(|i| format!("ftz-worker-{}", i))
            .build()?;
        debug!(workers = config.num_workers, block = config.block_size, "cpu backend ready");
        Ok(CpuBackend { config, pool })
    }

    /// Backend with `num_workers` threads and default tiling.
    pub fn with_workers(num_workers: usize) -> Result<Self> {
        Self::new(KernelConfig::default().with_workers(num_workers))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    fn run<T, F>(&self, counter: &FlushCounter, op: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        counter.check_workers(self.pool.current_num_threads())?;
        self.pool.install(op)
    }
}

/// Fails with a descriptive error unless `got == expected`.
pub(crate) fn check_len(op: &str, name: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(TensorError::Other(format!(
            "{}: {}.len()={} but expected {}",
            op, name, got, expected
        )));
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn flush(&self, data: &mut [f32], threshold: u32, counter: &FlushCounter) -> Result<()> {
        if threshold == 0 {
            return Ok(());
        }
        debug!(len = data.len(), threshold, "flush");
        let chunk = self.config.flush_chunk;
        self.run(counter, || unary::flush_parallel(data, threshold, chunk, counter))
    }

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
    ) -> Result<Vec<f32>> {
        check_len("matmul", "a", a.len(), m * k)?;
        check_len("matmul", "b", b.len(), k * n)?;
        let block = self.config.block_size;
        debug!(m, k, n, block, threshold, "tiled matmul");
        let before = counter.total();
        let c = self.run(counter, || {
            matmul::tiled_matmul(a, b, m, k, n, block, threshold, counter)
        })?;
        debug!(flushed = counter.total().saturating_sub(before), "tiled matmul done");
        Ok(c)
    }

    fn conv2d(
        &self,
        input: &[f32],
        kernel: &[f32],
        geom: &Conv2dGeometry,
        threshold: u32,
        counter: &FlushCounter,
    ) -> Result<Vec<f32>> {
        check_len(
            "conv2d",
            "input",
            input.len(),
            geom.batch * geom.in_h * geom.in_w * geom.in_c,
        )?;
        check_len(
            "conv2d",
            "kernel",
            kernel.len(),
            geom.taps() * geom.in_c * geom.out_c,
        )?;
        let block = self.config.block_size;
        debug!(
            batch = geom.batch,
            height = geom.in_h,
            width = geom.in_w,
            in_channels = geom.in_c,
            out_channels = geom.out_c,
            k_h = geom.k_h,
            k_w = geom.k_w,
            padding = %geom.padding,
            stride_h = geom.stride_h,
            stride_w = geom.stride_w,
            threshold,
            "kn2row conv2d"
        );
        let before = counter.total();
        let out = self.run(counter, || {
            kn2row::kn2row(input, kernel, geom, block, threshold, counter)
        })?;
        debug!(flushed = counter.total().saturating_sub(before), "kn2row conv2d done");
        Ok(out)
    }

    fn add_bias(
        &self,
        data: &mut [f32],
        bias: &[f32],
        threshold: u32,
        counter: &FlushCounter,
    ) -> Result<()> {
        debug!(len = data.len(), width = bias.len(), threshold, "add bias");
        let chunk = self.config.flush_chunk;
        self.run(counter, || {
            unary::add_bias_parallel(data, bias, threshold, chunk, counter)
        })
    }
}
