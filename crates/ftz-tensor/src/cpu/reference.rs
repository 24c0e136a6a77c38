use crate::backend::ComputeBackend;
use crate::conv::Conv2dGeometry;
use crate::counter::FlushCounter;
use crate::error::{Result, TensorError};
use crate::ftz::{flush_slice, flush_to_zero};

use super::check_len;

/// Single-threaded direct implementation of every operation.
///
/// Matmul is the plain triple loop and convolution is a sliding window over
/// the padded input. Flushing follows the same rule at every multiply and
/// add, with per-cell reduction orders that mirror the tiled/kn2row path:
/// results are bit-identical to [`CpuBackend`](super::CpuBackend) whenever the
/// inner dimension (matmul `k`, convolution `Cin`) fits in a single tile and
/// the kernel is odd-sized.
#[derive(Debug, Clone, Default)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        ReferenceBackend
    }
}

impl ComputeBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn num_workers(&self) -> usize {
        1
    }

    fn flush(&self, data: &mut [f32], threshold: u32, counter: &FlushCounter) -> Result<()> {
        counter.check_workers(1)?;
        counter.record(0, flush_slice(data, threshold))
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
        counter.check_workers(1)?;
        check_len("matmul", "a", a.len(), m * k)?;
        check_len("matmul", "b", b.len(), k * n)?;

        let mut flushed = 0u64;
        let mut c = vec![0.0f32; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f32;
                for p in 0..k {
                    let prod = flush_to_zero(a[i * k + p] * b[p * n + j], threshold, &mut flushed);
                    sum = flush_to_zero(sum + prod, threshold, &mut flushed);
                }
                c[i * n + j] = sum;
            }
        }
        counter.record(0, flushed)?;
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
        counter.check_workers(1)?;
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

        let padded = geom.pad_input(input);
        let (hp, wp) = (geom.padded_h() as isize, geom.padded_w() as isize);
        let (cin, cout) = (geom.in_c, geom.out_c);
        let (oh, ow) = (geom.out_h(), geom.out_w());
        let mut flushed = 0u64;
        let mut out = vec![0.0f32; geom.batch * oh * ow * cout];

        for s in 0..geom.batch {
            for oy in 0..oh {
                let cy = (geom.crop_start_h() + oy * geom.stride_h) as isize;
                for ox in 0..ow {
                    let cx = (geom.crop_start_w() + ox * geom.stride_w) as isize;
                    for co in 0..cout {
                        let mut acc = 0.0f32;
                        for ky in 0..geom.k_h {
                            let y = cy + ky as isize - geom.pad_h() as isize;
                            if y < 0 || y >= hp {
                                continue;
                            }
                            for kx in 0..geom.k_w {
                                let x = cx + kx as isize - geom.pad_w() as isize;
                                if x < 0 || x >= wp {
                                    continue;
                                }
                                let pix = ((s as isize * hp + y) * wp + x) as usize * cin;
                                let tap = (ky * geom.k_w + kx) * cin;
                                let mut dot = 0.0f32;
                                for ci in 0..cin {
                                    let w = kernel[(tap + ci) * cout + co];
                                    let prod = flush_to_zero(padded[pix + ci] * w, threshold, &mut flushed);
                                    dot = flush_to_zero(dot + prod, threshold, &mut flushed);
                                }
                                acc = flush_to_zero(acc + dot, threshold, &mut flushed);
                            }
                        }
                        out[((s * oh + oy) * ow + ox) * cout + co] = acc;
                    }
                }
            }
        }
        counter.record(0, flushed)?;
        Ok(out)
    }

    fn add_bias(
        &self,
        data: &mut [f32],
        bias: &[f32],
        threshold: u32,
        counter: &FlushCounter,
    ) -> Result<()> {
        counter.check_workers(1)?;
        if bias.is_empty() || data.len() % bias.len() != 0 {
            return Err(TensorError::Other(format!(
                "add_bias: data.len()={} is not a multiple of bias.len()={}",
                data.len(),
                bias.len()
            )));
        }
        let mut bias = bias.to_vec();
        let mut flushed = flush_slice(&mut bias, threshold);
        for row in data.chunks_exact_mut(bias.len()) {
            for (v, &b) in row.iter_mut().zip(&bias) {
                *v = flush_to_zero(*v + b, threshold, &mut flushed);
            }
        }
        counter.record(0, flushed)
    }
}
